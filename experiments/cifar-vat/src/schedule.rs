/// Constant learning rate for the first half of training, then an optional linear
/// decay that reaches `final_rate` on the last epoch.
#[derive(Clone, Copy, Debug)]
pub struct LearningRateSchedule {
    pub initial: f64,
    pub final_rate: f64,
    pub epochs: usize,
    pub decay: bool,
}

impl LearningRateSchedule {
    /// Rate for the zero-based `epoch`.
    pub fn rate(&self, epoch: usize) -> f64 {
        let half = self.epochs / 2;
        if !self.decay || epoch < half {
            return self.initial;
        }

        let decay_epochs = self.epochs - half;
        if decay_epochs <= 1 {
            return self.final_rate;
        }
        let progress = (epoch - half).min(decay_epochs - 1) as f64 / (decay_epochs - 1) as f64;
        self.initial + (self.final_rate - self.initial) * progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(epochs: usize, decay: bool) -> LearningRateSchedule {
        LearningRateSchedule {
            initial: 0.003,
            final_rate: 0.0005,
            epochs,
            decay,
        }
    }

    #[test]
    fn constant_without_decay() {
        let s = schedule(300, false);
        assert_eq!(s.rate(0), 0.003);
        assert_eq!(s.rate(299), 0.003);
    }

    #[test]
    fn decays_linearly_over_second_half() {
        let s = schedule(300, true);
        assert_eq!(s.rate(149), 0.003);
        assert!((s.rate(150) - 0.003).abs() < 1e-12);
        assert!((s.rate(299) - 0.0005).abs() < 1e-12);

        let mid = s.rate(150 + 149 / 2);
        assert!(mid < 0.003 && mid > 0.0005);
        assert!(s.rate(200) > s.rate(201));
    }

    #[test]
    fn short_runs_end_at_final_rate() {
        let s = schedule(2, true);
        assert_eq!(s.rate(0), 0.003);
        assert_eq!(s.rate(1), 0.0005);
        assert_eq!(schedule(1, true).rate(0), 0.0005);
    }
}
