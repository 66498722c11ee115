use serde::{Deserialize, Serialize};

/// Summary of one training epoch, including the validation pass that follows it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub learning_rate: f64,
    pub loss: f32,
    pub accuracy: f32,
    pub validation: EvaluationMetrics,
    pub seconds: f32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub loss: f32,
    pub accuracy: f32,
}

/// Running sums for loss and accuracy over a sequence of batches.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricAccumulator {
    loss_sum: f64,
    correct: usize,
    samples: usize,
}

impl MetricAccumulator {
    /// Record a batch whose mean loss is `loss`.
    pub fn add_batch(&mut self, loss: f32, correct: usize, samples: usize) {
        self.loss_sum += loss as f64 * samples as f64;
        self.correct += correct;
        self.samples += samples;
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Sample-weighted mean loss and accuracy in percent. Empty accumulators report zeros.
    pub fn finish(&self) -> EvaluationMetrics {
        if self.samples == 0 {
            return EvaluationMetrics {
                loss: 0.0,
                accuracy: 0.0,
            };
        }
        EvaluationMetrics {
            loss: (self.loss_sum / self.samples as f64) as f32,
            accuracy: self.correct as f32 / self.samples as f32 * 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_loss_by_batch_size() {
        let mut acc = MetricAccumulator::default();
        acc.add_batch(1.0, 3, 4);
        acc.add_batch(4.0, 1, 1);
        let metrics = acc.finish();
        assert!((metrics.loss - 1.6).abs() < 1e-6);
        assert!((metrics.accuracy - 80.0).abs() < 1e-4);
        assert_eq!(acc.samples(), 5);
    }

    #[test]
    fn empty_accumulator_is_zero() {
        let metrics = MetricAccumulator::default().finish();
        assert_eq!(metrics.loss, 0.0);
        assert_eq!(metrics.accuracy, 0.0);
    }
}
