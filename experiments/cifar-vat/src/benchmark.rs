use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use vatnet_core::{EpochMetrics, EvaluationMetrics};

pub const BENCHMARK_TOLERANCE: f32 = 5e-3;

/// Metrics of a test-mode run, recorded once and compared against on later runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BenchmarkSnapshot {
    pub final_train: EpochMetrics,
    pub final_test: EvaluationMetrics,
}

pub fn validate_benchmark(actual: &BenchmarkSnapshot, reference: &BenchmarkSnapshot) -> Result<()> {
    if actual.final_train.epoch != reference.final_train.epoch {
        return Err(anyhow!(
            "epoch count changed between runs ({} vs {}); delete the benchmark if this is intentional",
            actual.final_train.epoch,
            reference.final_train.epoch
        ));
    }

    let checks = [
        ("final train loss", actual.final_train.loss, reference.final_train.loss),
        (
            "final train accuracy",
            actual.final_train.accuracy,
            reference.final_train.accuracy,
        ),
        (
            "final validation loss",
            actual.final_train.validation.loss,
            reference.final_train.validation.loss,
        ),
        (
            "final validation accuracy",
            actual.final_train.validation.accuracy,
            reference.final_train.validation.accuracy,
        ),
        ("test loss", actual.final_test.loss, reference.final_test.loss),
        (
            "test accuracy",
            actual.final_test.accuracy,
            reference.final_test.accuracy,
        ),
    ];

    for (label, actual, expected) in checks {
        ensure_close(actual, expected, BENCHMARK_TOLERANCE, label)?;
    }
    Ok(())
}

fn ensure_close(actual: f32, expected: f32, tolerance: f32, label: &str) -> Result<()> {
    if (actual - expected).abs() > tolerance {
        Err(anyhow!(
            "{} deviated from benchmark (actual {:.4} vs expected {:.4}, tol {:.4})",
            label,
            actual,
            expected,
            tolerance
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(loss: f32, epoch: usize) -> BenchmarkSnapshot {
        let eval = EvaluationMetrics {
            loss,
            accuracy: 30.0,
        };
        BenchmarkSnapshot {
            final_train: EpochMetrics {
                epoch,
                learning_rate: 0.003,
                loss,
                accuracy: 25.0,
                validation: eval,
                seconds: 3.0,
            },
            final_test: eval,
        }
    }

    #[test]
    fn accepts_small_deviation() {
        assert!(validate_benchmark(&snapshot(1.0, 2), &snapshot(1.001, 2)).is_ok());
    }

    #[test]
    fn rejects_drift_and_epoch_changes() {
        let err = validate_benchmark(&snapshot(1.1, 2), &snapshot(1.0, 2)).unwrap_err();
        assert!(err.to_string().contains("final train loss"));
        assert!(validate_benchmark(&snapshot(1.0, 3), &snapshot(1.0, 2)).is_err());
    }
}
