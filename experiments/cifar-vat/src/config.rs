use std::{env, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Overrides `data_dir` when set.
pub const DATA_DIR_ENV: &str = "VATNET_DATA_DIR";

/// Persisted as `config.json` next to the report. Missing fields take their defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub seed: u64,
    /// Directory holding the CIFAR-10 binary batches (`data_batch_*.bin`, `test_batch.bin`).
    pub data_dir: PathBuf,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub final_learning_rate: f64,
    /// Linearly decay the learning rate over the second half of training.
    pub lr_decay: bool,
    pub vat: VatConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VatConfig {
    /// Radius of the finite-difference perturbation used by the power iteration.
    pub xi: f64,
    /// Radius of the adversarial perturbation.
    pub epsilon: f64,
    pub power_iterations: usize,
    /// Weight of the divergence term; `None` means `1 / batch_size`. Zero disables it.
    pub alpha: Option<f64>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            seed: 1337,
            data_dir: PathBuf::from("data/cifar-10-batches-bin"),
            batch_size: 100,
            epochs: 300,
            learning_rate: 0.003,
            final_learning_rate: 0.0005,
            lr_decay: false,
            vat: VatConfig::default(),
        }
    }
}

impl Default for VatConfig {
    fn default() -> Self {
        Self {
            xi: 10.0,
            epsilon: 2.0,
            power_iterations: 1,
            alpha: None,
        }
    }
}

impl ExperimentConfig {
    pub fn resolved_data_dir(&self) -> PathBuf {
        match env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => self.data_dir.clone(),
        }
    }

    pub fn vat_alpha(&self) -> f64 {
        self.vat
            .alpha
            .unwrap_or_else(|| 1.0 / self.batch_size.max(1) as f64)
    }
}
