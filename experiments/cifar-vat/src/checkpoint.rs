use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use burn::{
    module::Module,
    record::{FileRecorder, FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};

use crate::model::{ConvLarge, ConvLargeConfig};

pub const MODEL_NAME: &str = "cifar_vat_model";

type ModelRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Path of the saved record, including the extension the recorder appends.
pub fn checkpoint_path<B: Backend>(dir: &Path) -> PathBuf {
    dir.join(MODEL_NAME)
        .with_extension(<ModelRecorder as FileRecorder<B>>::file_extension())
}

pub fn save_checkpoint<B: Backend>(model: &ConvLarge<B>, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    model
        .clone()
        .save_file(dir.join(MODEL_NAME), &ModelRecorder::new())
        .map_err(|err| anyhow!("failed to save model to {}: {err:?}", dir.display()))?;

    Ok(checkpoint_path::<B>(dir))
}

pub fn load_checkpoint<B: Backend>(dir: &Path, device: &B::Device) -> Result<ConvLarge<B>> {
    let path = checkpoint_path::<B>(dir);
    if !path.exists() {
        return Err(anyhow!(
            "no saved model at {}; run with --mode full or --mode test first",
            path.display()
        ));
    }

    ConvLargeConfig::cifar()
        .init::<B>(device)
        .load_file(dir.join(MODEL_NAME), &ModelRecorder::new(), device)
        .map_err(|err| anyhow!("failed to load model from {}: {err:?}", path.display()))
}
