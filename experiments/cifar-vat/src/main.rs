mod benchmark;
mod checkpoint;
mod config;
mod data;
mod model;
mod report;
mod schedule;
mod training;
mod vat;

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use burn::module::AutodiffModule;
use burn_dataset::Dataset;
use burn_ndarray::NdArrayDevice;
use vatnet_core::{
    ensure_report_file, load_json, load_or_init, save_json, ExperimentMode, ExperimentModeArgs,
    DEFAULT_REPORT_TEMPLATE,
};

use crate::{
    benchmark::{validate_benchmark, BenchmarkSnapshot, BENCHMARK_TOLERANCE},
    checkpoint::{load_checkpoint, save_checkpoint},
    config::{ExperimentConfig, DATA_DIR_ENV},
    data::CifarDataset,
    report::{write_report, RunSummary},
    training::{evaluate, run_training, sample_predictions, InferenceBackend},
};

const TEST_EPOCHS: usize = 2;
const TEST_TRAIN_SAMPLES: usize = 500;
const TEST_TEST_SAMPLES: usize = 200;
const SAMPLE_COUNT: usize = 3;

struct ExperimentPaths {
    config: PathBuf,
    report: PathBuf,
    benchmark: PathBuf,
    models: PathBuf,
}

impl ExperimentPaths {
    /// Full runs and evaluation share a checkpoint; test runs keep their own.
    fn checkpoint_dir(&self, mode: ExperimentMode) -> PathBuf {
        match mode {
            ExperimentMode::Test => self.models.join("test"),
            ExperimentMode::Full | ExperimentMode::Eval => self.models.clone(),
        }
    }
}

fn main() -> Result<()> {
    let args = ExperimentModeArgs::parse_from_env()?;
    if args.help_requested() {
        print_usage();
        return Ok(());
    }

    let mode = args.mode();
    let paths = initialize_paths()?;
    let config: ExperimentConfig = load_or_init(&paths.config, ExperimentConfig::default)?;
    ensure_report_file(&paths.report, DEFAULT_REPORT_TEMPLATE)?;

    println!("running CIFAR-10 VAT classifier in {} mode", mode.label());

    let device = NdArrayDevice::Cpu;
    let (train, test) = load_datasets(&config.resolved_data_dir(), mode)?;
    println!("{} train samples", train.len());
    println!("{} test samples", test.len());

    if mode.trains() {
        train_and_report(mode, &config, &paths, &train, &test, &device)
    } else {
        evaluate_saved_model(&config, &paths, &test, &device)
    }
}

fn print_usage() {
    println!("Usage: cargo run -p vatnet-experiment-cifar-vat -- [--mode full|test|eval]");
    println!();
    println!("  full  train on all of CIFAR-10 for the configured number of epochs");
    println!(
        "  test  train {} epochs on {} images and check against the benchmark snapshot",
        TEST_EPOCHS, TEST_TRAIN_SAMPLES
    );
    println!("  eval  score the saved model on the test split");
    println!();
    println!(
        "The dataset directory comes from config.json or the {} environment variable.",
        DATA_DIR_ENV
    );
}

fn initialize_paths() -> Result<ExperimentPaths> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("experiments/cifar_vat");
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create experiment directory {}", dir.display()))?;

    Ok(ExperimentPaths {
        config: dir.join("config.json"),
        report: dir.join("report.md"),
        benchmark: dir.join("benchmark.json"),
        models: dir.join("saved_models"),
    })
}

fn load_datasets(dir: &Path, mode: ExperimentMode) -> Result<(CifarDataset, CifarDataset)> {
    let test = CifarDataset::test(dir)?;
    if !mode.trains() {
        return Ok((CifarDataset::default(), test));
    }

    let train = CifarDataset::train(dir)?;
    Ok(match mode {
        ExperimentMode::Test => (
            train.truncated(TEST_TRAIN_SAMPLES),
            test.truncated(TEST_TEST_SAMPLES),
        ),
        ExperimentMode::Full | ExperimentMode::Eval => (train, test),
    })
}

fn train_and_report(
    mode: ExperimentMode,
    config: &ExperimentConfig,
    paths: &ExperimentPaths,
    train: &CifarDataset,
    test: &CifarDataset,
    device: &NdArrayDevice,
) -> Result<()> {
    let epochs = mode.select(config.epochs, TEST_EPOCHS);
    let outcome = run_training(config, epochs, train, test, device)?;
    let final_train = outcome.final_epoch()?.clone();

    let checkpoint = save_checkpoint(&outcome.model, &paths.checkpoint_dir(mode))?;
    println!("saved trained model at {}", checkpoint.display());

    let model = outcome.model.valid();
    let final_test = evaluate(&model, test, config.batch_size, device)?;
    println!("test loss: {:.4}", final_test.loss);
    println!("test accuracy: {:.2}%", final_test.accuracy);

    let train_predictions = sample_predictions(&model, device, train, SAMPLE_COUNT)?;
    let test_predictions = sample_predictions(&model, device, test, SAMPLE_COUNT)?;
    write_report(
        &paths.report,
        config,
        &RunSummary {
            mode: mode.label(),
            epochs,
            train_samples: train.len(),
            test_samples: test.len(),
            history: &outcome.history,
            final_test,
            train_predictions: &train_predictions,
            test_predictions: &test_predictions,
        },
    )?;

    let benchmark: Option<BenchmarkSnapshot> = load_json(&paths.benchmark)?;
    match mode {
        ExperimentMode::Test => {
            let snapshot = BenchmarkSnapshot {
                final_train,
                final_test,
            };
            if let Some(reference) = benchmark {
                validate_benchmark(&snapshot, &reference)?;
                println!(
                    "benchmark check passed (tolerance {:.1e})",
                    BENCHMARK_TOLERANCE
                );
            } else {
                save_json(&paths.benchmark, &snapshot)?;
                println!(
                    "saved new benchmark snapshot to {}",
                    paths.benchmark.display()
                );
            }
        }
        ExperimentMode::Full | ExperimentMode::Eval => {
            if benchmark.is_none() {
                println!("no benchmark snapshot recorded yet; run with --mode test to capture one.");
            }
        }
    }

    Ok(())
}

fn evaluate_saved_model(
    config: &ExperimentConfig,
    paths: &ExperimentPaths,
    test: &CifarDataset,
    device: &NdArrayDevice,
) -> Result<()> {
    let dir = paths.checkpoint_dir(ExperimentMode::Eval);
    let model = load_checkpoint::<InferenceBackend>(&dir, device)?;
    println!("loaded model from {}", dir.display());

    let scores = evaluate(&model, test, config.batch_size, device)?;
    println!("test loss: {:.4}", scores.loss);
    println!("test accuracy: {:.2}%", scores.accuracy);
    Ok(())
}
