use std::{fmt::Write, path::Path};

use anyhow::Result;
use vatnet_core::{update_sections, EpochMetrics, EvaluationMetrics, ReportSection};

use crate::{config::ExperimentConfig, data::CLASS_NAMES, training::SamplePrediction};

pub struct RunSummary<'a> {
    pub mode: &'a str,
    pub epochs: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub history: &'a [EpochMetrics],
    pub final_test: EvaluationMetrics,
    pub train_predictions: &'a [SamplePrediction],
    pub test_predictions: &'a [SamplePrediction],
}

pub fn write_report(report_path: &Path, config: &ExperimentConfig, run: &RunSummary) -> Result<()> {
    let sections = [
        ReportSection::new("configuration", render_configuration_section(config, run)),
        ReportSection::new(
            "metrics",
            render_metrics_section(run.history, &run.final_test),
        ),
        ReportSection::new(
            "samples-train",
            render_samples_section("Training split", run.train_predictions),
        ),
        ReportSection::new(
            "samples-test",
            render_samples_section("Test split", run.test_predictions),
        ),
    ];

    update_sections(report_path, &sections)
}

fn render_configuration_section(config: &ExperimentConfig, run: &RunSummary) -> String {
    let alpha = config.vat_alpha();
    let mut output = format!(
        "- Mode: {}\n- Seed: {}\n- Train / test images: {} / {}\n- Batch size: {}\n- Epochs: {}\n- Learning rate: {:.4}",
        run.mode,
        config.seed,
        run.train_samples,
        run.test_samples,
        config.batch_size,
        run.epochs,
        config.learning_rate
    );
    if config.lr_decay {
        let _ = write!(
            &mut output,
            " (decays to {:.4} over the second half)",
            config.final_learning_rate
        );
    }
    output.push('\n');

    if alpha == 0.0 {
        output.push_str("- VAT: disabled\n");
    } else {
        let _ = writeln!(
            &mut output,
            "- VAT: xi {}, epsilon {}, power iterations {}, weight {:.4}",
            config.vat.xi, config.vat.epsilon, config.vat.power_iterations, alpha
        );
    }
    output
}

fn render_metrics_section(history: &[EpochMetrics], final_test: &EvaluationMetrics) -> String {
    let mut output = String::new();

    if let Some(last) = history.last() {
        let _ = writeln!(
            &mut output,
            "- Final train loss: {:.4}\n- Final train accuracy: {:.2}%",
            last.loss, last.accuracy
        );
    }

    let _ = writeln!(
        &mut output,
        "- Test loss: {:.4}\n- Test accuracy: {:.2}%\n",
        final_test.loss, final_test.accuracy
    );

    if !history.is_empty() {
        let _ = writeln!(
            &mut output,
            "| Epoch | LR | Train Loss | Train Accuracy (%) | Val Loss | Val Accuracy (%) |"
        );
        let _ = writeln!(&mut output, "| --- | --- | --- | --- | --- | --- |");

        for metrics in summarize_history(history) {
            let _ = writeln!(
                &mut output,
                "| {} | {:.5} | {:.4} | {:.2} | {:.4} | {:.2} |",
                metrics.epoch,
                metrics.learning_rate,
                metrics.loss,
                metrics.accuracy,
                metrics.validation.loss,
                metrics.validation.accuracy
            );
        }
    }

    output
}

fn render_samples_section(title: &str, samples: &[SamplePrediction]) -> String {
    if samples.is_empty() {
        return format!("### {}\n\nNo samples available for this split.", title);
    }

    let mut output = String::new();
    let _ = writeln!(&mut output, "### {}\n", title);

    for sample in samples {
        let _ = writeln!(
            &mut output,
            "#### Index {}\n- True label: {}\n- Predicted: {}\n\n![Sample image]({})\n",
            sample.index,
            class_name(sample.label),
            class_name(sample.prediction),
            sample.image_data_url
        );
    }

    output
}

fn class_name(label: usize) -> &'static str {
    CLASS_NAMES.get(label).copied().unwrap_or("unknown")
}

/// Rows at fixed epochs plus the last one.
fn summarize_history(history: &[EpochMetrics]) -> Vec<&EpochMetrics> {
    let Some(last) = history.last() else {
        return Vec::new();
    };

    let mut summary: Vec<&EpochMetrics> = history
        .iter()
        .filter(|m| matches!(m.epoch, 1 | 5 | 10 | 25 | 50 | 100 | 150 | 200 | 250))
        .collect();
    if summary.last().map(|m| m.epoch) != Some(last.epoch) {
        summary.push(last);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(epoch: usize) -> EpochMetrics {
        EpochMetrics {
            epoch,
            learning_rate: 0.003,
            loss: 1.0 / epoch as f32,
            accuracy: epoch as f32,
            validation: EvaluationMetrics {
                loss: 2.0,
                accuracy: 40.0,
            },
            seconds: 1.0,
        }
    }

    #[test]
    fn summary_keeps_checkpoints_and_last_epoch() {
        let history: Vec<_> = (1..=12).map(epoch).collect();
        let epochs: Vec<usize> = summarize_history(&history).iter().map(|m| m.epoch).collect();
        assert_eq!(epochs, vec![1, 5, 10, 12]);

        let history: Vec<_> = (1..=10).map(epoch).collect();
        let epochs: Vec<usize> = summarize_history(&history).iter().map(|m| m.epoch).collect();
        assert_eq!(epochs, vec![1, 5, 10]);
        assert!(summarize_history(&[]).is_empty());
    }

    #[test]
    fn samples_use_class_names() {
        let sample = SamplePrediction {
            index: 4,
            label: 3,
            prediction: 5,
            image_data_url: "data:image/png;base64,AA==".to_string(),
        };
        let rendered = render_samples_section("Test split", &[sample]);
        assert!(rendered.contains("True label: cat"));
        assert!(rendered.contains("Predicted: dog"));
        assert!(render_samples_section("Empty", &[]).contains("No samples"));
    }

    #[test]
    fn configuration_mentions_disabled_vat() {
        let mut config = ExperimentConfig::default();
        config.vat.alpha = Some(0.0);
        let run = RunSummary {
            mode: "test",
            epochs: 2,
            train_samples: 500,
            test_samples: 200,
            history: &[],
            final_test: EvaluationMetrics {
                loss: 0.0,
                accuracy: 0.0,
            },
            train_predictions: &[],
            test_predictions: &[],
        };
        let rendered = render_configuration_section(&config, &run);
        assert!(rendered.contains("- VAT: disabled"));
        assert!(rendered.contains("- Epochs: 2"));
    }
}
