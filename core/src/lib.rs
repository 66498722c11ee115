pub mod config;
pub mod experiment;
pub mod metrics;
pub mod report;
pub mod rng;
pub mod visualization;

pub use config::{load_json, load_or_init, save_json};
pub use experiment::{ExperimentMode, ExperimentModeArgs};
pub use metrics::{EpochMetrics, EvaluationMetrics, MetricAccumulator};
pub use report::{ensure_report_file, update_sections, ReportSection, DEFAULT_REPORT_TEMPLATE};
pub use rng::{permutation, seeded_rng};
pub use visualization::encode_planar_rgb_png_data_url;
