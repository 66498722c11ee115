use std::{fs, path::Path};

use anyhow::{anyhow, Context, Result};

pub const DEFAULT_REPORT_TEMPLATE: &str = r"# Experiment Notebook

<!-- SECTION:overview start -->
<!-- Describe the model, the dataset and the regulariser under study. -->
<!-- SECTION:overview end -->

## Hypotheses

<!-- SECTION:hypotheses start -->
<!-- Capture the expectations being validated in this run. -->
<!-- SECTION:hypotheses end -->

## Configuration

<!-- SECTION:configuration start -->
<!-- Populated automatically with the parameters from the latest run. -->
<!-- SECTION:configuration end -->

## Metrics

<!-- SECTION:metrics start -->
<!-- Populated automatically with per-epoch training and validation summaries. -->
<!-- SECTION:metrics end -->

## Sample Predictions

<!-- SECTION:samples-train start -->
<!-- Predictions on the first training images. -->
<!-- SECTION:samples-train end -->

<!-- SECTION:samples-test start -->
<!-- Predictions on the first test images. -->
<!-- SECTION:samples-test end -->

> Keep the `<!-- SECTION:name start/end -->` markers around any region that should be
> rewritten by the next run. Text outside the markers is left untouched.
";

#[derive(Clone, Debug)]
pub struct ReportSection {
    id: String,
    content: String,
}

impl ReportSection {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }

    fn start_marker(&self) -> String {
        format!("<!-- SECTION:{} start -->", self.id)
    }

    fn end_marker(&self) -> String {
        format!("<!-- SECTION:{} end -->", self.id)
    }
}

pub fn ensure_report_file(path: &Path, template: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    if !path.exists() {
        fs::write(path, template)
            .with_context(|| format!("failed to write report template to {}", path.display()))?;
    }

    Ok(())
}

pub fn update_sections(path: &Path, sections: &[ReportSection]) -> Result<()> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read report at {}", path.display()))?;

    let updated = sections
        .iter()
        .try_fold(content, |content, section| replace_section(&content, section))?;

    fs::write(path, updated)
        .with_context(|| format!("failed to write updated report to {}", path.display()))?;
    Ok(())
}

fn replace_section(content: &str, section: &ReportSection) -> Result<String> {
    let start_marker = section.start_marker();
    let end_marker = section.end_marker();

    let start_idx = content
        .find(&start_marker)
        .ok_or_else(|| anyhow!("missing start marker: {}", start_marker))?;
    let after_start = start_idx + start_marker.len();
    let end_idx = content[after_start..]
        .find(&end_marker)
        .map(|offset| after_start + offset)
        .ok_or_else(|| anyhow!("missing end marker: {}", end_marker))?;

    let body = section.content.trim_matches('\n');
    let mut updated = String::with_capacity(content.len() + body.len());
    updated.push_str(&content[..after_start]);
    updated.push('\n');
    if !body.is_empty() {
        updated.push_str(body);
        updated.push('\n');
    }
    updated.push_str(&content[end_idx..]);
    Ok(updated)
}
