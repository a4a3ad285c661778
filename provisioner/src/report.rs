//! Human-readable run summary.
//!
//! Pure rendering: a function of the run report, discovered endpoints, and
//! artifact locations. No I/O here; the CLI decides where the text goes.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::outcome::{RunReport, RunStatus, StepOutcome};

const SUMMARY_TEMPLATE: &str = include_str!("templates/summary.txt");

/// A reachable address of the provisioned service.
#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub label: String,
    pub url: String,
}

impl Endpoint {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }
}

#[derive(Serialize)]
struct RecordContext {
    step: String,
    state: &'static str,
    attempts: u32,
    detail: Option<String>,
    hint: Option<String>,
}

/// Render the fixed-format summary for a completed or aborted run.
pub fn render_summary(
    report: &RunReport,
    endpoints: &[Endpoint],
    artifacts: &[String],
) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("summary", SUMMARY_TEMPLATE)
        .expect("summary template should be valid");
    let template = env.get_template("summary")?;

    let records: Vec<RecordContext> = report
        .records
        .iter()
        .map(|record| {
            let (state, detail) = match &record.outcome {
                StepOutcome::Skipped => ("skip", None),
                StepOutcome::Succeeded { warning: None } => (" ok ", None),
                StepOutcome::Succeeded {
                    warning: Some(warning),
                } => ("warn", Some(warning.clone())),
                StepOutcome::Failed { reason } => ("FAIL", Some(reason.clone())),
            };
            RecordContext {
                step: record.step.clone(),
                state,
                attempts: record.attempts,
                detail,
                hint: record.hint.clone(),
            }
        })
        .collect();

    let aborted_step = match &report.status {
        RunStatus::Completed => None,
        RunStatus::Aborted { step } => Some(step.clone()),
    };

    let rendered = template.render(context! {
        records => records,
        aborted_step => aborted_step,
        endpoints => endpoints,
        artifacts => artifacts,
    })?;
    Ok(rendered)
}
