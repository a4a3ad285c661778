//! Per-run artifacts: the machine-readable report and the rendered summary.
//!
//! Artifacts are product output and always written, independent of the
//! `RUST_LOG`-controlled tracing diagnostics.

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::outcome::RunReport;

/// Well-known locations under the configured state directory.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub state_dir: PathBuf,
}

impl RunPaths {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("provision.lock")
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.state_dir.join("runs").join(run_id)
    }

    pub fn report_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("report.json")
    }

    pub fn summary_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("summary.txt")
    }
}

/// Written artifact locations for one run.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub report_path: PathBuf,
    pub summary_path: PathBuf,
}

/// Generate a fresh run id. Reports have no persisted identity beyond the
/// directory this names.
pub fn new_run_id() -> String {
    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("run-{epoch}-{}", std::process::id())
}

/// Write the report JSON and rendered summary for `run_id`.
pub fn write_run_artifacts(
    paths: &RunPaths,
    run_id: &str,
    report: &RunReport,
    summary: &str,
) -> Result<RunArtifacts> {
    let dir = paths.run_dir(run_id);
    fs::create_dir_all(&dir).with_context(|| format!("create run dir {}", dir.display()))?;

    let report_path = paths.report_path(run_id);
    let mut payload = serde_json::to_string_pretty(report).context("serialize run report")?;
    payload.push('\n');
    fs::write(&report_path, payload)
        .with_context(|| format!("write {}", report_path.display()))?;

    let summary_path = paths.summary_path(run_id);
    fs::write(&summary_path, summary)
        .with_context(|| format!("write {}", summary_path.display()))?;

    debug!(run_id, dir = %dir.display(), "run artifacts written");
    Ok(RunArtifacts {
        report_path,
        summary_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::outcome::{RunReport, StepOutcome, StepRecord};

    #[test]
    fn run_ids_are_distinct_per_call_site_shape() {
        let id = new_run_id();
        assert!(id.starts_with("run-"));
    }

    #[test]
    fn artifacts_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path());
        let report = RunReport::completed(vec![StepRecord {
            step: "install-server".to_string(),
            outcome: StepOutcome::Succeeded { warning: None },
            attempts: 1,
            hint: None,
        }]);

        let artifacts =
            write_run_artifacts(&paths, "run-7", &report, "all good\n").expect("write");

        let raw = fs::read_to_string(&artifacts.report_path).expect("read report");
        let loaded: RunReport = serde_json::from_str(&raw).expect("parse report");
        assert_eq!(loaded, report);
        assert_eq!(
            fs::read_to_string(&artifacts.summary_path).expect("read summary"),
            "all good\n"
        );
    }
}
