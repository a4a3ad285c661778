//! Outcome and report types for a provisioning run.
//!
//! These types define stable contracts between the sequencer, the reporter,
//! and the run-artifact store. They carry no I/O and serialize to stable JSON.

use serde::{Deserialize, Serialize};

/// Result of one step, immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepOutcome {
    /// The precondition already held; the action never ran.
    Skipped,
    /// The action (and postcondition, if any) completed.
    ///
    /// `warning` is set for best-effort steps whose action failed but which
    /// are treated as successful anyway.
    Succeeded { warning: Option<String> },
    /// The action or postcondition failed after all configured attempts.
    Failed { reason: String },
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }
}

/// One recorded entry of a run: which step, what happened, how many attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub outcome: StepOutcome,
    /// Action attempts consumed (0 for skipped steps).
    pub attempts: u32,
    /// Remediation hint surfaced on failure, if the step declared one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hint: Option<String>,
}

/// Terminal status of a whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RunStatus {
    /// Every step was attempted (skipped or run) with no fatal failure.
    Completed,
    /// A fatal step failed; no step after it was attempted.
    Aborted { step: String },
}

/// Ordered record of one provisioning run. Produced fresh per run; never
/// persisted with an identity of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub records: Vec<StepRecord>,
    pub status: RunStatus,
}

impl RunReport {
    /// Report for a run that reached the end of the plan.
    pub fn completed(records: Vec<StepRecord>) -> Self {
        Self {
            records,
            status: RunStatus::Completed,
        }
    }

    /// Report for a run halted by a fatal failure at `step`.
    ///
    /// `records` must already contain the failing step's entry; callers are
    /// expected to record each outcome exactly once, in execution order.
    pub fn aborted(records: Vec<StepRecord>, step: impl Into<String>) -> Self {
        Self {
            records,
            status: RunStatus::Aborted { step: step.into() },
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.status, RunStatus::Aborted { .. })
    }

    /// Records with a `Failed` outcome, in execution order.
    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.records.iter().filter(|r| r.outcome.is_failure())
    }

    /// Count of steps whose action actually ran (not skipped).
    pub fn executed(&self) -> usize {
        self.records
            .iter()
            .filter(|r| !matches!(r.outcome, StepOutcome::Skipped))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(step: &str, outcome: StepOutcome) -> StepRecord {
        StepRecord {
            step: step.to_string(),
            outcome,
            attempts: 1,
            hint: None,
        }
    }

    #[test]
    fn failures_are_filtered_in_order() {
        let report = RunReport::completed(vec![
            record("a", StepOutcome::Skipped),
            record("b", StepOutcome::Failed { reason: "x".into() }),
            record("c", StepOutcome::Succeeded { warning: None }),
            record("d", StepOutcome::Failed { reason: "y".into() }),
        ]);

        let failed: Vec<&str> = report.failures().map(|r| r.step.as_str()).collect();
        assert_eq!(failed, vec!["b", "d"]);
        assert!(!report.is_aborted());
        assert_eq!(report.executed(), 3);
    }

    #[test]
    fn serializes_to_stable_json() {
        let report = RunReport::aborted(
            vec![record("check-gpu-driver", StepOutcome::Failed { reason: "no device".into() })],
            "check-gpu-driver",
        );

        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["status"]["kind"], "aborted");
        assert_eq!(json["status"]["step"], "check-gpu-driver");
        assert_eq!(json["records"][0]["outcome"]["kind"], "failed");
    }
}
