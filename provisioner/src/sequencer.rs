//! Plan execution: skip, run, retry, abort.
//!
//! A run moves `Pending → Running → {Completed, Aborted}`. For each step in
//! plan order: a satisfied precondition records `Skipped`; otherwise the
//! action runs (with the step's retry policy, action + postcondition
//! counting as one attempt). A failed fatal step aborts the run; a failed
//! non-fatal step is recorded and execution continues. Cancellation is
//! honored between steps, between retry attempts, and inside postcondition
//! polls, but never mid-action, because there is no rollback.

use std::time::Instant;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::cancel::CancelToken;
use crate::core::outcome::{RunReport, StepOutcome, StepRecord};
use crate::io::credentials::CredentialError;
use crate::plan::{ActionContext, ActionOutcome, Step};
use crate::verify::{Health, VerificationTimeout, poll_until, sleep_sliced};

/// What a dry run says a step would do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewVerdict {
    /// Precondition already holds; the action would not run.
    WouldSkip,
    WouldRun,
}

#[derive(Debug, Clone)]
pub struct PreviewEntry {
    pub step: String,
    pub fatal: bool,
    pub verdict: PreviewVerdict,
}

/// Owns one plan for the duration of one run.
pub struct Sequencer {
    steps: Vec<Step>,
    cancel: CancelToken,
}

impl Sequencer {
    pub fn new(steps: Vec<Step>, cancel: CancelToken) -> Self {
        Self { steps, cancel }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Evaluate every step's precondition without running anything.
    ///
    /// Probes are read-only by contract, so this mutates nothing; a failing
    /// probe is reported as `WouldRun` (same as the real run would decide).
    pub fn preview(&self) -> Vec<PreviewEntry> {
        self.steps
            .iter()
            .map(|step| {
                let verdict = match &step.precondition {
                    None => PreviewVerdict::WouldRun,
                    Some(check) => match check.evaluate() {
                        Ok(true) => PreviewVerdict::WouldSkip,
                        Ok(false) => PreviewVerdict::WouldRun,
                        Err(err) => {
                            warn!(step = %step.name, err = %format!("{err:#}"), "precondition probe failed");
                            PreviewVerdict::WouldRun
                        }
                    },
                };
                PreviewEntry {
                    step: step.name.clone(),
                    fatal: step.fatal,
                    verdict,
                }
            })
            .collect()
    }

    /// Execute the plan to completion or abort. `on_step` observes each
    /// record as it is produced, in execution order.
    pub fn run<F: FnMut(&StepRecord)>(self, mut on_step: F) -> RunReport {
        let ctx = ActionContext {
            cancel: self.cancel.clone(),
        };
        let mut records: Vec<StepRecord> = Vec::new();

        for step in &self.steps {
            if self.cancel.is_cancelled() {
                warn!(step = %step.name, "run cancelled, aborting before step");
                let record = StepRecord {
                    step: step.name.clone(),
                    outcome: StepOutcome::Failed {
                        reason: "run cancelled".to_string(),
                    },
                    attempts: 0,
                    hint: None,
                };
                on_step(&record);
                records.push(record);
                return RunReport::aborted(records, step.name.clone());
            }

            if let Some(check) = &step.precondition {
                match check.evaluate() {
                    Ok(true) => {
                        info!(step = %step.name, "already satisfied, skipping");
                        let record = StepRecord {
                            step: step.name.clone(),
                            outcome: StepOutcome::Skipped,
                            attempts: 0,
                            hint: None,
                        };
                        on_step(&record);
                        records.push(record);
                        continue;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        // Probe failures are not step failures: assume the
                        // state does not hold and let the action decide.
                        warn!(
                            step = %step.name,
                            err = %format!("{err:#}"),
                            "precondition probe failed, treating as not satisfied"
                        );
                    }
                }
            }

            info!(step = %step.name, "running");
            let (outcome, attempts) = self.execute(step, &ctx);
            let failed = outcome.is_failure();
            let record = StepRecord {
                step: step.name.clone(),
                outcome,
                attempts,
                hint: if failed { step.hint.clone() } else { None },
            };
            on_step(&record);
            records.push(record);

            if failed && step.fatal {
                error!(step = %step.name, "fatal step failed, aborting run");
                return RunReport::aborted(records, step.name.clone());
            }
        }

        RunReport::completed(records)
    }

    /// Run one step's attempt loop. Returns the recorded outcome and the
    /// number of attempts consumed.
    fn execute(&self, step: &Step, ctx: &ActionContext) -> (StepOutcome, u32) {
        let mut attempts = 0u32;
        let mut last_failure = String::new();

        loop {
            let Some(delay) = step.retry.delay_before(attempts + 1) else {
                return (
                    StepOutcome::Failed {
                        reason: last_failure,
                    },
                    attempts,
                );
            };
            if !delay.is_zero() {
                info!(step = %step.name, delay_secs = delay.as_secs(), "backing off before retry");
                sleep_sliced(delay, &self.cancel);
                if self.cancel.is_cancelled() {
                    return (
                        StepOutcome::Failed {
                            reason: format!("run cancelled while retrying ({last_failure})"),
                        },
                        attempts,
                    );
                }
            }
            attempts += 1;

            match self.attempt(step, ctx) {
                Ok(outcome) => {
                    return (
                        StepOutcome::Succeeded {
                            warning: outcome.warning,
                        },
                        attempts,
                    );
                }
                Err(err) => {
                    let reason = format!("{err:#}");
                    if step.best_effort {
                        warn!(step = %step.name, reason = %reason, "best-effort step failed, continuing");
                        return (
                            StepOutcome::Succeeded {
                                warning: Some(reason),
                            },
                            attempts,
                        );
                    }
                    // Never retry a credential failure: repeated bad
                    // authentication risks a repository lockout.
                    if err.downcast_ref::<CredentialError>().is_some() {
                        warn!(step = %step.name, reason = %reason, "credential failure, not retrying");
                        return (StepOutcome::Failed { reason }, attempts);
                    }
                    warn!(step = %step.name, attempt = attempts, reason = %reason, "attempt failed");
                    last_failure = reason;
                }
            }
        }
    }

    /// One attempt: action, then bounded postcondition poll when declared.
    fn attempt(&self, step: &Step, ctx: &ActionContext) -> Result<ActionOutcome> {
        let outcome = step.action.apply(ctx)?;
        if let Some(post) = &step.postcondition {
            let started = Instant::now();
            match poll_until(post.check.as_ref(), &post.poll, &self.cancel) {
                Health::Healthy => Ok(outcome),
                Health::Unhealthy { last_observed } => Err(VerificationTimeout {
                    waited: started.elapsed(),
                    last_observed,
                }
                .into()),
            }
        } else {
            Ok(outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backoff::RetryPolicy;
    use crate::test_support::{ScriptedAction, ScriptedCheck};
    use crate::verify::PollConfig;
    use std::time::Duration;

    fn run(steps: Vec<Step>) -> RunReport {
        Sequencer::new(steps, CancelToken::new()).run(|_| {})
    }

    fn instant_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[test]
    fn satisfied_preconditions_skip_every_action() {
        let install = ScriptedAction::succeeding();
        let start = ScriptedAction::succeeding();
        let report = run(vec![
            Step::new("install-server", install.clone())
                .precondition(ScriptedCheck::always(true)),
            Step::new("start-service", start.clone()).precondition(ScriptedCheck::always(true)),
        ]);

        assert_eq!(report.status, crate::core::outcome::RunStatus::Completed);
        assert!(
            report
                .records
                .iter()
                .all(|r| r.outcome == StepOutcome::Skipped)
        );
        assert_eq!(install.invocations(), 0);
        assert_eq!(start.invocations(), 0);
    }

    #[test]
    fn fatal_failure_aborts_and_later_steps_never_run() {
        let later = ScriptedAction::succeeding();
        let report = run(vec![
            Step::new("check-gpu-driver", ScriptedAction::failing("no device")),
            Step::new("install-server", later.clone()),
        ]);

        assert!(report.is_aborted());
        assert_eq!(report.records.len(), 1);
        assert_eq!(
            report.records[0].outcome,
            StepOutcome::Failed {
                reason: "no device".to_string()
            }
        );
        assert_eq!(later.invocations(), 0);
    }

    #[test]
    fn non_fatal_failure_is_recorded_and_run_completes() {
        let report = run(vec![
            Step::new("optional-tuning", ScriptedAction::failing("sysctl denied")).non_fatal(),
            Step::new("install-server", ScriptedAction::succeeding()),
        ]);

        assert!(!report.is_aborted());
        assert_eq!(report.records.len(), 2);
        assert!(report.records[0].outcome.is_failure());
        assert_eq!(
            report.records[1].outcome,
            StepOutcome::Succeeded { warning: None }
        );
    }

    #[test]
    fn flaky_step_succeeds_within_retry_budget() {
        let action = ScriptedAction::flaky(2, "download interrupted");
        let report = run(vec![
            Step::new("download-model", action.clone()).retry(instant_retry(3)),
        ]);

        assert!(!report.is_aborted());
        assert_eq!(report.records[0].attempts, 3);
        assert_eq!(action.invocations(), 3);
    }

    #[test]
    fn retry_exhaustion_reports_the_last_failure() {
        let action = ScriptedAction::failing("connection reset");
        let report = run(vec![
            Step::new("download-model", action.clone()).retry(instant_retry(3)),
        ]);

        assert!(report.is_aborted());
        assert_eq!(report.records[0].attempts, 3);
        assert_eq!(action.invocations(), 3);
        assert_eq!(
            report.records[0].outcome,
            StepOutcome::Failed {
                reason: "connection reset".to_string()
            }
        );
    }

    #[test]
    fn credential_failure_is_never_retried() {
        let action = ScriptedAction::credential_failure("token rejected");
        let report = run(vec![
            Step::new("download-model", action.clone()).retry(instant_retry(5)),
        ]);

        assert!(report.is_aborted());
        assert_eq!(action.invocations(), 1);
        match &report.records[0].outcome {
            StepOutcome::Failed { reason } => assert!(reason.contains("token rejected")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn best_effort_failure_becomes_warning() {
        let report = run(vec![
            Step::new("driver-selfcheck", ScriptedAction::failing("clock drift"))
                .best_effort(),
            Step::new("install-server", ScriptedAction::succeeding()),
        ]);

        assert!(!report.is_aborted());
        match &report.records[0].outcome {
            StepOutcome::Succeeded { warning: Some(w) } => assert!(w.contains("clock drift")),
            other => panic!("expected warning, got {other:?}"),
        }
    }

    #[test]
    fn probe_error_counts_as_not_satisfied() {
        let action = ScriptedAction::succeeding();
        let report = run(vec![
            Step::new("install-server", action.clone())
                .precondition(ScriptedCheck::erroring("permission denied")),
        ]);

        assert!(!report.is_aborted());
        assert_eq!(action.invocations(), 1);
    }

    #[test]
    fn failed_step_record_carries_the_hint() {
        let report = run(vec![
            Step::new("check-gpu-driver", ScriptedAction::failing("no device"))
                .hint("install the NVIDIA driver and reboot"),
        ]);
        assert_eq!(
            report.records[0].hint.as_deref(),
            Some("install the NVIDIA driver and reboot")
        );

        let report = run(vec![
            Step::new("check-gpu-driver", ScriptedAction::succeeding())
                .hint("install the NVIDIA driver and reboot"),
        ]);
        assert_eq!(report.records[0].hint, None);
    }

    #[test]
    fn postcondition_timeout_fails_the_step() {
        let report = run(vec![
            Step::new("start-service", ScriptedAction::succeeding()).postcondition(
                ScriptedCheck::always(false),
                PollConfig::new(Duration::from_millis(5), Duration::from_millis(25)),
            ),
        ]);

        assert!(report.is_aborted());
        match &report.records[0].outcome {
            StepOutcome::Failed { reason } => {
                assert!(reason.contains("verification timed out"), "reason: {reason}");
            }
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[test]
    fn postcondition_eventually_healthy_succeeds() {
        let post = ScriptedCheck::sequence([false, false, true]);
        let report = run(vec![
            Step::new("start-service", ScriptedAction::succeeding()).postcondition(
                post.clone(),
                PollConfig::new(Duration::from_millis(2), Duration::from_millis(500)),
            ),
        ]);

        assert!(!report.is_aborted());
        assert_eq!(post.calls(), 3);
    }

    #[test]
    fn cancelled_run_aborts_before_the_next_step() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let action = ScriptedAction::succeeding();
        let report = Sequencer::new(
            vec![Step::new("install-server", action.clone())],
            cancel,
        )
        .run(|_| {});

        assert!(report.is_aborted());
        assert_eq!(action.invocations(), 0);
        assert_eq!(
            report.records[0].outcome,
            StepOutcome::Failed {
                reason: "run cancelled".to_string()
            }
        );
    }

    #[test]
    fn on_step_sees_records_in_execution_order() {
        let mut seen = Vec::new();
        Sequencer::new(
            vec![
                Step::new("a", ScriptedAction::succeeding())
                    .precondition(ScriptedCheck::always(true)),
                Step::new("b", ScriptedAction::succeeding()),
            ],
            CancelToken::new(),
        )
        .run(|record| seen.push(record.step.clone()));
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn preview_probes_without_running_actions() {
        let action = ScriptedAction::succeeding();
        let sequencer = Sequencer::new(
            vec![
                Step::new("a", action.clone()).precondition(ScriptedCheck::always(true)),
                Step::new("b", action.clone()).precondition(ScriptedCheck::always(false)),
                Step::new("c", action.clone()),
            ],
            CancelToken::new(),
        );

        let preview = sequencer.preview();
        assert_eq!(preview[0].verdict, PreviewVerdict::WouldSkip);
        assert_eq!(preview[1].verdict, PreviewVerdict::WouldRun);
        assert_eq!(preview[2].verdict, PreviewVerdict::WouldRun);
        assert_eq!(action.invocations(), 0);
    }
}
