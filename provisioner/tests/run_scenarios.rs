//! End-to-end sequencing scenarios for a representative four-step plan:
//! check the driver, install a package, start a service, verify its endpoint.

use std::time::Duration;

use provisioner::cancel::CancelToken;
use provisioner::core::outcome::{RunStatus, StepOutcome};
use provisioner::plan::Step;
use provisioner::sequencer::Sequencer;
use provisioner::test_support::{ScriptedAction, ScriptedCheck};
use provisioner::verify::PollConfig;

fn fast_poll() -> PollConfig {
    PollConfig::new(Duration::from_millis(5), Duration::from_millis(30))
}

#[test]
fn fatal_first_step_aborts_before_anything_else_runs() {
    let install = ScriptedAction::succeeding();
    let start = ScriptedAction::succeeding();

    let steps = vec![
        Step::new("check-driver", ScriptedAction::failing("no NVIDIA driver"))
            .precondition(ScriptedCheck::always(false))
            .hint("install the driver and reboot"),
        Step::new("install-package", install.clone()),
        Step::new("start-service", start.clone()),
        Step::new("verify-endpoint", ScriptedAction::succeeding()),
    ];

    let report = Sequencer::new(steps, CancelToken::new()).run(|_| {});

    assert_eq!(
        report.status,
        RunStatus::Aborted {
            step: "check-driver".to_string()
        }
    );
    assert_eq!(report.records.len(), 1);
    assert!(report.records[0].outcome.is_failure());
    assert_eq!(
        report.records[0].hint.as_deref(),
        Some("install the driver and reboot")
    );
    assert_eq!(install.invocations(), 0);
    assert_eq!(start.invocations(), 0);
}

#[test]
fn satisfied_preconditions_skip_and_the_rest_proceeds() {
    let install = ScriptedAction::succeeding();

    let steps = vec![
        Step::new("check-driver", ScriptedAction::failing("should not run"))
            .precondition(ScriptedCheck::always(true)),
        Step::new("install-package", install.clone())
            .precondition(ScriptedCheck::always(false)),
        Step::new("start-service", ScriptedAction::succeeding()),
        Step::new("verify-endpoint", ScriptedAction::succeeding()),
    ];

    let report = Sequencer::new(steps, CancelToken::new()).run(|_| {});

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.records[0].outcome, StepOutcome::Skipped);
    assert_eq!(install.invocations(), 1);
    assert!(matches!(
        report.records[1].outcome,
        StepOutcome::Succeeded { .. }
    ));
    assert_eq!(report.executed(), 3);
}

#[test]
fn endpoint_that_never_becomes_healthy_aborts_with_timeout() {
    let probe = ScriptedCheck::always(false);

    let steps = vec![
        Step::new("check-driver", ScriptedAction::succeeding()),
        Step::new("install-package", ScriptedAction::succeeding()),
        Step::new("start-service", ScriptedAction::succeeding()),
        Step::new("verify-endpoint", ScriptedAction::succeeding())
            .postcondition(probe.clone(), fast_poll())
            .hint("check the service journal"),
    ];

    let report = Sequencer::new(steps, CancelToken::new()).run(|_| {});

    assert_eq!(
        report.status,
        RunStatus::Aborted {
            step: "verify-endpoint".to_string()
        }
    );
    assert!(probe.calls() >= 1);
    let last = report.records.last().unwrap();
    match &last.outcome {
        StepOutcome::Failed { reason } => {
            assert!(reason.contains("verification timed out"), "reason: {reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn endpoint_that_becomes_healthy_on_a_later_poll_completes() {
    let probe = ScriptedCheck::sequence([false, false, true]);

    let steps = vec![
        Step::new("start-service", ScriptedAction::succeeding()),
        Step::new("verify-endpoint", ScriptedAction::succeeding()).postcondition(
            probe.clone(),
            PollConfig::new(Duration::from_millis(2), Duration::from_millis(200)),
        ),
    ];

    let report = Sequencer::new(steps, CancelToken::new()).run(|_| {});

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(probe.calls(), 3);
}

#[test]
fn flaky_install_retries_and_the_run_still_completes() {
    use provisioner::core::backoff::RetryPolicy;

    let install = ScriptedAction::flaky(2, "mirror unreachable");

    let steps = vec![
        Step::new("check-driver", ScriptedAction::succeeding()),
        Step::new("install-package", install.clone())
            .retry(RetryPolicy::new(3, Duration::from_millis(1))),
        Step::new("start-service", ScriptedAction::succeeding()),
    ];

    let report = Sequencer::new(steps, CancelToken::new()).run(|_| {});

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(install.invocations(), 3);
    assert_eq!(report.records[1].attempts, 3);
}

#[test]
fn progress_callback_sees_every_record_in_order() {
    let steps = vec![
        Step::new("check-driver", ScriptedAction::succeeding())
            .precondition(ScriptedCheck::always(true)),
        Step::new("install-package", ScriptedAction::succeeding()),
        Step::new("start-service", ScriptedAction::succeeding()),
    ];

    let mut seen = Vec::new();
    let report = Sequencer::new(steps, CancelToken::new()).run(|record| {
        seen.push(record.step.clone());
    });

    assert_eq!(seen, ["check-driver", "install-package", "start-service"]);
    assert_eq!(report.records.len(), 3);
}
