//! Step definitions: the contract between a provisioning plan and the
//! sequencer that executes it.
//!
//! A [`Step`] bundles a named action with an optional precondition probe, an
//! optional polled postcondition, and its failure classification (fatal,
//! best-effort, retryable). Plans are static: built once, executed in order.

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::core::backoff::RetryPolicy;
use crate::verify::PollConfig;

/// Read-only probe of observable host state.
///
/// Implementations must not mutate anything and must treat an entirely
/// absent resource as `Ok(false)`, not an error. A returned error means the
/// probe itself could not run (e.g. permission denied); the sequencer logs
/// it and proceeds as if the condition did not hold.
pub trait Check {
    fn evaluate(&self) -> Result<bool>;
}

impl<F> Check for F
where
    F: Fn() -> Result<bool>,
{
    fn evaluate(&self) -> Result<bool> {
        self()
    }
}

/// Context handed to every action invocation.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Checked by long-running actions (e.g. readiness waits) so an aborting
    /// run stops promptly.
    pub cancel: CancelToken,
}

/// Result of a successful action invocation.
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    /// Non-fatal diagnostic surfaced in the final report.
    pub warning: Option<String>,
}

impl ActionOutcome {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn with_warning(warning: impl Into<String>) -> Self {
        Self {
            warning: Some(warning.into()),
        }
    }
}

/// A side-effecting provisioning action.
///
/// Actions are explicitly not sandboxed or reversible; a failure mid-action
/// may leave partial state behind. Idempotent re-runs (precondition skips)
/// are the recovery mechanism, not rollback.
pub trait Action {
    fn apply(&self, ctx: &ActionContext) -> Result<ActionOutcome>;
}

impl<F> Action for F
where
    F: Fn(&ActionContext) -> Result<ActionOutcome>,
{
    fn apply(&self, ctx: &ActionContext) -> Result<ActionOutcome> {
        self(ctx)
    }
}

/// Post-action readiness check, polled with a bounded wait.
pub struct Postcondition {
    pub check: Box<dyn Check>,
    pub poll: PollConfig,
}

/// One unit of provisioning work.
pub struct Step {
    pub name: String,
    /// Abort the whole run if this step fails. Defaults to true; most
    /// provisioning steps gate everything after them.
    pub fatal: bool,
    /// Treat a failed action as succeeded-with-warning.
    pub best_effort: bool,
    pub retry: RetryPolicy,
    /// Shown to the operator when the step fails (e.g. "reboot required").
    pub hint: Option<String>,
    pub precondition: Option<Box<dyn Check>>,
    pub action: Box<dyn Action>,
    pub postcondition: Option<Postcondition>,
}

impl Step {
    pub fn new(name: impl Into<String>, action: impl Action + 'static) -> Self {
        Self {
            name: name.into(),
            fatal: true,
            best_effort: false,
            retry: RetryPolicy::none(),
            hint: None,
            precondition: None,
            action: Box::new(action),
            postcondition: None,
        }
    }

    pub fn precondition(mut self, check: impl Check + 'static) -> Self {
        self.precondition = Some(Box::new(check));
        self
    }

    pub fn postcondition(mut self, check: impl Check + 'static, poll: PollConfig) -> Self {
        self.postcondition = Some(Postcondition {
            check: Box::new(check),
            poll,
        });
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn non_fatal(mut self) -> Self {
        self.fatal = false;
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("fatal", &self.fatal)
            .field("best_effort", &self.best_effort)
            .field("retry", &self.retry)
            .field("has_precondition", &self.precondition.is_some())
            .field("has_postcondition", &self.postcondition.is_some())
            .finish()
    }
}
