//! Bounded readiness polling.
//!
//! Service start and model download finish asynchronously relative to the
//! command that triggered them, so steps that gate later work poll a
//! postcondition here instead of hardcoding sleeps. The wait is strict: once
//! the deadline passes the verifier reports unhealthy even if one more poll
//! would have succeeded.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::plan::Check;

/// Sleep slice granularity; keeps cancellation prompt during long intervals.
const SLICE: Duration = Duration::from_millis(50);

/// How often to re-check and how long to keep trying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl PollConfig {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }
}

/// Verdict of a bounded poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// The deadline elapsed (or the run was cancelled) before the condition
    /// held; carries the last observed diagnostic.
    Unhealthy { last_observed: String },
}

/// Typed error recorded when a postcondition never became true in time.
///
/// Surfaced via `downcast_ref` so callers can distinguish a verification
/// timeout from an action failure.
#[derive(Debug, Clone)]
pub struct VerificationTimeout {
    pub waited: Duration,
    pub last_observed: String,
}

impl std::fmt::Display for VerificationTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "verification timed out after {}s (last observed: {})",
            self.waited.as_secs(),
            self.last_observed
        )
    }
}

impl std::error::Error for VerificationTimeout {}

/// Poll `check` every `interval` until it holds, the deadline elapses, or
/// the run is cancelled.
///
/// Probe errors do not end the poll; they become the last observed state, so
/// a transiently unreachable endpoint reads as "not ready yet".
pub fn poll_until(check: &dyn Check, config: &PollConfig, cancel: &CancelToken) -> Health {
    let started = Instant::now();
    let deadline = started + config.max_wait;
    let mut last_observed = String::from("not yet probed");
    let mut polls = 0u32;

    loop {
        if cancel.is_cancelled() {
            debug!(polls, "poll cancelled");
            return Health::Unhealthy {
                last_observed: format!("cancelled while waiting ({last_observed})"),
            };
        }
        if Instant::now() >= deadline {
            warn!(polls, waited_secs = started.elapsed().as_secs(), "poll deadline elapsed");
            return Health::Unhealthy { last_observed };
        }

        polls += 1;
        match check.evaluate() {
            Ok(true) => {
                debug!(polls, waited_secs = started.elapsed().as_secs(), "condition reached");
                return Health::Healthy;
            }
            Ok(false) => {
                last_observed = "condition not yet true".to_string();
            }
            Err(err) => {
                last_observed = format!("probe error: {err:#}");
            }
        }

        // Strict deadline: never sleep past it hoping for one more poll.
        if Instant::now() + config.interval >= deadline {
            warn!(polls, waited_secs = started.elapsed().as_secs(), "poll deadline elapsed");
            return Health::Unhealthy { last_observed };
        }
        sleep_sliced(config.interval, cancel);
    }
}

/// Sleep for `total`, waking early when cancelled.
pub(crate) fn sleep_sliced(total: Duration, cancel: &CancelToken) {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline && !cancel.is_cancelled() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(remaining.min(SLICE));
    }
}
