//! Test-only scripted checks and actions for driving the sequencer without
//! touching the host.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::io::credentials::CredentialError;
use crate::plan::{Action, ActionContext, ActionOutcome, Check};

#[derive(Debug, Clone)]
enum CheckScript {
    Value(bool),
    ProbeError(String),
}

/// A [`Check`] returning a scripted sequence of results.
///
/// Clones share state, so tests can keep a handle for assertions while the
/// step owns the boxed copy. The last scripted result repeats once the
/// script is exhausted.
#[derive(Debug, Clone)]
pub struct ScriptedCheck {
    inner: Rc<RefCell<CheckState>>,
}

#[derive(Debug)]
struct CheckState {
    script: VecDeque<CheckScript>,
    last: CheckScript,
    calls: u32,
}

impl ScriptedCheck {
    pub fn always(value: bool) -> Self {
        Self::from_script(Vec::new(), CheckScript::Value(value))
    }

    /// Yield the given values in order, repeating the final one.
    pub fn sequence(values: impl IntoIterator<Item = bool>) -> Self {
        let mut script: Vec<CheckScript> = values.into_iter().map(CheckScript::Value).collect();
        let last = script.pop().unwrap_or(CheckScript::Value(false));
        Self::from_script(script, last)
    }

    /// Every evaluation fails (probe itself broken).
    pub fn erroring(message: &str) -> Self {
        Self::from_script(Vec::new(), CheckScript::ProbeError(message.to_string()))
    }

    pub fn calls(&self) -> u32 {
        self.inner.borrow().calls
    }

    fn from_script(script: Vec<CheckScript>, last: CheckScript) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CheckState {
                script: script.into(),
                last,
                calls: 0,
            })),
        }
    }
}

impl Check for ScriptedCheck {
    fn evaluate(&self) -> Result<bool> {
        let mut state = self.inner.borrow_mut();
        state.calls += 1;
        let next = state.script.pop_front().unwrap_or_else(|| state.last.clone());
        match next {
            CheckScript::Value(value) => Ok(value),
            CheckScript::ProbeError(message) => Err(anyhow!(message)),
        }
    }
}

#[derive(Debug, Clone)]
enum ActionScript {
    Succeed(Option<String>),
    Fail(String),
    CredentialFailure(String),
}

/// An [`Action`] returning a scripted sequence of results; clones share
/// state for post-run assertions.
#[derive(Debug, Clone)]
pub struct ScriptedAction {
    inner: Rc<RefCell<ActionState>>,
}

#[derive(Debug)]
struct ActionState {
    script: VecDeque<ActionScript>,
    last: ActionScript,
    invocations: u32,
}

impl ScriptedAction {
    pub fn succeeding() -> Self {
        Self::from_script(Vec::new(), ActionScript::Succeed(None))
    }

    pub fn warning(message: &str) -> Self {
        Self::from_script(Vec::new(), ActionScript::Succeed(Some(message.to_string())))
    }

    pub fn failing(message: &str) -> Self {
        Self::from_script(Vec::new(), ActionScript::Fail(message.to_string()))
    }

    /// Fail `failures` times, then succeed.
    pub fn flaky(failures: u32, message: &str) -> Self {
        let script = (0..failures)
            .map(|_| ActionScript::Fail(message.to_string()))
            .collect();
        Self::from_script(script, ActionScript::Succeed(None))
    }

    /// Fail with a typed [`CredentialError`], which the sequencer must not
    /// retry.
    pub fn credential_failure(reason: &str) -> Self {
        Self::from_script(
            Vec::new(),
            ActionScript::CredentialFailure(reason.to_string()),
        )
    }

    pub fn invocations(&self) -> u32 {
        self.inner.borrow().invocations
    }

    fn from_script(script: Vec<ActionScript>, last: ActionScript) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ActionState {
                script: script.into(),
                last,
                invocations: 0,
            })),
        }
    }
}

impl Action for ScriptedAction {
    fn apply(&self, _ctx: &ActionContext) -> Result<ActionOutcome> {
        let mut state = self.inner.borrow_mut();
        state.invocations += 1;
        let next = state.script.pop_front().unwrap_or_else(|| state.last.clone());
        match next {
            ActionScript::Succeed(None) => Ok(ActionOutcome::clean()),
            ActionScript::Succeed(Some(warning)) => Ok(ActionOutcome::with_warning(warning)),
            ActionScript::Fail(message) => Err(anyhow!(message)),
            ActionScript::CredentialFailure(reason) => Err(CredentialError::new(reason).into()),
        }
    }
}
