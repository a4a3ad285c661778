//! Scoped acquisition of the model-repository token.
//!
//! The token is read on demand, held only for the duration of the closure
//! passed to [`with_repo_token`], and handed to exactly one child-process
//! environment. It is never logged, never written to the unit file or run
//! artifacts, and its `Debug`/`Display` output is redacted.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// A credential whose value never appears in formatted output.
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value. Callers must pass this only to child-process
    /// environments, never to logs or persisted files.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("****")
    }
}

/// Authentication against the model repository failed or cannot proceed.
///
/// Surfaced via `downcast_ref` in the sequencer, which never retries these:
/// hammering a repository with a bad token risks a lockout.
#[derive(Debug, Clone)]
pub struct CredentialError {
    pub reason: String,
}

impl CredentialError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "credential error: {}", self.reason)
    }
}

impl std::error::Error for CredentialError {}

/// Where to look for the token.
#[derive(Debug, Clone)]
pub struct TokenSource {
    /// Environment variable consulted first.
    pub env_var: String,
    /// Fallback file; must be owner-accessible only.
    pub token_file: Option<PathBuf>,
}

/// Acquire the token, run `f`, and drop the token before returning.
///
/// `None` is passed through when no token is configured anywhere; public
/// models need none.
pub fn with_repo_token<T>(
    source: &TokenSource,
    f: impl FnOnce(Option<&Secret>) -> Result<T>,
) -> Result<T> {
    let token = acquire_token(source)?;
    f(token.as_ref())
}

fn acquire_token(source: &TokenSource) -> Result<Option<Secret>> {
    if let Ok(value) = std::env::var(&source.env_var) {
        let value = value.trim();
        if !value.is_empty() {
            debug!(source = "env", "repository token acquired");
            return Ok(Some(Secret::new(value)));
        }
    }

    let Some(path) = &source.token_file else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }

    check_file_private(path)?;
    let contents =
        fs::read_to_string(path).with_context(|| format!("read token file {}", path.display()))?;
    let token = contents.trim();
    if token.is_empty() {
        return Err(CredentialError::new(format!(
            "token file {} is empty",
            path.display()
        ))
        .into());
    }
    debug!(source = "file", "repository token acquired");
    Ok(Some(Secret::new(token)))
}

#[cfg(unix)]
fn check_file_private(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata =
        fs::metadata(path).with_context(|| format!("stat token file {}", path.display()))?;
    let mode = metadata.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(CredentialError::new(format!(
            "token file {} is group/world accessible (mode {mode:o}); chmod 600 it",
            path.display()
        ))
        .into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_file_private(_path: &Path) -> Result<()> {
    Ok(())
}
