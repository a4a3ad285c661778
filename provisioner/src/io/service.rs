//! Service descriptor and systemd unit generation.
//!
//! The descriptor states how the managed process is launched and supervised;
//! rendering is deterministic (environment in sorted order) so the installed
//! unit can be compared byte-for-byte as an idempotence precondition.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};

const UNIT_TEMPLATE: &str = include_str!("templates/unit.service");

/// Process-manager restart policy for the managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Always,
    OnFailure,
}

impl RestartPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on-failure",
        }
    }
}

/// How a long-running process should be launched and supervised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Unit name without the `.service` suffix.
    pub name: String,
    pub description: String,
    pub exec_start: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Sorted map so rendering is deterministic. Never holds credentials.
    pub environment: BTreeMap<String, String>,
    pub restart: RestartPolicy,
    pub restart_delay: Duration,
}

#[derive(Serialize)]
struct EnvEntry {
    name: String,
    value: String,
}

/// Render the descriptor as a systemd unit file.
pub fn render_unit(descriptor: &ServiceDescriptor) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("unit", UNIT_TEMPLATE)
        .expect("unit template should be valid");
    let template = env.get_template("unit")?;

    let environment: Vec<EnvEntry> = descriptor
        .environment
        .iter()
        .map(|(name, value)| EnvEntry {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    let exec_start = descriptor
        .exec_start
        .iter()
        .map(|arg| quote_unit_arg(arg))
        .collect::<Vec<_>>()
        .join(" ");

    let mut rendered = template.render(context! {
        description => descriptor.description,
        exec_start => exec_start,
        working_dir => descriptor.working_dir.as_ref().map(|p| p.display().to_string()),
        environment => environment,
        restart => descriptor.restart.as_str(),
        restart_delay_secs => descriptor.restart_delay.as_secs(),
    })?;
    if !rendered.ends_with('\n') {
        rendered.push('\n');
    }
    Ok(rendered)
}

/// Quote an ExecStart argument per systemd's quoting rules (double quotes
/// around anything with whitespace, inner quotes and backslashes escaped).
fn quote_unit_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '"') {
        return arg.to_string();
    }
    let escaped = arg.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Atomically install a rendered unit file (temp file + rename).
pub fn install_unit(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("unit path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("service.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp unit {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("install unit {}", path.display()))?;
    Ok(())
}
