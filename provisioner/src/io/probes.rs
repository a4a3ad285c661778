//! Read-only host state probes used as step pre- and postconditions.
//!
//! Every probe answers "does the desired end-state already hold?" without
//! mutating anything. An absent resource (missing file, uninstalled tool,
//! unknown service) reads as `false`, never as an error, so a fresh host
//! simply runs every step.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use tracing::debug;

use crate::io::process::{command_from_argv, run_with_timeout};
use crate::plan::Check;

/// Upper bound for any single probe command; probes must stay cheap.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_OUTPUT_LIMIT: usize = 64 * 1024;

/// True when `name` resolves to an executable file on `PATH`.
#[derive(Debug, Clone)]
pub struct CommandOnPath {
    pub name: String,
}

impl CommandOnPath {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Check for CommandOnPath {
    fn evaluate(&self) -> Result<bool> {
        let path = std::env::var_os("PATH").unwrap_or_default();
        Ok(find_on_path(&self.name, &path).is_some())
    }
}

fn find_on_path(name: &str, path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// True when the file exists.
#[derive(Debug, Clone)]
pub struct FileExists {
    pub path: PathBuf,
}

impl FileExists {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Check for FileExists {
    fn evaluate(&self) -> Result<bool> {
        Ok(self.path.exists())
    }
}

/// True when the directory exists and contains at least one entry.
///
/// Used for "model already downloaded": partial downloads are re-run by the
/// downloader itself, which resumes idempotently.
#[derive(Debug, Clone)]
pub struct DirPopulated {
    pub path: PathBuf,
}

impl DirPopulated {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Check for DirPopulated {
    fn evaluate(&self) -> Result<bool> {
        let mut entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        Ok(entries.next().is_some())
    }
}

/// True when the file exists with exactly the expected contents.
///
/// Lets the unit-install step skip itself once the rendered descriptor is
/// already on disk.
#[derive(Debug, Clone)]
pub struct FileMatches {
    pub path: PathBuf,
    pub expected: String,
}

impl FileMatches {
    pub fn new(path: impl Into<PathBuf>, expected: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            expected: expected.into(),
        }
    }
}

impl Check for FileMatches {
    fn evaluate(&self) -> Result<bool> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents == self.expected),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// True when the given command exits zero.
///
/// A missing program reads as `false` (the tool the probe would ask is not
/// installed, so the probed state cannot hold).
#[derive(Debug, Clone)]
pub struct CommandSucceeds {
    pub argv: Vec<String>,
}

impl CommandSucceeds {
    pub fn new<S: Into<String>>(argv: impl IntoIterator<Item = S>) -> Self {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }
}

impl Check for CommandSucceeds {
    fn evaluate(&self) -> Result<bool> {
        probe_command(&self.argv).map(|out| out.is_some_and(|o| o.success))
    }
}

/// True when the systemd unit reports active.
#[derive(Debug, Clone)]
pub struct ServiceActive {
    pub unit: String,
}

impl ServiceActive {
    pub fn new(unit: impl Into<String>) -> Self {
        Self { unit: unit.into() }
    }
}

impl Check for ServiceActive {
    fn evaluate(&self) -> Result<bool> {
        let argv = vec![
            "systemctl".to_string(),
            "is-active".to_string(),
            "--quiet".to_string(),
            self.unit.clone(),
        ];
        probe_command(&argv).map(|out| out.is_some_and(|o| o.success))
    }
}

/// True when the kernel module is loaded (per `/proc/modules`).
#[derive(Debug, Clone)]
pub struct KernelModuleLoaded {
    pub module: String,
}

impl KernelModuleLoaded {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
        }
    }
}

impl Check for KernelModuleLoaded {
    fn evaluate(&self) -> Result<bool> {
        match fs::read_to_string("/proc/modules") {
            Ok(contents) => Ok(modules_contain(&contents, &self.module)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

fn modules_contain(proc_modules: &str, module: &str) -> bool {
    proc_modules
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|name| name == module)
}

/// True when `nvidia-smi -L` enumerates at least one GPU.
#[derive(Debug, Clone, Default)]
pub struct GpuVisible;

impl Check for GpuVisible {
    fn evaluate(&self) -> Result<bool> {
        let argv = vec!["nvidia-smi".to_string(), "-L".to_string()];
        let Some(out) = probe_command(&argv)? else {
            return Ok(false);
        };
        Ok(out.success && gpu_listed(&out.stdout))
    }
}

fn gpu_listed(stdout: &str) -> bool {
    use std::sync::LazyLock;
    // `nvidia-smi -L` prints one "GPU <index>: <name> (UUID: ...)" per device.
    static DEVICE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^GPU \d+:").expect("device regex"));
    DEVICE_RE.is_match(stdout)
}

/// True when an HTTP GET of `url` succeeds (2xx within the probe timeout).
#[derive(Debug, Clone)]
pub struct HttpReachable {
    pub url: String,
}

impl HttpReachable {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Check for HttpReachable {
    fn evaluate(&self) -> Result<bool> {
        let argv = vec![
            "curl".to_string(),
            "-fsS".to_string(),
            "--max-time".to_string(),
            PROBE_TIMEOUT.as_secs().to_string(),
            "-o".to_string(),
            "/dev/null".to_string(),
            self.url.clone(),
        ];
        probe_command(&argv).map(|out| out.is_some_and(|o| o.success))
    }
}

struct ProbeOutput {
    success: bool,
    stdout: String,
}

/// Run a probe command. `Ok(None)` means the program itself is not
/// installed, which callers fold into "not satisfied".
fn probe_command(argv: &[String]) -> Result<Option<ProbeOutput>> {
    let cmd = command_from_argv(argv)?;
    match run_with_timeout(cmd, PROBE_TIMEOUT, PROBE_OUTPUT_LIMIT) {
        Ok(out) => Ok(Some(ProbeOutput {
            success: out.success(),
            stdout: out.stdout,
        })),
        Err(err) => {
            let not_found = err
                .downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound);
            if not_found {
                debug!(program = %argv[0], "probe tool not installed");
                return Ok(None);
            }
            Err(err)
        }
    }
}
