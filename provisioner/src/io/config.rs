//! Provisioning configuration stored in `provisioner.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::backoff::RetryPolicy;
use crate::io::service::RestartPolicy;
use crate::verify::PollConfig;

/// Provisioning configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values; the model
/// identifier is the one field with no default and must come from this file
/// or `--model` (see [`ProvisionConfig::require_model`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Model repository identifier (e.g. `mistralai/Mistral-7B-Instruct-v0.3`).
    pub model: String,

    /// Listen address for the inference server.
    pub host: String,
    pub port: u16,

    /// Context-length limit passed to the server.
    pub max_model_len: u32,

    /// Device-visibility selector (`CUDA_VISIBLE_DEVICES`).
    pub gpu_devices: String,

    /// Where model weights are downloaded.
    pub data_dir: PathBuf,

    /// Where run artifacts (reports, logs) are written.
    pub state_dir: PathBuf,

    /// Where the generated service unit is installed.
    pub unit_dir: PathBuf,

    pub service: ServiceConfig,
    pub server: ServerConfig,
    pub mesh: MeshConfig,
    pub credentials: CredentialsConfig,
    pub poll: PollSettings,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Unit name (without the `.service` suffix).
    pub name: String,
    /// Log verbosity exported to the server process.
    pub log_level: String,
    pub restart: RestartPolicy,
    pub restart_delay_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "inference-server".to_string(),
            log_level: "info".to_string(),
            restart: RestartPolicy::OnFailure,
            restart_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Command whose presence on PATH means the runtime is installed.
    pub serve_command: String,
    /// How to install the runtime when it is missing.
    pub install_command: Vec<String>,
    /// Downloader prefix; the model id and target directory are appended.
    pub download_command: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            serve_command: "vllm".to_string(),
            install_command: vec![
                "python3".to_string(),
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
                "vllm".to_string(),
            ],
            download_command: vec!["huggingface-cli".to_string(), "download".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MeshConfig {
    /// Skip the mesh steps entirely when false.
    pub enabled: bool,
    /// Command whose presence on PATH means the agent is installed.
    pub agent_command: String,
    pub install_command: Vec<String>,
    pub up_command: Vec<String>,
    /// Exits zero once the agent has an established session.
    pub status_command: Vec<String>,
    /// Prints the host's private mesh IPv4, for the final report.
    pub ip_command: Vec<String>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            agent_command: "tailscale".to_string(),
            install_command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "curl -fsSL https://tailscale.com/install.sh | sh".to_string(),
            ],
            up_command: vec!["tailscale".to_string(), "up".to_string()],
            status_command: vec!["tailscale".to_string(), "status".to_string()],
            ip_command: vec!["tailscale".to_string(), "ip".to_string(), "-4".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Environment variable consulted first for the model-repo token.
    pub env_var: String,
    /// Optional token file; must be owner-accessible only.
    pub token_file: Option<PathBuf>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            env_var: "HF_TOKEN".to_string(),
            token_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollSettings {
    pub interval_secs: u64,
    pub max_wait_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            max_wait_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_secs: 2,
        }
    }
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_model_len: 8192,
            gpu_devices: "0".to_string(),
            data_dir: PathBuf::from("/var/lib/provisioner/models"),
            state_dir: PathBuf::from("/var/lib/provisioner"),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            service: ServiceConfig::default(),
            server: ServerConfig::default(),
            mesh: MeshConfig::default(),
            credentials: CredentialsConfig::default(),
            poll: PollSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl ProvisionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port must be > 0"));
        }
        if self.max_model_len == 0 {
            return Err(anyhow!("max_model_len must be > 0"));
        }
        if self.service.name.trim().is_empty() {
            return Err(anyhow!("service.name must be non-empty"));
        }
        if self.poll.interval_secs == 0 {
            return Err(anyhow!("poll.interval_secs must be > 0"));
        }
        if self.poll.max_wait_secs < self.poll.interval_secs {
            return Err(anyhow!("poll.max_wait_secs must be >= poll.interval_secs"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        for (field, argv) in [
            ("server.install_command", &self.server.install_command),
            ("server.download_command", &self.server.download_command),
            ("mesh.install_command", &self.mesh.install_command),
            ("mesh.up_command", &self.mesh.up_command),
            ("mesh.status_command", &self.mesh.status_command),
        ] {
            if argv.is_empty() || argv[0].trim().is_empty() {
                return Err(anyhow!("{field} must be a non-empty command line"));
            }
        }
        Ok(())
    }

    /// The model identifier is the single authoritative input; nothing is
    /// inferred from paths or variant spellings.
    pub fn require_model(&self) -> Result<&str> {
        let model = self.model.trim();
        if model.is_empty() {
            return Err(anyhow!(
                "no model configured: set `model` in provisioner.toml or pass --model"
            ));
        }
        Ok(model)
    }

    /// Local directory the model is downloaded into.
    pub fn model_dir(&self) -> PathBuf {
        self.data_dir.join(self.model.replace('/', "--"))
    }

    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(format!("{}.service", self.service.name))
    }

    pub fn base_url(&self) -> String {
        // A wildcard bind is probed via loopback.
        let host = if self.host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            &self.host
        };
        format!("http://{host}:{}", self.port)
    }

    pub fn models_url(&self) -> String {
        format!("{}/v1/models", self.base_url())
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_secs(self.poll.interval_secs),
            Duration::from_secs(self.poll.max_wait_secs),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_secs(self.retry.initial_delay_secs),
        )
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ProvisionConfig::default()`.
pub fn load_config(path: &Path) -> Result<ProvisionConfig> {
    if !path.exists() {
        let cfg = ProvisionConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ProvisionConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ProvisionConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
