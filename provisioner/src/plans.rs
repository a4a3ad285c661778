//! The built-in plan: provision a GPU inference host.
//!
//! Driver check, serving runtime install, model download, service unit
//! install, service start, endpoint verification, then the mesh agent and
//! network join. Every step carries a precondition probe so a re-run over an
//! already-provisioned host skips straight through.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::core::outcome::RunStatus;
use crate::io::config::ProvisionConfig;
use crate::io::credentials::{CredentialError, TokenSource, with_repo_token};
use crate::io::probes::{
    CommandOnPath, CommandSucceeds, DirPopulated, FileMatches, GpuVisible, HttpReachable,
    ServiceActive,
};
use crate::io::process::{command_from_argv, run_with_timeout};
use crate::io::service::{ServiceDescriptor, install_unit, render_unit};
use crate::plan::{Action, ActionContext, ActionOutcome, Check, Step};
use crate::report::Endpoint;
use crate::verify::{Health, PollConfig, VerificationTimeout, poll_until};

const ACTION_OUTPUT_LIMIT: usize = 256 * 1024;
const QUICK_TIMEOUT: Duration = Duration::from_secs(60);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Action that runs one command line and fails on non-zero exit.
pub struct CommandAction {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandAction {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }
}

impl Action for CommandAction {
    fn apply(&self, _ctx: &ActionContext) -> Result<ActionOutcome> {
        let cmd = command_from_argv(&self.argv)?;
        let out = run_with_timeout(cmd, self.timeout, ACTION_OUTPUT_LIMIT)?;
        if out.success() {
            return Ok(ActionOutcome::clean());
        }
        Err(anyhow!("`{}` failed: {}", self.argv.join(" "), out.diagnostic()))
    }
}

/// Action that waits for a readiness check, for steps whose only job is
/// verification (the triggering work happened in an earlier step).
pub struct AwaitReady {
    check: Box<dyn Check>,
    poll: PollConfig,
}

impl AwaitReady {
    pub fn new(check: impl Check + 'static, poll: PollConfig) -> Self {
        Self {
            check: Box::new(check),
            poll,
        }
    }
}

impl Action for AwaitReady {
    fn apply(&self, ctx: &ActionContext) -> Result<ActionOutcome> {
        let started = Instant::now();
        match poll_until(self.check.as_ref(), &self.poll, &ctx.cancel) {
            Health::Healthy => Ok(ActionOutcome::clean()),
            Health::Unhealthy { last_observed } => Err(VerificationTimeout {
                waited: started.elapsed(),
                last_observed,
            }
            .into()),
        }
    }
}

/// Download the model with the repository token scoped to the child process.
struct DownloadModel {
    argv: Vec<String>,
    token_source: TokenSource,
    token_env_var: String,
}

impl Action for DownloadModel {
    fn apply(&self, _ctx: &ActionContext) -> Result<ActionOutcome> {
        with_repo_token(&self.token_source, |token| {
            let mut cmd = command_from_argv(&self.argv)?;
            if let Some(token) = token {
                // The only place the secret leaves this process.
                cmd.env(&self.token_env_var, token.expose());
            }
            let out = run_with_timeout(cmd, DOWNLOAD_TIMEOUT, ACTION_OUTPUT_LIMIT)?;
            if out.success() {
                return Ok(ActionOutcome::clean());
            }
            let diagnostic = out.diagnostic();
            if looks_like_auth_failure(&diagnostic) {
                return Err(CredentialError::new(format!(
                    "model repository rejected the download: {diagnostic}"
                ))
                .into());
            }
            Err(anyhow!("model download failed: {diagnostic}"))
        })
    }
}

fn looks_like_auth_failure(diagnostic: &str) -> bool {
    let lower = diagnostic.to_lowercase();
    ["401", "403", "unauthorized", "forbidden", "invalid token", "gated repo"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Install the rendered unit file, then reload the process manager.
struct InstallServiceUnit {
    path: PathBuf,
    contents: String,
    reload: Vec<String>,
}

impl Action for InstallServiceUnit {
    fn apply(&self, _ctx: &ActionContext) -> Result<ActionOutcome> {
        install_unit(&self.path, &self.contents)?;
        let out = run_with_timeout(
            command_from_argv(&self.reload)?,
            QUICK_TIMEOUT,
            ACTION_OUTPUT_LIMIT,
        )?;
        if out.success() {
            return Ok(ActionOutcome::clean());
        }
        Err(anyhow!("`{}` failed: {}", self.reload.join(" "), out.diagnostic()))
    }
}

/// Service descriptor for the inference server derived from config.
pub fn server_descriptor(cfg: &ProvisionConfig) -> ServiceDescriptor {
    let model_dir = cfg.model_dir();
    let mut environment = BTreeMap::new();
    environment.insert("MODEL_PATH".to_string(), model_dir.display().to_string());
    environment.insert("HOST".to_string(), cfg.host.clone());
    environment.insert("PORT".to_string(), cfg.port.to_string());
    environment.insert("MAX_MODEL_LEN".to_string(), cfg.max_model_len.to_string());
    environment.insert("CUDA_VISIBLE_DEVICES".to_string(), cfg.gpu_devices.clone());
    environment.insert("LOG_LEVEL".to_string(), cfg.service.log_level.clone());

    ServiceDescriptor {
        name: cfg.service.name.clone(),
        description: format!("Inference server ({})", cfg.model),
        exec_start: vec![
            cfg.server.serve_command.clone(),
            "serve".to_string(),
            model_dir.display().to_string(),
            "--host".to_string(),
            cfg.host.clone(),
            "--port".to_string(),
            cfg.port.to_string(),
            "--max-model-len".to_string(),
            cfg.max_model_len.to_string(),
        ],
        working_dir: Some(cfg.data_dir.clone()),
        environment,
        restart: cfg.service.restart,
        restart_delay: Duration::from_secs(cfg.service.restart_delay_secs),
    }
}

/// Build the static plan for this host from config.
pub fn build_plan(cfg: &ProvisionConfig) -> Result<Vec<Step>> {
    let model = cfg.require_model()?.to_string();
    let unit_path = cfg.unit_path();
    let unit_contents = render_unit(&server_descriptor(cfg))?;
    let poll = cfg.poll_config();
    let retry = cfg.retry_policy();

    let mut download_argv = cfg.server.download_command.clone();
    download_argv.push(model.clone());
    download_argv.push("--local-dir".to_string());
    download_argv.push(cfg.model_dir().display().to_string());

    let mut steps = vec![
        Step::new(
            "check-gpu-driver",
            CommandAction::new(vec!["nvidia-smi".to_string()], QUICK_TIMEOUT),
        )
        .precondition(GpuVisible)
        .hint("install the NVIDIA driver (and reboot if it was just installed)"),
        Step::new(
            "install-server",
            CommandAction::new(cfg.server.install_command.clone(), INSTALL_TIMEOUT),
        )
        .precondition(CommandOnPath::new(&cfg.server.serve_command))
        .retry(retry.clone()),
        Step::new(
            "download-model",
            DownloadModel {
                argv: download_argv,
                token_source: TokenSource {
                    env_var: cfg.credentials.env_var.clone(),
                    token_file: cfg.credentials.token_file.clone(),
                },
                token_env_var: cfg.credentials.env_var.clone(),
            },
        )
        .precondition(DirPopulated::new(cfg.model_dir()))
        .retry(retry.clone())
        .hint("for gated models, export the repository token or configure credentials.token_file"),
        Step::new(
            "write-service-unit",
            InstallServiceUnit {
                path: unit_path.clone(),
                contents: unit_contents.clone(),
                reload: vec!["systemctl".to_string(), "daemon-reload".to_string()],
            },
        )
        .precondition(FileMatches::new(unit_path, unit_contents)),
        Step::new(
            "start-inference-service",
            CommandAction::new(
                vec![
                    "systemctl".to_string(),
                    "enable".to_string(),
                    "--now".to_string(),
                    format!("{}.service", cfg.service.name),
                ],
                QUICK_TIMEOUT,
            ),
        )
        .precondition(ServiceActive::new(&cfg.service.name))
        .postcondition(ServiceActive::new(&cfg.service.name), poll.clone())
        .retry(retry.clone())
        .hint("see `journalctl -u <service>` for server logs"),
        Step::new(
            "verify-endpoint",
            AwaitReady::new(HttpReachable::new(cfg.models_url()), poll.clone()),
        )
        .hint("the server may still be loading model weights; check service logs"),
    ];

    if cfg.mesh.enabled {
        steps.push(
            Step::new(
                "install-mesh-agent",
                CommandAction::new(cfg.mesh.install_command.clone(), INSTALL_TIMEOUT),
            )
            .precondition(CommandOnPath::new(&cfg.mesh.agent_command))
            .retry(retry.clone()),
        );
        steps.push(
            Step::new(
                "join-mesh-network",
                CommandAction::new(cfg.mesh.up_command.clone(), INSTALL_TIMEOUT),
            )
            .precondition(CommandSucceeds::new(cfg.mesh.status_command.clone()))
            .postcondition(CommandSucceeds::new(cfg.mesh.status_command.clone()), poll)
            .hint("the mesh agent may need interactive authentication; run its `up` command manually"),
        );
    }

    Ok(steps)
}

/// Discover where the provisioned service is reachable, for the summary.
///
/// Best-effort: a missing mesh agent simply yields no mesh endpoint.
pub fn discover_endpoints(cfg: &ProvisionConfig, status: &RunStatus) -> Vec<Endpoint> {
    if matches!(status, RunStatus::Aborted { .. }) {
        return Vec::new();
    }

    let mut endpoints = vec![Endpoint::new("local", format!("{}/v1", cfg.base_url()))];
    if cfg.mesh.enabled
        && let Some(ip) = mesh_ip(cfg)
    {
        endpoints.push(Endpoint::new("mesh", format!("http://{ip}:{}/v1", cfg.port)));
    }
    endpoints
}

fn mesh_ip(cfg: &ProvisionConfig) -> Option<String> {
    let cmd = command_from_argv(&cfg.mesh.ip_command).ok()?;
    let out = run_with_timeout(cmd, QUICK_TIMEOUT, ACTION_OUTPUT_LIMIT).ok()?;
    if !out.success() {
        debug!("mesh ip query failed, omitting mesh endpoint");
        return None;
    }
    let ip = out.stdout.lines().next()?.trim();
    if ip.is_empty() {
        return None;
    }
    Some(ip.to_string())
}
