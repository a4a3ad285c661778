//! CLI for the idempotent host provisioner.
//!
//! `plan` prints the resolved step list without touching the host; `run`
//! acquires the host lock and executes it (or previews it with `--dry-run`).
//! Exit codes are stable: 0 completed, 1 invalid setup, 2 aborted mid-run.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use provisioner::cancel::CancelToken;
use provisioner::core::outcome::{RunStatus, StepOutcome, StepRecord};
use provisioner::exit_codes;
use provisioner::io::config::{ProvisionConfig, load_config};
use provisioner::io::lockfile::HostLock;
use provisioner::io::runlog::{RunPaths, new_run_id, write_run_artifacts};
use provisioner::logging;
use provisioner::plans::{build_plan, discover_endpoints};
use provisioner::report::render_summary;
use provisioner::sequencer::{PreviewVerdict, Sequencer};

#[derive(Parser)]
#[command(
    name = "provisioner",
    version,
    about = "Idempotent GPU inference host provisioner"
)]
struct Cli {
    /// Increase diagnostic verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved plan without probing or changing anything.
    Plan {
        #[arg(long, default_value = "provisioner.toml")]
        config: PathBuf,
        /// Model repository identifier (overrides the config file).
        #[arg(long)]
        model: Option<String>,
        /// Listen port (overrides the config file).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Execute the plan against this host.
    Run {
        #[arg(long, default_value = "provisioner.toml")]
        config: PathBuf,
        /// Model repository identifier (overrides the config file).
        #[arg(long)]
        model: Option<String>,
        /// Listen port (overrides the config file).
        #[arg(long)]
        port: Option<u16>,
        /// Evaluate preconditions and print what would run; change nothing.
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
        /// Override the state directory (lock file, run artifacts).
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match cli.command {
        Command::Plan {
            config,
            model,
            port,
        } => cmd_plan(&config, model, port),
        Command::Run {
            config,
            model,
            port,
            dry_run,
            yes,
            state_dir,
        } => cmd_run(&config, model, port, dry_run, yes, state_dir),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn resolve_config(
    path: &Path,
    model: Option<String>,
    port: Option<u16>,
) -> Result<ProvisionConfig> {
    let mut cfg = load_config(path)?;
    if let Some(model) = model {
        cfg.model = model;
    }
    if let Some(port) = port {
        cfg.port = port;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn cmd_plan(config: &Path, model: Option<String>, port: Option<u16>) -> Result<i32> {
    let cfg = resolve_config(config, model, port)?;
    let steps = build_plan(&cfg)?;

    println!("plan for model '{}' -> {}:", cfg.model, cfg.base_url());
    for step in &steps {
        let mut notes: Vec<String> = Vec::new();
        if !step.fatal {
            notes.push("non-fatal".to_string());
        }
        if step.retry.max_attempts > 1 {
            notes.push(format!("up to {} attempts", step.retry.max_attempts));
        }
        if step.postcondition.is_some() {
            notes.push("verified".to_string());
        }
        println!("  {:<26} {}", step.name, notes.join(", "));
    }
    Ok(exit_codes::OK)
}

fn cmd_run(
    config: &Path,
    model: Option<String>,
    port: Option<u16>,
    dry_run: bool,
    yes: bool,
    state_dir: Option<PathBuf>,
) -> Result<i32> {
    let mut cfg = resolve_config(config, model, port)?;
    if let Some(dir) = state_dir {
        cfg.state_dir = dir;
    }

    let cancel = CancelToken::new();
    let sequencer = Sequencer::new(build_plan(&cfg)?, cancel);

    if dry_run {
        println!("dry run for model '{}':", cfg.model);
        for entry in sequencer.preview() {
            let verdict = match entry.verdict {
                PreviewVerdict::WouldSkip => "skip (already satisfied)",
                PreviewVerdict::WouldRun => "run",
            };
            println!("  {:<26} {verdict}", entry.step);
        }
        return Ok(exit_codes::OK);
    }

    if !yes && !confirm(&cfg)? {
        println!("cancelled");
        return Ok(exit_codes::INVALID);
    }

    let paths = RunPaths::new(&cfg.state_dir);
    let run_id = new_run_id();
    let _lock = HostLock::acquire(&paths.lock_path(), &run_id)?;

    let report = sequencer.run(print_progress);

    let endpoints = discover_endpoints(&cfg, &report.status);
    let artifacts = vec![
        paths.report_path(&run_id).display().to_string(),
        paths.summary_path(&run_id).display().to_string(),
    ];
    let summary = render_summary(&report, &endpoints, &artifacts)?;
    write_run_artifacts(&paths, &run_id, &report, &summary)
        .context("write run artifacts")?;
    print!("{summary}");

    match &report.status {
        RunStatus::Completed => Ok(exit_codes::OK),
        RunStatus::Aborted { step } => {
            let reason = report
                .failures()
                .last()
                .map(|record| match &record.outcome {
                    StepOutcome::Failed { reason } => reason.clone(),
                    _ => String::new(),
                })
                .unwrap_or_default();
            eprintln!("run aborted at step '{step}': {reason}");
            Ok(exit_codes::ABORTED)
        }
    }
}

fn print_progress(record: &StepRecord) {
    let state = match &record.outcome {
        StepOutcome::Skipped => "skip",
        StepOutcome::Succeeded { warning: None } => " ok ",
        StepOutcome::Succeeded { warning: Some(_) } => "warn",
        StepOutcome::Failed { .. } => "FAIL",
    };
    println!("[{state}] {}", record.step);
}

/// Print what the run is about to do and ask for a y/N confirmation.
fn confirm(cfg: &ProvisionConfig) -> Result<bool> {
    print!(
        "About to provision this host: model '{}', service '{}' on {}. Proceed? [y/N] ",
        cfg.model,
        cfg.service.name,
        cfg.base_url()
    );
    std::io::stdout().flush().context("flush prompt")?;

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read confirmation")?;
    let answer = line.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plan_with_overrides() {
        let cli = Cli::parse_from(["provisioner", "plan", "--model", "org/m", "--port", "9000"]);
        match cli.command {
            Command::Plan { model, port, .. } => {
                assert_eq!(model.as_deref(), Some("org/m"));
                assert_eq!(port, Some(9000));
            }
            Command::Run { .. } => panic!("expected plan"),
        }
    }

    #[test]
    fn parse_run_flags() {
        let cli = Cli::parse_from(["provisioner", "run", "--dry-run", "-y", "-vv"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Run { dry_run, yes, .. } => {
                assert!(dry_run);
                assert!(yes);
            }
            Command::Plan { .. } => panic!("expected run"),
        }
    }
}
