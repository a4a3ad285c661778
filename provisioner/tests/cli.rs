//! CLI tests for the provisioner binary.
//!
//! Spawns the built binary and verifies exit codes and output for the
//! read-only surfaces: `plan` and `run --dry-run`.

use std::process::Command;

use provisioner::exit_codes;
use provisioner::io::config::{ProvisionConfig, write_config};

fn binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_provisioner"))
}

#[test]
fn plan_lists_every_step_in_order() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = binary()
        .current_dir(temp.path())
        .args(["plan", "--model", "org/model-7b"])
        .output()
        .expect("provisioner plan");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let names = [
        "check-gpu-driver",
        "install-server",
        "download-model",
        "write-service-unit",
        "start-inference-service",
        "verify-endpoint",
        "install-mesh-agent",
        "join-mesh-network",
    ];
    let mut last = 0;
    for name in names {
        let at = stdout.find(name).unwrap_or_else(|| panic!("missing {name}"));
        assert!(at >= last, "{name} listed out of order");
        last = at;
    }
}

#[test]
fn plan_without_a_model_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = binary()
        .current_dir(temp.path())
        .arg("plan")
        .output()
        .expect("provisioner plan");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--model"), "stderr: {stderr}");
}

#[test]
fn plan_reads_the_config_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = ProvisionConfig {
        model: "org/from-config".to_string(),
        ..ProvisionConfig::default()
    };
    let path = temp.path().join("provisioner.toml");
    write_config(&path, &cfg).expect("write config");

    let output = binary()
        .current_dir(temp.path())
        .arg("plan")
        .output()
        .expect("provisioner plan");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("org/from-config"), "stdout: {stdout}");
}

#[test]
fn dry_run_previews_without_locking_or_writing_state() {
    let temp = tempfile::tempdir().expect("tempdir");
    let state_dir = temp.path().join("state");

    let output = binary()
        .current_dir(temp.path())
        .args(["run", "--dry-run", "--yes", "--model", "org/model-7b"])
        .arg("--state-dir")
        .arg(&state_dir)
        .output()
        .expect("provisioner run --dry-run");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("check-gpu-driver"), "stdout: {stdout}");
    // A dry run must not create the lock file or any run directory.
    assert!(!state_dir.exists());
}

#[test]
fn run_refuses_a_held_host_lock() {
    let temp = tempfile::tempdir().expect("tempdir");
    let state_dir = temp.path().join("state");
    std::fs::create_dir_all(&state_dir).expect("state dir");
    std::fs::write(state_dir.join("provision.lock"), "pid=1\nrun_id=other\n")
        .expect("seed lock");

    let output = binary()
        .current_dir(temp.path())
        .args(["run", "--yes", "--model", "org/model-7b"])
        .arg("--state-dir")
        .arg(&state_dir)
        .output()
        .expect("provisioner run");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("lock"), "stderr: {stderr}");
}
