//! CLI smoke tests. None of these reach a model or the case-law service.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn docket(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("docket");
    cmd.current_dir(dir.path())
        .env_remove("DOCKET_STATE_DIR")
        .env_remove("DOCKET_DB_PATH")
        .env_remove("RUST_LOG");
    cmd
}

fn init(dir: &TempDir) {
    docket(dir).arg("init").assert().success();
}

// =============================================================================
// Basics
// =============================================================================

#[test]
fn test_help_and_version() {
    let dir = TempDir::new().unwrap();
    docket(&dir).arg("--help").assert().success();
    docket(&dir).arg("--version").assert().success();
}

#[test]
fn test_init_creates_config_and_database() {
    let dir = TempDir::new().unwrap();
    docket(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    assert!(dir.path().join(".docket/docket.toml").exists());
    assert!(dir.path().join(".docket/docket.db").exists());

    docket(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

// =============================================================================
// Config
// =============================================================================

#[test]
fn test_config_validate_accepts_defaults() {
    let dir = TempDir::new().unwrap();
    docket(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_config_validate_rejects_bad_threshold() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join(".docket")).unwrap();
    fs::write(
        dir.path().join(".docket/docket.toml"),
        "[tiers.B]\nquality_threshold = 5.0\ncost_cap_usd = 35.0\nfailure_ceiling = 5\nbatch_size = 4\nmin_composite = 0.7\n",
    )
    .unwrap();

    docket(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("quality_threshold"));
}

#[test]
fn test_config_show_lists_tiers() {
    let dir = TempDir::new().unwrap();
    docket(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[tiers]"))
        .stdout(predicate::str::contains("[holds]"));
}

// =============================================================================
// Phases and citations
// =============================================================================

#[test]
fn test_phases_shows_skips_for_out_of_state_motion() {
    let dir = TempDir::new().unwrap();
    docket(&dir)
        .args(["phases", "--tier", "A", "--motion", "dismiss", "--jurisdiction", "NY"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Judge simulation"))
        .stdout(predicate::str::contains("skipped"));
}

#[test]
fn test_citations_extract_prints_json() {
    let dir = TempDir::new().unwrap();
    let brief = dir.path().join("brief.txt");
    fs::write(
        &brief,
        "Summary judgment is proper. Celotex Corp. v. Catrett, 477 U.S. 317, 322 (1986).",
    )
    .unwrap();

    docket(&dir)
        .args(["citations", "extract"])
        .arg(&brief)
        .assert()
        .success()
        .stdout(predicate::str::contains("477"))
        .stdout(predicate::str::contains("U.S."));
}

// =============================================================================
// Orders and checkpoints
// =============================================================================

#[test]
fn test_order_create_and_show() {
    let dir = TempDir::new().unwrap();
    init(&dir);

    docket(&dir)
        .args([
            "order",
            "create",
            "--tier",
            "B",
            "--motion",
            "summary_judgment",
            "--jurisdiction",
            "CA",
            "--caption",
            "Smith v. Jones",
            "--deadline",
            "2026-12-01",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("1"));

    docket(&dir)
        .args(["order", "show", "1", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Smith v. Jones"))
        .stdout(predicate::str::contains("\"current_phase\": \"I\""));
}

#[test]
fn test_order_create_rejects_unknown_tier() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    docket(&dir)
        .args([
            "order",
            "create",
            "--tier",
            "Z",
            "--motion",
            "dismiss",
            "--jurisdiction",
            "CA",
            "--caption",
            "X v. Y",
        ])
        .assert()
        .failure();
}

#[test]
fn test_show_missing_order_fails() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    docket(&dir)
        .args(["order", "show", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_checkpoint_list_and_tick_on_empty_store() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    docket(&dir)
        .args(["checkpoint", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No pending checkpoints"));
    docket(&dir)
        .arg("tick")
        .assert()
        .success()
        .stdout(predicate::str::contains("Examined 0"));
}

#[test]
fn test_cancel_unknown_order_fails() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    docket(&dir).args(["cancel", "7"]).assert().failure();
}

#[test]
fn test_breakers_start_closed() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    docket(&dir)
        .arg("breakers")
        .assert()
        .success()
        .stdout(predicate::str::contains("fast_model"))
        .stdout(predicate::str::contains("CLOSED"));
}
