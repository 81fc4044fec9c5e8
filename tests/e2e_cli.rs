//! CLI end-to-end tests for the vidrelay binary.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[allow(deprecated)]
fn vidrelay_cmd() -> Command {
    Command::cargo_bin("vidrelay").unwrap()
}

#[test]
fn no_args_shows_usage() {
    vidrelay_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn version_command() {
    vidrelay_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(concat!("vidrelay ", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn validate_reports_config_summary() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("vidrelay.json");
    fs::write(
        &config_path,
        r#"{
            "server": { "port": 3100, "stream_mode": "loop" },
            "relay": { "port": 9554 },
            "transcoder": { "enabled_streams": ["video1", "video2"] }
        }"#,
    )
    .unwrap();

    vidrelay_cmd()
        .arg("validate")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("3100"))
        .stdout(predicate::str::contains("Loop"))
        .stdout(predicate::str::contains("video1, video2"));
}

#[test]
fn validate_rejects_broken_json() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("broken.json");
    fs::write(&config_path, "{ not json").unwrap();

    vidrelay_cmd()
        .arg("validate")
        .arg(&config_path)
        .assert()
        .failure();
}

#[test]
fn list_shows_static_registry() {
    let dir = tempdir().unwrap();
    let videos = dir.path().join("videos");
    fs::create_dir(&videos).unwrap();
    fs::write(videos.join("video1.mp4"), b"x").unwrap();

    let config_path = dir.path().join("vidrelay.json");
    let config = serde_json::json!({
        "media": { "dir": videos, "static_count": 2 },
        "relay": { "port": 8554 },
        "transcoder": { "advertised_host": "cam.local" }
    });
    fs::write(&config_path, config.to_string()).unwrap();

    vidrelay_cmd()
        .arg("--config")
        .arg(&config_path)
        .arg("list")
        .env_remove("RTSP_PORT")
        .env_remove("SERVER_IP")
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ video1"))
        .stdout(predicate::str::contains("✗ video2"))
        .stdout(predicate::str::contains("rtsp://cam.local:8554/video1"));
}
