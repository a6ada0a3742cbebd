//! Smoke tests -- verify the binary runs and each subcommand does its job.

use assert_cmd::Command;
use predicates::prelude::*;

fn spikewatch() -> Command {
    let mut cmd = Command::cargo_bin("spikewatch").unwrap();
    cmd.env_remove("SPIKEWATCH_CONFIG").env_remove("RUST_LOG");
    cmd
}

/// 60 one-minute observations for `keyword` with a spike at minute 40.
fn batch_json(keyword: &str) -> String {
    let records: Vec<String> = (0..60)
        .map(|i| {
            let value = if i == 40 {
                0.95
            } else {
                0.5 + 0.01 * ((i % 4) as f64 - 1.5)
            };
            format!(
                r#"{{"keyword":"{}","timestamp":"2025-06-01T{:02}:{:02}:00Z","value":{}}}"#,
                keyword,
                i / 60,
                i % 60,
                value
            )
        })
        .collect();
    format!("[{}]", records.join(","))
}

#[test]
fn test_cli_help() {
    spikewatch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Spike detection"));
}

#[test]
fn test_cli_version() {
    spikewatch()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("spikewatch"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["detect", "watch", "benchmark", "check-config"] {
        spikewatch().args([sub, "--help"]).assert().success();
    }
}

#[test]
fn test_detect_from_stdin_finds_spike() {
    spikewatch()
        .arg("detect")
        .write_stdin(batch_json("bitcoin"))
        .assert()
        .success()
        .stdout(predicate::str::contains("2025-06-01T00:40:00Z"))
        .stdout(predicate::str::contains("seasonal_hybrid_esd"));
}

#[test]
fn test_detect_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("batch.json");
    std::fs::write(&input, batch_json("election")).unwrap();

    spikewatch()
        .arg("detect")
        .arg("--input")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"keyword\": \"election\""));
}

#[test]
fn test_detect_rejects_malformed_input() {
    spikewatch()
        .arg("detect")
        .write_stdin("{not json")
        .assert()
        .failure();
}

#[test]
fn test_watch_reads_ndjson_until_eof() {
    let records: Vec<String> = (0..60)
        .map(|i| {
            let value = if i == 30 { 0.95 } else { 0.5 + 0.01 * ((i % 4) as f64 - 1.5) };
            format!(
                r#"{{"keyword":"ai","timestamp":"2025-06-01T00:{:02}:00Z","value":{}}}"#,
                i, value
            )
        })
        .collect();

    spikewatch()
        .arg("watch")
        .write_stdin(records.join("\n"))
        .assert()
        .success()
        .stdout(predicate::str::contains("ai"))
        .stdout(predicate::str::contains("60"))
        .stdout(predicate::str::contains("seasonal_hybrid_esd"));
}

#[test]
fn test_benchmark_json() {
    spikewatch()
        .args(["benchmark", "--points", "500", "--spikes", "5", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("seasonal_hybrid_esd"))
        .stdout(predicate::str::contains("precision"));
}

#[test]
fn test_check_config_prints_defaults() {
    spikewatch()
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[detection]"))
        .stdout(predicate::str::contains("cadence_secs = 30"));
}

#[test]
fn test_check_config_rejects_invalid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[trigger]\ncadence_secs = 1\n").unwrap();

    spikewatch()
        .arg("check-config")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure();
}
