//! Smoke tests -- verify the binary runs end to end on a small run file.

use assert_cmd::Command;
use chrono::{TimeZone, Utc};
use loadlens::{MetricSeries, RunMetrics};
use std::path::Path;

fn write_run(dir: &Path) -> std::path::PathBuf {
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let mut overall: Vec<Option<f64>> = vec![Some(100.0); 8];
    overall.extend([Some(180.0), Some(190.0), Some(100.0), Some(100.0)]);
    let mut txn: Vec<Option<f64>> = vec![Some(40.0); 8];
    txn.extend([Some(90.0), Some(95.0), Some(40.0), Some(40.0)]);

    let mut run = RunMetrics::default();
    run.overall.insert(
        "response_time_avg".to_string(),
        MetricSeries::from_values(start, 10, &overall),
    );
    let checkout = run.transactions.entry("checkout".to_string()).or_default();
    checkout.insert("response_time_avg".to_string(), MetricSeries::from_values(start, 10, &txn));
    checkout.insert(
        "throughput".to_string(),
        MetricSeries::from_values(start, 10, &[Some(50.0); 12]),
    );

    let path = dir.join("run.json");
    std::fs::write(&path, serde_json::to_string(&run).unwrap()).unwrap();
    path
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("loadlens")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Anomaly detection and attribution"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("loadlens")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("loadlens"));
}

#[test]
fn test_default_config_parses_back() {
    let output = Command::cargo_bin("loadlens")
        .unwrap()
        .arg("default-config")
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    let cfg: loadlens::EngineConfig = toml::from_str(&text).unwrap();
    assert_eq!(cfg, loadlens::EngineConfig::default());
}

#[test]
fn test_analyze_then_validate() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_run(dir.path());
    let events = dir.path().join("events.json");

    Command::cargo_bin("loadlens")
        .unwrap()
        .env_remove("LOADLENS_CONFIG")
        .args(["analyze", "--input"])
        .arg(&input)
        .arg("--output")
        .arg(&events)
        .assert()
        .success();

    let text = std::fs::read_to_string(&events).unwrap();
    let report = loadlens::AnalysisReport::from_json(&text).unwrap();
    assert_eq!(report.overall.len(), 1);
    assert_eq!(report.overall[0].contributors[0].transaction, "checkout");

    Command::cargo_bin("loadlens")
        .unwrap()
        .args(["validate", "--events"])
        .arg(&events)
        .assert()
        .success()
        .stdout(predicates::str::contains("OK: 1 overall events, 1 transaction events"));
}

#[test]
fn test_invalid_config_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_run(dir.path());
    let config = dir.path().join("engine.toml");
    std::fs::write(&config, "baseline_window_k = 0\n").unwrap();

    Command::cargo_bin("loadlens")
        .unwrap()
        .args(["analyze", "--input"])
        .arg(&input)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicates::str::contains("baseline_window_k"));
}

#[test]
fn test_validate_rejects_tampered_report() {
    let dir = tempfile::tempdir().unwrap();
    let events = dir.path().join("events.json");
    let stub = r#"{"overall": [], "transactions": [{"id": "not-a-uuid"}]}"#;
    std::fs::write(&events, stub).unwrap();

    Command::cargo_bin("loadlens")
        .unwrap()
        .args(["validate", "--events"])
        .arg(&events)
        .assert()
        .failure();
}
