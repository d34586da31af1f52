//! Unit tests for the `whisperer-diag status` report.

use std::time::Duration;

use chrono::Utc;
use whisperer_diagnostics::crash::report::render_report_block;
use whisperer_diagnostics::crash::MarkerStore;
use whisperer_diagnostics::models::crash::{CrashMarker, FaultDescription};
use whisperer_diagnostics::status::StatusReport;
use whisperer_diagnostics::tasks::TaskRegistry;
use whisperer_diagnostics::DiagnosticsConfig;

fn signal(name: &'static str, number: i32) -> FaultDescription {
    FaultDescription::Signal { name, number }
}

#[test]
fn empty_data_dir_reports_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = DiagnosticsConfig::with_data_dir(dir.path());

    let report = StatusReport::collect(&config).expect("collect");
    assert!(!report.marker_present);
    assert!(report.marker.is_none());
    assert_eq!(report.crash_reports, 0);
    assert!(report.latest_report.is_none());

    let text = report.to_text();
    assert!(text.contains("Session marker: absent"));
    assert!(text.contains("(0 report(s))"));
    assert!(!text.contains("Latest report"));
}

#[test]
fn live_marker_is_parsed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = DiagnosticsConfig::with_data_dir(dir.path());
    MarkerStore::new(config.marker_path())
        .write(&CrashMarker::current("2.4.1"))
        .expect("write marker");

    let report = StatusReport::collect(&config).expect("collect");
    assert!(report.marker_present);
    let marker = report.marker.as_ref().expect("marker parses");
    assert_eq!(marker.pid, std::process::id());
    assert!(report
        .to_text()
        .contains(&format!("present (pid {}, version 2.4.1", std::process::id())));
}

#[test]
fn garbled_marker_is_present_but_unreadable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = DiagnosticsConfig::with_data_dir(dir.path());
    std::fs::write(config.marker_path(), "garbage").expect("write marker");

    let report = StatusReport::collect(&config).expect("collect");
    assert!(report.marker_present);
    assert!(report.marker.is_none());
    assert!(report.to_text().contains("Session marker: present (unreadable)"));
}

#[tokio::test]
async fn latest_report_is_last_block_in_log() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = DiagnosticsConfig::with_data_dir(dir.path());
    let registry = TaskRegistry::new(Duration::from_secs(300), Duration::from_secs(60));
    let mut log = render_report_block(Utc::now(), &signal("SIGSEGV", 11), &registry);
    log.push_str(&render_report_block(
        Utc::now(),
        &signal("SIGABRT", 6),
        &registry,
    ));
    std::fs::write(config.crash_log_path(), log).expect("write log");

    let report = StatusReport::collect(&config).expect("collect");
    assert_eq!(report.crash_reports, 2);
    let latest = report.latest_report.as_deref().expect("latest block");
    assert!(latest.contains("SIGABRT"));
    assert!(!latest.contains("SIGSEGV"));

    let text = report.to_text();
    assert!(text.contains("(2 report(s))"));
    assert!(text.contains("Latest report:"));
}

#[tokio::test]
async fn json_output_carries_counts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = DiagnosticsConfig::with_data_dir(dir.path());
    let registry = TaskRegistry::new(Duration::from_secs(300), Duration::from_secs(60));
    std::fs::write(
        config.crash_log_path(),
        render_report_block(Utc::now(), &signal("SIGBUS", 7), &registry),
    )
    .expect("write log");
    std::fs::write(config.marker_path(), "garbage").expect("write marker");

    let report = StatusReport::collect(&config).expect("collect");
    let json: serde_json::Value =
        serde_json::from_str(&report.to_json().expect("serialize")).expect("valid json");
    assert_eq!(json["crash_reports"], 1);
    assert_eq!(json["marker_present"], true);
    assert!(json["marker"].is_null());
}

#[test]
fn unreadable_crash_log_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = DiagnosticsConfig::with_data_dir(dir.path());
    std::fs::create_dir(config.crash_log_path()).expect("dir in place of log");

    let err = StatusReport::collect(&config).expect_err("log is a directory");
    assert!(err.to_string().starts_with("io: failed to read crash log"));
}
