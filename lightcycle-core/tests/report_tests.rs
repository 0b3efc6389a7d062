// Tests for result document and text report generation

use chrono::Utc;
use lightcycle_core::report::{
    OutputMode, generate_json_report, generate_text_report, write_json_report,
};
use lightcycle_scanner::fingerprint::Normalizer;
use lightcycle_scanner::request::Body;
use lightcycle_scanner::result::{CrawlStats, DiscoveredRequest, FailureKind, TaskFailure};
use lightcycle_scanner::{CrawlResult, Request, Source, StopReason};
use std::fs;
use tempfile::TempDir;

fn discovered(request: Request) -> DiscoveredRequest {
    DiscoveredRequest {
        fingerprint: Normalizer::default().normalize(&request),
        request,
    }
}

fn sample_result() -> CrawlResult {
    let now = Utc::now();
    CrawlResult {
        requests: vec![
            discovered(Request::parse("GET", "http://example.com/", Source::Target).unwrap()),
            discovered(
                Request::parse("POST", "http://example.com/login", Source::Form)
                    .unwrap()
                    .with_body(Body::urlencoded([("user", "admin")])),
            ),
            discovered(Request::parse("GET", "http://api.example.com/v1/items?page=2", Source::Xhr).unwrap()),
        ],
        all_domains: vec!["api.example.com".into(), "cdn.other.net".into(), "example.com".into()],
        sub_domains: vec!["api.example.com".into()],
        failures: vec![TaskFailure {
            url: "http://example.com/slow".into(),
            depth: 2,
            kind: FailureKind::PageTimeout,
            message: "Page timed out after 20s".into(),
        }],
        stats: CrawlStats {
            started_at: now,
            finished_at: now,
            duration_ms: 1500,
            pages_crawled: 4,
            pages_failed: 1,
            tasks_cancelled: 0,
            stop_reason: StopReason::RequestBudget,
        },
    }
}

// ============================================================================
// Output Mode Tests
// ============================================================================

#[test]
fn test_output_mode_from_str() {
    assert_eq!("json".parse::<OutputMode>().unwrap(), OutputMode::Json);
    assert_eq!("Console".parse::<OutputMode>().unwrap(), OutputMode::Console);
    assert_eq!("none".parse::<OutputMode>().unwrap(), OutputMode::None);
    assert!("csv".parse::<OutputMode>().is_err());
}

#[test]
fn test_output_mode_default() {
    assert_eq!(OutputMode::default(), OutputMode::Console);
}

// ============================================================================
// Text Report Tests
// ============================================================================

#[test]
fn test_text_report_summary() {
    colored::control::set_override(false);
    let report = generate_text_report(&sample_result());

    assert!(report.contains("# Summary:"));
    assert!(report.contains("Stop reason: request budget exhausted"));
    assert!(report.contains("Duration: 1.5s"));
    assert!(report.contains("Pages crawled: 4"));
    assert!(report.contains("Requests found: 3"));
    assert!(!report.contains("Tasks cancelled"));
}

#[test]
fn test_text_report_groups_by_host() {
    colored::control::set_override(false);
    let report = generate_text_report(&sample_result());

    let api = report.find("## api.example.com").unwrap();
    let main = report.find("## example.com").unwrap();
    assert!(api < main);
    assert!(report.contains("POST   /login [form]"));
    assert!(report.contains("user=admin"));
    assert!(report.contains("GET    /v1/items?page=2 [xhr]"));
}

#[test]
fn test_text_report_failures_and_domains() {
    colored::control::set_override(false);
    let report = generate_text_report(&sample_result());

    assert!(report.contains("## Failures (1)"));
    assert!(report.contains("[timeout] http://example.com/slow"));
    assert!(report.contains("api.example.com (subdomain)"));
    assert!(report.contains("  cdn.other.net\n"));
}

// ============================================================================
// JSON Document Tests
// ============================================================================

#[test]
fn test_json_report_is_the_document() {
    let json = generate_json_report(&sample_result()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["requests"].as_array().unwrap().len(), 3);
    assert_eq!(value["requests"][1]["discoveredFrom"], "form");
    assert_eq!(value["subDomains"][0], "api.example.com");
    assert_eq!(value["stats"]["stopReason"], "request-budget");
}

#[test]
fn test_write_json_report_creates_directories() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("out").join("result.json");

    write_json_report(&sample_result(), &path).unwrap();

    let written = fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(value["failures"][0]["kind"], "page-timeout");
}
