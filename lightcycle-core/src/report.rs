use colored::Colorize;
use lightcycle_scanner::result::DiscoveredRequest;
use lightcycle_scanner::{CrawlError, CrawlResult, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::info;
use url::Url;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Where the result goes on stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// The result document, and nothing else
    Json,
    /// Coloured text report
    #[default]
    Console,
    None,
}

impl FromStr for OutputMode {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputMode::Json),
            "console" => Ok(OutputMode::Console),
            "none" => Ok(OutputMode::None),
            other => Err(CrawlError::Config(format!("unknown output mode '{}'", other))),
        }
    }
}

/// Path and query of a URL, `/` when both are empty
pub fn extract_url_path(url: &Url) -> String {
    let mut path = url.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    path
}

pub fn generate_json_report(result: &CrawlResult) -> Result<String> {
    Ok(result.to_json()?)
}

/// Write the result document to `path`, creating missing parent directories.
pub fn write_json_report(result: &CrawlResult, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, generate_json_report(result)?)?;
    info!("Result written to {}", path.display());
    Ok(())
}

fn colored_method(method: &str) -> String {
    let padded = format!("{:<6}", method);
    match method {
        "GET" => padded.green().to_string(),
        "POST" => padded.yellow().to_string(),
        "PUT" | "PATCH" => padded.cyan().to_string(),
        "DELETE" => padded.red().to_string(),
        _ => padded.white().to_string(),
    }
}

/// Generate a text report from a crawl result
pub fn generate_text_report(result: &CrawlResult) -> String {
    let stats = &result.stats;
    let mut report = String::new();

    report.push_str(RULE);
    report.push_str("\n\n");
    report.push_str("# Summary:\n");
    report.push_str(&format!("  Stop reason: {}\n", stats.stop_reason));
    report.push_str(&format!(
        "  Started: {}\n",
        stats.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    report.push_str(&format!("  Duration: {:.1}s\n", stats.duration_ms as f64 / 1000.0));
    report.push_str(&format!("  Pages crawled: {}\n", stats.pages_crawled));
    report.push_str(&format!("  Pages failed: {}\n", stats.pages_failed));
    if stats.tasks_cancelled > 0 {
        report.push_str(&format!("  Tasks cancelled: {}\n", stats.tasks_cancelled));
    }
    report.push_str(&format!("  Requests found: {}\n", result.requests.len()));

    report.push('\n');
    report.push_str(RULE);
    report.push_str("\n\n");

    let mut by_host: BTreeMap<String, Vec<&DiscoveredRequest>> = BTreeMap::new();
    for found in &result.requests {
        let host = found.request.url().host_str().unwrap_or("unknown").to_string();
        by_host.entry(host).or_default().push(found);
    }

    for (host, requests) in &by_host {
        report.push_str(&format!("## {}\n", host));
        report.push_str(&format!("  {} requests found\n\n", requests.len()));

        for found in requests {
            let request = &found.request;
            report.push_str(&format!(
                "  {} {} {}\n",
                colored_method(request.method()),
                extract_url_path(request.url()),
                format!("[{}]", request.source()).bright_black()
            ));
            if let Some(body) = request.body() {
                report.push_str(&format!("         {}\n", body.as_text().dimmed()));
            }
        }
        report.push('\n');
    }

    if !result.failures.is_empty() {
        report.push_str(&format!("## Failures ({})\n", result.failures.len()));
        for failure in &result.failures {
            report.push_str(&format!(
                "  {} {} {}\n",
                format!("[{}]", failure.kind).red(),
                failure.url,
                failure.message.bright_black()
            ));
        }
        report.push('\n');
    }

    if !result.all_domains.is_empty() {
        report.push_str("## Domains\n");
        for domain in &result.all_domains {
            if result.sub_domains.contains(domain) {
                report.push_str(&format!("  {} {}\n", domain, "(subdomain)".cyan()));
            } else {
                report.push_str(&format!("  {}\n", domain));
            }
        }
        report.push('\n');
    }

    report
}
