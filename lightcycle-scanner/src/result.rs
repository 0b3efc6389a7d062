use crate::error::CrawlError;
use crate::fingerprint::Fingerprint;
use crate::request::{CrawlTask, Request};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// Queue drained with no page in flight.
    Completed,
    RequestBudget,
    TimeBudget,
    Cancelled,
}

impl StopReason {
    /// Whether pages already loading are abandoned when the run stops.
    pub fn aborts_in_flight(&self) -> bool {
        matches!(self, StopReason::TimeBudget | StopReason::Cancelled)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Completed => "completed",
            StopReason::RequestBudget => "request budget exhausted",
            StopReason::TimeBudget => "time budget exhausted",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    PageTimeout,
    Navigation,
    BrowserCrash,
    BrowserLaunch,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::PageTimeout => "timeout",
            FailureKind::Navigation => "navigation",
            FailureKind::BrowserCrash => "crash",
            FailureKind::BrowserLaunch => "launch",
            FailureKind::Other => "error",
        };
        f.write_str(s)
    }
}

impl From<&CrawlError> for FailureKind {
    fn from(e: &CrawlError) -> Self {
        match e {
            CrawlError::PageTimeout(_) => FailureKind::PageTimeout,
            CrawlError::Navigation(_) | CrawlError::HttpError(_) | CrawlError::InvalidUrl(_) => {
                FailureKind::Navigation
            }
            CrawlError::BrowserCrash(_) => FailureKind::BrowserCrash,
            CrawlError::BrowserLaunch(_) => FailureKind::BrowserLaunch,
            _ => FailureKind::Other,
        }
    }
}

/// A page that could not be processed. Recorded, never retried.
#[derive(Debug, Clone, Serialize)]
pub struct TaskFailure {
    pub url: String,
    pub depth: usize,
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(task: &CrawlTask, error: &CrawlError) -> Self {
        Self {
            url: task.request.url().to_string(),
            depth: task.depth,
            kind: FailureKind::from(error),
            message: error.to_string(),
        }
    }
}

/// A unique request in the final result.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredRequest {
    #[serde(flatten)]
    pub request: Request,
    #[serde(serialize_with = "serialize_fingerprint")]
    pub fingerprint: Fingerprint,
}

fn serialize_fingerprint<S: Serializer>(
    fingerprint: &Fingerprint,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(fingerprint.as_str())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlStats {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub pages_crawled: usize,
    pub pages_failed: usize,
    pub tasks_cancelled: usize,
    pub stop_reason: StopReason,
}

/// Everything a run produced, emitted once at shutdown.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlResult {
    pub requests: Vec<DiscoveredRequest>,
    pub all_domains: Vec<String>,
    pub sub_domains: Vec<String>,
    pub failures: Vec<TaskFailure>,
    pub stats: CrawlStats,
}

impl CrawlResult {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn find(&self, method: &str, url: &str) -> Option<&DiscoveredRequest> {
        self.requests
            .iter()
            .find(|r| r.request.method() == method && r.request.url().as_str() == url)
    }
}
