use crate::error::{CrawlError, Result};
use crate::fingerprint::{DEFAULT_TRACKING_PARAMS, FilterMode, Normalizer};
use crate::forms::{ALLOWED_FORM_CATEGORIES, FormFiller};
use crate::request::{Headers, Request};
use crate::scope::ScopePolicy;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Lightcycle/0.1 (https://github.com/trapdoorsec/lightcycle)";
pub const DEFAULT_IGNORE_KEYWORDS: &[&str] = &["logout", "quit", "exit"];

/// How to obtain a browser.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Chromium binary; auto-detected when `None`.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    /// DevTools websocket of an already running browser.
    pub remote_url: Option<String>,
    pub proxy: Option<String>,
    pub user_agent: String,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            remote_url: None,
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Every tunable of a crawl run.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub seed: Url,
    pub headers: Headers,
    pub scope: ScopePolicy,
    /// Number of workers and browser sessions.
    pub concurrency: usize,
    pub page_timeout: Duration,
    /// How long the network must stay silent before a page counts as loaded.
    pub network_idle: Duration,
    /// Extra wait after network idle for late DOM work.
    pub settle_delay: Duration,
    pub action_timeout: Duration,
    /// Maximum DOM events fired per page.
    pub action_budget: usize,
    /// Pause between two fired events.
    pub trigger_interval: Duration,
    pub acquire_timeout: Duration,
    /// Maximum number of pages handed to workers.
    pub max_requests: usize,
    pub max_run_time: Duration,
    pub filter_mode: FilterMode,
    pub tracking_params: Vec<String>,
    pub form_values: HashMap<String, String>,
    pub form_keyword_values: HashMap<String, String>,
    pub ignore_keywords: Vec<String>,
    pub browser: BrowserOptions,
}

impl CrawlConfig {
    pub fn new(seed: Url) -> Self {
        Self {
            seed,
            headers: Headers::new(),
            scope: ScopePolicy::default(),
            concurrency: 4,
            page_timeout: Duration::from_secs(20),
            network_idle: Duration::from_millis(500),
            settle_delay: Duration::from_secs(1),
            action_timeout: Duration::from_secs(2),
            action_budget: 20,
            trigger_interval: Duration::from_millis(100),
            acquire_timeout: Duration::from_secs(30),
            max_requests: 200,
            max_run_time: Duration::from_secs(3600),
            filter_mode: FilterMode::Simple,
            tracking_params: DEFAULT_TRACKING_PARAMS.iter().map(|s| s.to_string()).collect(),
            form_values: HashMap::new(),
            form_keyword_values: HashMap::new(),
            ignore_keywords: DEFAULT_IGNORE_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            browser: BrowserOptions::default(),
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.scope.max_depth = depth;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Rejects settings that would make the run meaningless before any
    /// browser is started.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.seed.scheme(), "http" | "https") {
            return Err(CrawlError::Config(format!(
                "unsupported seed scheme '{}'",
                self.seed.scheme()
            )));
        }
        if self.seed.host_str().is_none_or(str::is_empty) {
            return Err(CrawlError::Config(format!("seed {} has no host", self.seed)));
        }
        if self.concurrency == 0 {
            return Err(CrawlError::Config("concurrency must be at least 1".to_string()));
        }
        if self.max_requests == 0 {
            return Err(CrawlError::Config("max requests must be at least 1".to_string()));
        }
        for (name, value) in [
            ("page timeout", self.page_timeout),
            ("action timeout", self.action_timeout),
            ("acquire timeout", self.acquire_timeout),
            ("max run time", self.max_run_time),
        ] {
            if value.is_zero() {
                return Err(CrawlError::Config(format!("{} must be greater than zero", name)));
            }
        }
        if let Some(category) = self
            .form_values
            .keys()
            .find(|k| !ALLOWED_FORM_CATEGORIES.contains(&k.as_str()))
        {
            return Err(CrawlError::Config(format!(
                "unknown form value category '{}' (allowed: {})",
                category,
                ALLOWED_FORM_CATEGORIES.join(", ")
            )));
        }
        Ok(())
    }

    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.filter_mode, self.tracking_params.clone())
    }

    pub fn form_filler(&self) -> FormFiller {
        FormFiller::new(self.form_values.clone(), self.form_keyword_values.clone())
    }

    /// Requests whose URL mentions an ignore keyword are recorded but never opened.
    pub fn is_ignored(&self, request: &Request) -> bool {
        let url = request.url().as_str().to_ascii_lowercase();
        self.ignore_keywords
            .iter()
            .filter(|kw| !kw.is_empty())
            .any(|kw| url.contains(&kw.to_ascii_lowercase()))
    }
}
