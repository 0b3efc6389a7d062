use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Browser launch failed: {0}")]
    BrowserLaunch(String),

    #[error("Page timed out after {0:?}")]
    PageTimeout(std::time::Duration),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Browser crashed: {0}")]
    BrowserCrash(String),

    #[error("No browser session became available within {0:?}")]
    PoolExhausted(std::time::Duration),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Other error: {0}")]
    Other(String),
}

impl CrawlError {
    /// Errors that abort a run before any page is visited.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CrawlError::Config(_) | CrawlError::BrowserLaunch(_))
    }
}

impl From<url::ParseError> for CrawlError {
    fn from(e: url::ParseError) -> Self {
        CrawlError::InvalidUrl(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CrawlError>;
