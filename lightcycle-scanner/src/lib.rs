pub mod aggregator;
pub mod browser;
pub mod chrome;
pub mod config;
pub mod crawler;
pub mod dom;
pub mod error;
pub mod fingerprint;
pub mod forms;
pub mod http;
pub mod pool;
pub mod request;
pub mod result;
pub mod scheduler;
pub mod scope;
pub mod worker;

#[cfg(test)]
mod mock;

pub use browser::{BrowserLauncher, BrowserSession};
pub use chrome::ChromeLauncher;
pub use config::{BrowserOptions, CrawlConfig};
pub use crawler::{Crawler, ProgressCallback, StopHandle};
pub use error::{CrawlError, Result};
pub use fingerprint::{FilterMode, Fingerprint};
pub use http::HttpLauncher;
pub use request::{Headers, Request, Source};
pub use result::{CrawlResult, StopReason, TaskFailure};
