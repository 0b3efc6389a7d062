use crate::seed::{SeedOptions, expand_seeds};
use indicatif::{ProgressBar, ProgressStyle};
use lightcycle_scanner::{
    BrowserLauncher, ChromeLauncher, CrawlConfig, CrawlError, CrawlResult, Crawler, HttpLauncher,
    Result, StopHandle,
};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// Which browser backend drives the crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Engine {
    /// Chromium over the DevTools protocol
    #[default]
    Chrome,
    /// Plain HTTP fetches, no JavaScript
    Http,
}

impl FromStr for Engine {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chrome" | "chromium" => Ok(Engine::Chrome),
            "http" => Ok(Engine::Http),
            other => Err(CrawlError::Config(format!("unknown engine '{}'", other))),
        }
    }
}

/// Options for configuring a crawl operation
pub struct CrawlOptions {
    pub config: CrawlConfig,
    pub engine: Engine,
    pub seeding: SeedOptions,
    pub show_progress_bars: bool,
    /// Lets the caller stop the run, e.g. from a ctrl-c handler.
    pub stop_handle: Option<StopHandle>,
}

impl CrawlOptions {
    pub fn new(config: CrawlConfig) -> Self {
        Self {
            config,
            engine: Engine::default(),
            seeding: SeedOptions::default(),
            show_progress_bars: false,
            stop_handle: None,
        }
    }
}

/// Callback for reporting crawl progress
pub type CrawlProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Start the backend selected by `engine`.
pub async fn launch_engine(engine: Engine, config: &CrawlConfig) -> Result<Arc<dyn BrowserLauncher>> {
    match engine {
        Engine::Chrome => {
            let launcher = ChromeLauncher::launch(&config.browser, config.headers.clone()).await?;
            Ok(Arc::new(launcher))
        }
        Engine::Http => {
            let launcher = HttpLauncher::new(&config.browser, config.page_timeout)?;
            Ok(Arc::new(launcher))
        }
    }
}

/// Execute a crawl with the given options
/// Returns the crawl result
pub async fn execute_crawl(
    options: CrawlOptions,
    progress_callback: Option<CrawlProgressCallback>,
) -> Result<CrawlResult> {
    let CrawlOptions {
        mut config,
        engine,
        mut seeding,
        show_progress_bars,
        stop_handle,
    } = options;

    config.validate()?;
    if seeding.threads == 0 {
        seeding.threads = config.concurrency;
    }

    if seeding.is_enabled()
        && let Some(ref callback) = progress_callback
    {
        callback(format!("Expanding seeds for {}", config.seed));
    }
    let seeds = expand_seeds(&config, &seeding).await?;
    if !seeds.is_empty() {
        info!("Seeding crawl with {} extra requests", seeds.len());
    }

    let launcher = launch_engine(engine, &config).await?;

    let progress_bar = if show_progress_bars {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .map_err(|e| CrawlError::Other(e.to_string()))?,
        );
        pb.set_message("Starting crawl...");
        Some(Arc::new(pb))
    } else {
        None
    };

    let processed_count = Arc::new(AtomicUsize::new(0));
    let mut crawler = Crawler::new(config, launcher.clone()).with_seeds(seeds);

    if let Some(ref pb) = progress_bar {
        let pb = pb.clone();
        let count = processed_count.clone();
        crawler = crawler.with_progress_callback(Arc::new(move |_worker_id: usize, _url: String| {
            let count = count.fetch_add(1, Ordering::Relaxed) + 1;
            pb.set_message(format!("Crawling... {} pages processed", count));
            pb.tick();
        }));
    }
    if let Some(handle) = stop_handle {
        crawler = crawler.with_stop_handle(handle);
    }

    let result = crawler.crawl().await;

    if let Some(ref pb) = progress_bar {
        let total = processed_count.load(Ordering::Relaxed);
        pb.finish_with_message(format!("Crawl complete! {} pages processed", total));
    }

    match result {
        Ok(result) => Ok(result),
        Err(e) => {
            // The pool may never have formed.
            warn!("Crawl aborted: {}", e);
            launcher.shutdown().await;
            if let Some(ref callback) = progress_callback {
                callback(format!("[!]  Failed to crawl: {}", e));
            }
            Err(e)
        }
    }
}
