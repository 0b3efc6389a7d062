use crate::aggregator::Aggregator;
use crate::browser::BrowserLauncher;
use crate::config::CrawlConfig;
use crate::error::{CrawlError, Result};
use crate::fingerprint::Deduplicator;
use crate::pool::SessionPool;
use crate::request::{CrawlTask, Request, Source};
use crate::result::{CrawlResult, CrawlStats, FailureKind, StopReason, TaskFailure};
use crate::scheduler::Scheduler;
use crate::scope::ScopeFilter;
use crate::worker::NavigationWorker;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

/// Cancels a running crawl from outside, e.g. on ctrl-c.
#[derive(Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self(Arc::new(tx))
    }

    pub fn stop(&self) {
        self.0.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }
}

/// State shared by every worker of one run.
struct Shared {
    config: CrawlConfig,
    scope: ScopeFilter,
    scheduler: Scheduler,
    aggregator: Aggregator,
    pool: SessionPool,
    worker: NavigationWorker,
    failures: Mutex<Vec<TaskFailure>>,
    pages_crawled: AtomicUsize,
    progress_callback: Option<ProgressCallback>,
}

impl Shared {
    /// Scope check, then record, then queue if the request can be opened.
    async fn admit(&self, task: CrawlTask) {
        self.aggregator.observe_host(task.request.url()).await;
        if !self.scope.in_scope(&task.request, task.depth) {
            return;
        }
        self.aggregator.record(task.request.clone()).await;

        if !task.request.is_navigable() {
            return;
        }
        if self.config.is_ignored(&task.request) {
            debug!("Not opening {} (ignore keyword)", task.request);
            return;
        }
        self.scheduler.enqueue(task).await;
    }

    async fn run_task(&self, task: CrawlTask) {
        let mut handle = match self.pool.acquire().await {
            Ok(handle) => handle,
            Err(CrawlError::PoolExhausted(waited)) => {
                warn!("No browser session after {:?}, requeueing {}", waited, task.request);
                self.scheduler.requeue(task).await;
                return;
            }
            Err(e) => {
                self.failures.lock().await.push(TaskFailure::new(&task, &e));
                return;
            }
        };

        let outcome = tokio::select! {
            outcome = self.worker.process(&task, handle.session()) => Some(outcome),
            _ = aborted(self.scheduler.stop_signal()) => None,
        };

        match outcome {
            None => {
                debug!("Abandoned {}", task.request);
                self.scheduler.cancel_in_flight().await;
                self.pool.discard(handle).await;
            }
            Some(Ok(discovered)) => {
                self.pool.release(handle).await;
                self.pages_crawled.fetch_add(1, Ordering::SeqCst);
                for request in discovered {
                    self.admit(task.child(request)).await;
                }
            }
            Some(Err(failure)) => {
                if failure.kind == FailureKind::BrowserCrash {
                    self.pool.discard(handle).await;
                } else {
                    self.pool.release(handle).await;
                }
                self.failures.lock().await.push(failure);
            }
        }
    }
}

/// Resolves once the run stops for a reason that abandons loading pages.
async fn aborted(mut stop: watch::Receiver<Option<StopReason>>) {
    loop {
        let reason = *stop.borrow_and_update();
        if reason.is_some_and(|r| r.aborts_in_flight()) {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub struct Crawler {
    config: CrawlConfig,
    launcher: Arc<dyn BrowserLauncher>,
    extra_seeds: Vec<Request>,
    progress_callback: Option<ProgressCallback>,
    stop_handle: StopHandle,
}

impl Crawler {
    pub fn new(config: CrawlConfig, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            config,
            launcher,
            extra_seeds: Vec::new(),
            progress_callback: None,
            stop_handle: StopHandle::new(),
        }
    }

    /// Additional depth-0 requests (robots.txt entries, fuzzed paths).
    pub fn with_seeds(mut self, seeds: Vec<Request>) -> Self {
        self.extra_seeds = seeds;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Shares a handle created before the crawler, e.g. by a signal handler.
    pub fn with_stop_handle(mut self, handle: StopHandle) -> Self {
        self.stop_handle = handle;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop_handle.clone()
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub async fn crawl(&self) -> Result<CrawlResult> {
        self.config.validate()?;
        let config = &self.config;
        info!(
            "Starting crawl of {} with {} workers",
            config.seed, config.concurrency
        );

        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = start + config.max_run_time;

        let pool = SessionPool::launch(
            self.launcher.clone(),
            config.concurrency,
            config.acquire_timeout,
        )
        .await?;
        let workers = pool.size();

        let scope = ScopeFilter::new(&config.seed, config.scope.clone());
        let shared = Arc::new(Shared {
            aggregator: Aggregator::new(config.normalizer(), scope.root_domain()),
            scheduler: Scheduler::new(
                Deduplicator::new(config.normalizer()),
                config.scope.max_depth,
                config.max_requests,
                deadline,
            ),
            scope,
            pool,
            worker: NavigationWorker::new(config),
            failures: Mutex::new(Vec::new()),
            pages_crawled: AtomicUsize::new(0),
            progress_callback: self.progress_callback.clone(),
            config: config.clone(),
        });

        let seed = Request::get(config.seed.clone(), Source::Target).with_headers(config.headers.clone());
        shared.admit(CrawlTask::seed(seed)).await;
        for seed in &self.extra_seeds {
            let headers = config.headers.merged(seed.headers());
            shared.admit(CrawlTask::seed(seed.clone().with_headers(headers))).await;
        }

        if self.stop_handle.is_stopped() {
            shared.scheduler.stop(StopReason::Cancelled);
        }
        let watcher = {
            let shared = shared.clone();
            let mut rx = self.stop_handle.0.subscribe();
            tokio::spawn(async move {
                if rx.wait_for(|stopped| *stopped).await.is_ok() {
                    shared.scheduler.stop(StopReason::Cancelled);
                }
            })
        };
        let watchdog = {
            let shared = shared.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                shared.scheduler.stop(StopReason::TimeBudget);
            })
        };

        let mut worker_handles = Vec::new();
        for worker_id in 0..workers {
            let shared = shared.clone();
            let handle = tokio::spawn(async move {
                debug!("Worker {} started", worker_id);
                while let Some(task) = shared.scheduler.next().await {
                    if let Some(ref callback) = shared.progress_callback {
                        callback(worker_id, task.request.url().to_string());
                    }
                    shared.run_task(task).await;
                    shared.scheduler.complete().await;
                }
                debug!("Worker {} finished", worker_id);
            });
            worker_handles.push(handle);
        }

        let mut join_error = None;
        for handle in worker_handles {
            if let Err(e) = handle.await {
                join_error.get_or_insert(e);
            }
        }
        watcher.abort();
        watchdog.abort();
        shared.pool.shutdown().await;
        if let Some(e) = join_error {
            return Err(CrawlError::JoinError(e));
        }

        let tasks_cancelled = shared.scheduler.drain().await;
        let stop_reason = shared.scheduler.stop_reason().unwrap_or(StopReason::Completed);
        let failures = shared.failures.lock().await.clone();
        let requests = shared.aggregator.snapshot().await;

        let stats = CrawlStats {
            started_at,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            pages_crawled: shared.pages_crawled.load(Ordering::SeqCst),
            pages_failed: failures.len(),
            tasks_cancelled,
            stop_reason,
        };
        info!(
            "Crawl complete ({}). {} requests from {} pages, {} failed",
            stop_reason,
            requests.len(),
            stats.pages_crawled,
            stats.pages_failed
        );

        Ok(CrawlResult {
            requests,
            all_domains: shared.aggregator.all_domains().await,
            sub_domains: shared.aggregator.sub_domains().await,
            failures,
            stats,
        })
    }
}
