// Replays discovered requests through an intercepting proxy

use lightcycle_scanner::{CrawlError, Request, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub const DEFAULT_PUSH_POOL_MAX: usize = 10;

/// Outcome of a replay run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub sent: usize,
    pub failed: usize,
}

pub struct ProxyPusher {
    client: Client,
    pool_max: usize,
}

impl ProxyPusher {
    pub fn new(proxy: &str, pool_max: usize) -> Result<Self> {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| CrawlError::Config(format!("invalid push proxy '{}': {}", proxy, e)))?;
        let client = Client::builder()
            .proxy(proxy)
            .timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            client,
            pool_max: pool_max.max(1),
        })
    }

    async fn send(client: &Client, request: &Request) -> Result<u16> {
        let method = reqwest::Method::from_bytes(request.method().as_bytes())
            .map_err(|e| CrawlError::Other(e.to_string()))?;
        let mut builder = client.request(method, request.url().clone());
        for (name, value) in request.headers().iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.data.clone());
        }
        let response = builder.send().await?;
        Ok(response.status().as_u16())
    }

    /// Send every request once. Failures are counted and logged.
    pub async fn push(&self, requests: Vec<Request>) -> PushSummary {
        let semaphore = Arc::new(Semaphore::new(self.pool_max));
        let mut tasks = Vec::new();

        for request in requests {
            let client = self.client.clone();
            let semaphore = semaphore.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                match Self::send(&client, &request).await {
                    Ok(status) => {
                        debug!("Pushed {} ({})", request, status);
                        Some(())
                    }
                    Err(e) => {
                        warn!("Failed to push {}: {}", request, e);
                        None
                    }
                }
            }));
        }

        let mut summary = PushSummary::default();
        for task in tasks {
            match task.await {
                Ok(Some(())) => summary.sent += 1,
                _ => summary.failed += 1,
            }
        }

        info!(
            "Pushed {} requests to proxy, {} failed",
            summary.sent, summary.failed
        );
        summary
    }
}
