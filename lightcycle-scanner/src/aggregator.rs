// Result collection shared by all workers

use crate::fingerprint::{Fingerprint, Normalizer};
use crate::request::Request;
use crate::result::DiscoveredRequest;
use crate::scope::is_subdomain_of;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

#[derive(Default)]
struct Collected {
    index: HashSet<Fingerprint>,
    requests: Vec<DiscoveredRequest>,
    domains: Vec<String>,
    domain_index: HashSet<String>,
}

/// Accumulates unique requests in first-discovered order.
pub struct Aggregator {
    normalizer: Normalizer,
    root_domain: String,
    collected: Mutex<Collected>,
}

impl Aggregator {
    pub fn new(normalizer: Normalizer, root_domain: impl Into<String>) -> Self {
        Self {
            normalizer,
            root_domain: root_domain.into(),
            collected: Mutex::new(Collected::default()),
        }
    }

    /// Adds `request` unless one with the same fingerprint is already present.
    pub async fn record(&self, request: Request) -> bool {
        let fingerprint = self.normalizer.normalize(&request);
        let mut collected = self.collected.lock().await;
        if !collected.index.insert(fingerprint.clone()) {
            return false;
        }
        debug!("Recorded {} ({})", request, request.source());
        collected.requests.push(DiscoveredRequest {
            request,
            fingerprint,
        });
        true
    }

    /// Notes the host of any URL seen during the run, in scope or not.
    pub async fn observe_host(&self, url: &Url) {
        let Some(host) = url.host_str() else {
            return;
        };
        let host = host.to_ascii_lowercase();
        let mut collected = self.collected.lock().await;
        if collected.domain_index.insert(host.clone()) {
            collected.domains.push(host);
        }
    }

    pub async fn len(&self) -> usize {
        self.collected.lock().await.requests.len()
    }

    pub async fn snapshot(&self) -> Vec<DiscoveredRequest> {
        self.collected.lock().await.requests.clone()
    }

    pub async fn all_domains(&self) -> Vec<String> {
        self.collected.lock().await.domains.clone()
    }

    /// Observed hosts under the seed's root domain.
    pub async fn sub_domains(&self) -> Vec<String> {
        self.collected
            .lock()
            .await
            .domains
            .iter()
            .filter(|d| is_subdomain_of(d, &self.root_domain))
            .cloned()
            .collect()
    }
}
