// Scripted in-memory browser for engine tests

use crate::browser::{Action, BrowserLauncher, BrowserSession, NetworkEvent, PageSnapshot, ResourceKind};
use crate::dom::parse_page;
use crate::error::{CrawlError, Result};
use crate::request::Request;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

#[derive(Clone, Default)]
pub struct ScriptedPage {
    body: String,
    xhr: Vec<NetworkEvent>,
    on_action: HashMap<String, Vec<NetworkEvent>>,
    never_idle: bool,
    busy_after_actions: bool,
    stalls: Vec<String>,
    failure: Option<String>,
    load_time: Duration,
}

impl ScriptedPage {
    pub fn html(body: &str) -> Self {
        Self {
            body: body.to_string(),
            ..Default::default()
        }
    }

    pub fn xhr(mut self, event: NetworkEvent) -> Self {
        self.xhr.push(event);
        self
    }

    pub fn on_action(mut self, selector: &str, event: NetworkEvent) -> Self {
        self.on_action.entry(selector.to_string()).or_default().push(event);
        self
    }

    pub fn never_idle(mut self) -> Self {
        self.never_idle = true;
        self
    }

    /// The network never goes quiet once an action has fired.
    pub fn busy_after_actions(mut self) -> Self {
        self.busy_after_actions = true;
        self
    }

    /// Dispatching an action on `selector` never returns.
    pub fn stall_on(mut self, selector: &str) -> Self {
        self.stalls.push(selector.to_string());
        self
    }

    pub fn fail(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    pub fn load_time(mut self, load_time: Duration) -> Self {
        self.load_time = load_time;
        self
    }
}

/// A fake site. Unknown URLs render an empty page.
#[derive(Default)]
pub struct ScriptedSite {
    pages: HashMap<String, ScriptedPage>,
    visits: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, page: ScriptedPage) -> Self {
        let key = Url::parse(url).map(|u| u.to_string()).unwrap_or_else(|_| url.to_string());
        self.pages.insert(key, page);
        self
    }

    pub fn visits(&self, url: &str) -> usize {
        self.visits.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_visits(&self) -> usize {
        self.visits.lock().unwrap().values().sum()
    }

    /// Highest number of navigations observed at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct ScriptedLauncher {
    pub site: Arc<ScriptedSite>,
    pub max_sessions: usize,
    opened: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn new(site: ScriptedSite) -> Self {
        Self {
            site: Arc::new(site),
            max_sessions: usize::MAX,
            opened: AtomicUsize::new(0),
        }
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn open_session(&self) -> Result<Box<dyn BrowserSession>> {
        if self.opened.fetch_add(1, Ordering::SeqCst) >= self.max_sessions {
            return Err(CrawlError::BrowserLaunch("scripted browser refused a tab".into()));
        }
        Ok(Box::new(ScriptedSession {
            site: self.site.clone(),
            current: None,
            pending: Vec::new(),
            acted: false,
        }))
    }
}

pub struct ScriptedSession {
    site: Arc<ScriptedSite>,
    current: Option<(Url, ScriptedPage)>,
    pending: Vec<NetworkEvent>,
    acted: bool,
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&mut self, request: &Request) -> Result<()> {
        let url = request.url().clone();
        let key = url.to_string();
        *self.site.visits.lock().unwrap().entry(key.clone()).or_default() += 1;
        let page = self.site.pages.get(&key).cloned().unwrap_or_default();

        let active = self.site.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.site.peak.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(page.load_time).await;
        self.site.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(ref reason) = page.failure {
            return Err(CrawlError::Navigation(reason.clone()));
        }

        self.acted = false;
        self.pending.clear();
        self.pending
            .push(NetworkEvent::new(request.method(), url.as_str(), ResourceKind::Document));
        self.pending.extend(page.xhr.iter().cloned());
        self.current = Some((url, page));
        Ok(())
    }

    async fn wait_quiescent(&mut self, _idle: Duration) -> Result<()> {
        let acted = self.acted;
        if self
            .current
            .as_ref()
            .is_some_and(|(_, page)| page.never_idle || (acted && page.busy_after_actions))
        {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn list_network_events(&mut self) -> Result<Vec<NetworkEvent>> {
        Ok(std::mem::take(&mut self.pending))
    }

    async fn enumerate_interactive_elements(&mut self) -> Result<PageSnapshot> {
        match self.current {
            Some((ref url, ref page)) => Ok(parse_page(&page.body, url)),
            None => Err(CrawlError::Navigation("nothing loaded".into())),
        }
    }

    async fn dispatch_action(&mut self, action: &Action) -> Result<()> {
        let Some((_, ref page)) = self.current else {
            return Ok(());
        };
        if page.stalls.iter().any(|s| s == action.selector()) {
            std::future::pending::<()>().await;
        }
        if let Some(events) = page.on_action.get(action.selector()) {
            self.pending.extend(events.iter().cloned());
        }
        self.acted = true;
        Ok(())
    }
}
