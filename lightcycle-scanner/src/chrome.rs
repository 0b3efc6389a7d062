// Chromium backend over the DevTools protocol, one tab per session

use crate::browser::{Action, BrowserLauncher, BrowserSession, NetworkEvent, PageSnapshot, ResourceKind};
use crate::config::BrowserOptions;
use crate::dom::parse_page;
use crate::error::{CrawlError, Result};
use crate::request::{Headers, Request};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    self, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventWebSocketCreated,
    GetRequestPostDataParams, ResourceType, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

// Runs before page scripts: remembers event types registered per element.
const LISTENER_HOOK_JS: &str = r#"
(() => {
  const original = EventTarget.prototype.addEventListener;
  EventTarget.prototype.addEventListener = function (type, listener, options) {
    try {
      if (this instanceof Element) {
        this.__lcEvents = this.__lcEvents || [];
        if (!this.__lcEvents.includes(type)) this.__lcEvents.push(type);
      }
    } catch (e) {}
    return original.call(this, type, listener, options);
  };
  window.close = function () {};
})();
"#;

// Marks elements that react to events with data-lc-action/data-lc-event.
const STAMP_ACTIONS_JS: &str = r#"
(() => {
  const wanted = ['click', 'dblclick', 'mouseover', 'mousedown', 'change', 'focus', 'keyup'];
  let next = document.querySelectorAll('[data-lc-action]').length;
  for (const el of document.querySelectorAll('*')) {
    if (el.hasAttribute('data-lc-action')) continue;
    let event = null;
    for (const type of wanted) {
      if (el.hasAttribute('on' + type) || typeof el['on' + type] === 'function'
          || (el.__lcEvents && el.__lcEvents.includes(type))) {
        event = type;
        break;
      }
    }
    if (!event && el.tagName === 'A' && /^\s*javascript:/i.test(el.getAttribute('href') || '')) {
      event = 'click';
    }
    if (event) {
      el.setAttribute('data-lc-action', String(next++));
      el.setAttribute('data-lc-event', event);
    }
  }
  return next;
})()
"#;

fn dispatch_script(action: &Action) -> Result<String> {
    let (selector, event) = match action {
        Action::Click { selector } => (selector.as_str(), "click"),
        Action::Trigger { selector, event } => (selector.as_str(), event.as_str()),
    };
    Ok(format!(
        r#"(() => {{
  const el = document.querySelector({selector});
  if (!el) return false;
  const init = {{ bubbles: true, cancelable: true }};
  const ev = /^(click|dblclick|mouse)/.test({event}) ? new MouseEvent({event}, init) : new Event({event}, init);
  el.dispatchEvent(ev);
  return true;
}})()"#,
        selector = serde_json::to_string(selector)?,
        event = serde_json::to_string(event)?,
    ))
}

fn resource_kind(kind: Option<&ResourceType>) -> ResourceKind {
    match kind {
        Some(ResourceType::Document) => ResourceKind::Document,
        Some(ResourceType::Xhr) => ResourceKind::Xhr,
        Some(ResourceType::Fetch) => ResourceKind::Fetch,
        Some(ResourceType::WebSocket) => ResourceKind::WebSocket,
        Some(ResourceType::EventSource) => ResourceKind::EventSource,
        Some(ResourceType::Script) => ResourceKind::Script,
        Some(ResourceType::Stylesheet) => ResourceKind::Stylesheet,
        Some(ResourceType::Image) => ResourceKind::Image,
        Some(ResourceType::Font) => ResourceKind::Font,
        Some(ResourceType::Media) => ResourceKind::Media,
        _ => ResourceKind::Other,
    }
}

fn headers_from_json(value: &serde_json::Value) -> Headers {
    value
        .as_object()
        .map(|object| {
            object
                .iter()
                .map(|(k, v)| {
                    let v = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (k.clone(), v)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn cdp_error(alive: &AtomicBool, e: impl std::fmt::Display) -> CrawlError {
    if alive.load(Ordering::SeqCst) {
        CrawlError::Navigation(e.to_string())
    } else {
        CrawlError::BrowserCrash(e.to_string())
    }
}

/// Network activity of one tab. Requests are keyed to the loader of the
/// document that issued them, so stragglers from a previous page are dropped.
struct Traffic {
    in_flight: HashSet<String>,
    last_activity: Instant,
    events: Vec<NetworkEvent>,
    loaders: HashSet<String>,
    retired: HashSet<String>,
}

impl Traffic {
    fn new() -> Self {
        Self {
            in_flight: HashSet::new(),
            last_activity: Instant::now(),
            events: Vec::new(),
            loaders: HashSet::new(),
            retired: HashSet::new(),
        }
    }

    /// Starts a new page. Loaders seen so far are retired.
    fn reset(&mut self) {
        let loaders = std::mem::take(&mut self.loaders);
        self.retired.extend(loaders);
        self.in_flight.clear();
        self.events.clear();
        self.last_activity = Instant::now();
    }

    /// Records a request unless a retired loader issued it.
    fn record(&mut self, loader: &str, request_id: &str, event: NetworkEvent) -> bool {
        if self.retired.contains(loader) {
            return false;
        }
        self.loaders.insert(loader.to_string());
        self.in_flight.insert(request_id.to_string());
        self.last_activity = Instant::now();
        self.events.push(event);
        true
    }

    fn settle(&mut self, request_id: &str) {
        self.in_flight.remove(request_id);
        self.last_activity = Instant::now();
    }
}

pub struct ChromeLauncher {
    browser: Mutex<Browser>,
    handler_task: JoinHandle<()>,
    alive: Arc<AtomicBool>,
    headers: Headers,
    user_agent: String,
}

impl ChromeLauncher {
    /// Starts Chromium, or connects to a running one when a remote URL is set.
    pub async fn launch(options: &BrowserOptions, headers: Headers) -> Result<Self> {
        let (browser, mut handler) = if let Some(ref url) = options.remote_url {
            info!("Connecting to remote Chrome instance at: {}", url);
            Browser::connect(url.clone())
                .await
                .map_err(|e| CrawlError::BrowserLaunch(format!("connect {}: {}", url, e)))?
        } else {
            let mut builder = BrowserConfig::builder()
                .no_sandbox()
                .request_timeout(Duration::from_secs(30))
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage")
                .arg("--ignore-certificate-errors");
            if !options.headless {
                builder = builder.with_head();
            }
            if let Some(ref executable) = options.executable {
                builder = builder.chrome_executable(executable);
            }
            if let Some(ref proxy) = options.proxy {
                builder = builder.arg(format!("--proxy-server={}", proxy));
            }
            let config = builder.build().map_err(CrawlError::BrowserLaunch)?;
            Browser::launch(config)
                .await
                .map_err(|e| CrawlError::BrowserLaunch(e.to_string()))?
        };

        let alive = Arc::new(AtomicBool::new(true));
        let handler_task = {
            let alive = alive.clone();
            tokio::spawn(async move {
                while let Some(h) = handler.next().await {
                    if h.is_err() {
                        break;
                    }
                }
                alive.store(false, Ordering::SeqCst);
                debug!("Browser handler finished");
            })
        };

        Ok(Self {
            browser: Mutex::new(browser),
            handler_task,
            alive,
            headers,
            user_agent: options.user_agent.clone(),
        })
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn open_session(&self) -> Result<Box<dyn BrowserSession>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| CrawlError::BrowserLaunch(e.to_string()))?;
        let session = ChromeSession::attach(page, self.alive.clone(), &self.headers, &self.user_agent)
            .await?;
        Ok(Box::new(session))
    }

    async fn shutdown(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            debug!("Browser close: {}", e);
        }
        if let Err(e) = browser.wait().await {
            debug!("Browser wait: {}", e);
        }
        self.handler_task.abort();
    }
}

pub struct ChromeSession {
    page: Page,
    alive: Arc<AtomicBool>,
    traffic: Arc<Mutex<Traffic>>,
    listeners: Vec<JoinHandle<()>>,
    current: Option<Url>,
}

impl ChromeSession {
    async fn attach(
        page: Page,
        alive: Arc<AtomicBool>,
        headers: &Headers,
        user_agent: &str,
    ) -> Result<Self> {
        let launch_err = |e: chromiumoxide::error::CdpError| CrawlError::BrowserLaunch(e.to_string());

        page.execute(network::EnableParams::default())
            .await
            .map_err(launch_err)?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(LISTENER_HOOK_JS))
            .await
            .map_err(launch_err)?;
        page.set_user_agent(user_agent).await.map_err(launch_err)?;
        if !headers.is_empty() {
            let object: serde_json::Map<String, serde_json::Value> = headers
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
                .collect();
            page.execute(SetExtraHttpHeadersParams::new(network::Headers::new(
                serde_json::Value::Object(object),
            )))
            .await
            .map_err(launch_err)?;
        }

        let traffic = Arc::new(Mutex::new(Traffic::new()));
        let mut listeners = Vec::new();

        let mut sent = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(launch_err)?;
        listeners.push({
            let traffic = traffic.clone();
            let page = page.clone();
            tokio::spawn(async move {
                while let Some(event) = sent.next().await {
                    if event.request.url.starts_with("data:") {
                        continue;
                    }
                    let body = if event.request.has_post_data == Some(true) {
                        page.execute(GetRequestPostDataParams::new(event.request_id.clone()))
                            .await
                            .ok()
                            .map(|r| r.result.post_data.clone())
                    } else {
                        None
                    };

                    let mut recorded = NetworkEvent::new(
                        &event.request.method,
                        &event.request.url,
                        resource_kind(event.r#type.as_ref()),
                    );
                    recorded.headers = headers_from_json(event.request.headers.inner());
                    recorded.body = body;
                    recorded.redirected_from = event.redirect_response.as_ref().map(|r| r.url.clone());

                    let loader = event.loader_id.inner();
                    if !traffic.lock().await.record(loader, event.request_id.inner(), recorded) {
                        debug!("Dropped {} from a previous document", event.request.url);
                    }
                }
            })
        });

        let mut finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(launch_err)?;
        listeners.push({
            let traffic = traffic.clone();
            tokio::spawn(async move {
                while let Some(event) = finished.next().await {
                    traffic.lock().await.settle(event.request_id.inner());
                }
            })
        });

        let mut failed = page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(launch_err)?;
        listeners.push({
            let traffic = traffic.clone();
            tokio::spawn(async move {
                while let Some(event) = failed.next().await {
                    traffic.lock().await.settle(event.request_id.inner());
                }
            })
        });

        let mut sockets = page
            .event_listener::<EventWebSocketCreated>()
            .await
            .map_err(launch_err)?;
        listeners.push({
            let traffic = traffic.clone();
            tokio::spawn(async move {
                while let Some(event) = sockets.next().await {
                    let mut traffic = traffic.lock().await;
                    traffic
                        .events
                        .push(NetworkEvent::new("GET", &event.url, ResourceKind::WebSocket));
                }
            })
        });

        Ok(Self {
            page,
            alive,
            traffic,
            listeners,
            current: None,
        })
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&mut self, request: &Request) -> Result<()> {
        self.traffic.lock().await.reset();
        self.current = Some(request.url().clone());
        self.page
            .goto(request.url().as_str())
            .await
            .map_err(|e| cdp_error(&self.alive, e))?;
        Ok(())
    }

    async fn wait_quiescent(&mut self, idle: Duration) -> Result<()> {
        loop {
            if !self.alive.load(Ordering::SeqCst) {
                return Err(CrawlError::BrowserCrash("browser connection closed".to_string()));
            }
            {
                let traffic = self.traffic.lock().await;
                if traffic.in_flight.is_empty() && traffic.last_activity.elapsed() >= idle {
                    return Ok(());
                }
            }
            tokio::time::sleep(POLL_INTERVAL.min(idle)).await;
        }
    }

    async fn list_network_events(&mut self) -> Result<Vec<NetworkEvent>> {
        Ok(std::mem::take(&mut self.traffic.lock().await.events))
    }

    async fn enumerate_interactive_elements(&mut self) -> Result<PageSnapshot> {
        let stamped = self
            .page
            .evaluate(STAMP_ACTIONS_JS)
            .await
            .map_err(|e| cdp_error(&self.alive, e))?;
        debug!("Stamped actions: {:?}", stamped.value());

        let html = self
            .page
            .content()
            .await
            .map_err(|e| cdp_error(&self.alive, e))?;
        let url = self
            .page
            .url()
            .await
            .ok()
            .flatten()
            .and_then(|u| Url::parse(&u).ok())
            .or_else(|| self.current.clone())
            .ok_or_else(|| CrawlError::Navigation("no page loaded".to_string()))?;
        Ok(parse_page(&html, &url))
    }

    async fn dispatch_action(&mut self, action: &Action) -> Result<()> {
        let script = dispatch_script(action)?;
        let fired = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| cdp_error(&self.alive, e))?;
        if fired.into_value::<bool>().unwrap_or(false) {
            Ok(())
        } else {
            Err(CrawlError::Other(format!("no element matches {}", action.selector())))
        }
    }

    fn is_healthy(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        if let Err(e) = self.page.clone().close().await {
            warn!("Failed to close tab: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_script_escapes_selector() {
        let script = dispatch_script(&Action::Click {
            selector: r#"[data-lc-action="3"]"#.to_string(),
        })
        .unwrap();
        assert!(script.contains(r#"document.querySelector("[data-lc-action=\"3\"]")"#));
        assert!(script.contains(r#"new MouseEvent("click", init)"#));

        let script = dispatch_script(&Action::Trigger {
            selector: "#q".to_string(),
            event: "change".to_string(),
        })
        .unwrap();
        assert!(script.contains(r#"new Event("change", init)"#));
    }

    #[test]
    fn test_resource_kinds() {
        assert_eq!(resource_kind(Some(&ResourceType::Xhr)), ResourceKind::Xhr);
        assert_eq!(resource_kind(Some(&ResourceType::Document)), ResourceKind::Document);
        assert_eq!(resource_kind(Some(&ResourceType::Ping)), ResourceKind::Other);
        assert_eq!(resource_kind(None), ResourceKind::Other);
    }

    #[tokio::test]
    async fn test_traffic_drops_requests_from_previous_document() {
        let mut traffic = Traffic::new();
        let xhr = |url: &str| NetworkEvent::new("GET", url, ResourceKind::Xhr);

        assert!(traffic.record("loader-1", "1.1", xhr("http://example.test/first/api")));
        traffic.reset();
        assert!(traffic.events.is_empty());
        assert!(traffic.in_flight.is_empty());

        // A late request from the first page arrives after the second navigation
        assert!(!traffic.record("loader-1", "1.2", xhr("http://example.test/first/late")));
        assert!(traffic.record("loader-2", "2.1", xhr("http://example.test/second/api")));
        traffic.settle("2.1");

        let urls: Vec<String> = traffic.events.iter().map(|e| e.url.clone()).collect();
        assert_eq!(urls, vec!["http://example.test/second/api"]);
        assert!(traffic.in_flight.is_empty());
    }

    #[test]
    fn test_headers_from_devtools_json() {
        let headers = headers_from_json(&serde_json::json!({
            "Content-Type": "application/json",
            "X-Count": 2
        }));
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("x-count"), Some("2"));
    }
}
