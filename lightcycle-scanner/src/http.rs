// Script-less backend over plain HTTP

use crate::browser::{Action, BrowserLauncher, BrowserSession, NetworkEvent, PageSnapshot, ResourceKind};
use crate::config::BrowserOptions;
use crate::dom::parse_page;
use crate::error::{CrawlError, Result};
use crate::request::Request;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub struct HttpLauncher {
    client: Client,
}

impl HttpLauncher {
    pub fn new(options: &BrowserOptions, timeout: Duration) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(options.user_agent.as_str())
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(5));

        if let Some(ref proxy) = options.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| CrawlError::Config(format!("invalid proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| CrawlError::BrowserLaunch(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BrowserLauncher for HttpLauncher {
    async fn open_session(&self) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            page: None,
            events: Vec::new(),
        }))
    }
}

struct LoadedPage {
    url: Url,
    body: String,
    is_html: bool,
}

pub struct HttpSession {
    client: Client,
    page: Option<LoadedPage>,
    events: Vec<NetworkEvent>,
}

#[async_trait]
impl BrowserSession for HttpSession {
    async fn navigate(&mut self, request: &Request) -> Result<()> {
        debug!("Fetching {}", request);
        let method = reqwest::Method::from_bytes(request.method().as_bytes())
            .map_err(|e| CrawlError::Navigation(e.to_string()))?;

        let mut builder = self.client.request(method, request.url().clone());
        for (name, value) in request.headers().iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.data.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CrawlError::Navigation(e.to_string()))?;

        let final_url = response.url().clone();
        let is_html = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false);

        self.events.clear();
        self.events.push(NetworkEvent::new(
            request.method(),
            request.url().as_str(),
            ResourceKind::Document,
        ));
        if final_url != *request.url() {
            let mut redirect = NetworkEvent::new("GET", final_url.as_str(), ResourceKind::Document);
            redirect.redirected_from = Some(request.url().to_string());
            self.events.push(redirect);
        }

        let body = response
            .text()
            .await
            .map_err(|e| CrawlError::Navigation(e.to_string()))?;
        self.page = Some(LoadedPage {
            url: final_url,
            body,
            is_html,
        });
        Ok(())
    }

    async fn wait_quiescent(&mut self, _idle: Duration) -> Result<()> {
        Ok(())
    }

    async fn list_network_events(&mut self) -> Result<Vec<NetworkEvent>> {
        Ok(std::mem::take(&mut self.events))
    }

    async fn enumerate_interactive_elements(&mut self) -> Result<PageSnapshot> {
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| CrawlError::Navigation("no page loaded".to_string()))?;
        if page.is_html {
            Ok(parse_page(&page.body, &page.url))
        } else {
            Ok(PageSnapshot::empty(page.url.clone()))
        }
    }

    async fn dispatch_action(&mut self, action: &Action) -> Result<()> {
        Err(CrawlError::Other(format!(
            "cannot fire events on {} without a scripting browser",
            action.selector()
        )))
    }
}
