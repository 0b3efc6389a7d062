// Browser capability interface the engine drives

use crate::error::Result;
use crate::request::{Headers, Request};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// What kind of resource the browser was loading when it issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Document,
    Xhr,
    Fetch,
    WebSocket,
    EventSource,
    Script,
    Stylesheet,
    Image,
    Font,
    Media,
    Other,
}

/// A request observed on the browser's network layer.
#[derive(Debug, Clone)]
pub struct NetworkEvent {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
    pub kind: ResourceKind,
    /// Set when this request is the target of a redirect.
    pub redirected_from: Option<String>,
}

impl NetworkEvent {
    pub fn new(method: &str, url: &str, kind: ResourceKind) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            headers: Headers::new(),
            body: None,
            kind,
            redirected_from: None,
        }
    }
}

/// An input-like element inside a form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormField {
    /// `input`, `select`, `textarea` or `button`.
    pub tag: String,
    pub name: String,
    /// Lowercased `type` attribute; `text` when absent.
    pub input_type: String,
    pub value: Option<String>,
    pub id: Option<String>,
    pub placeholder: Option<String>,
    /// Option values for `select`.
    pub options: Vec<String>,
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormElement {
    pub action: Option<String>,
    pub method: String,
    pub enctype: Option<String>,
    pub fields: Vec<FormField>,
}

/// A DOM event the engine may fire to surface client-side behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Click { selector: String },
    Trigger { selector: String, event: String },
}

impl Action {
    pub fn selector(&self) -> &str {
        match self {
            Action::Click { selector } | Action::Trigger { selector, .. } => selector,
        }
    }
}

/// Interactive elements of the currently loaded page.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    /// URL of the document after redirects.
    pub url: Url,
    /// Effective base for relative references (`<base href>` or `url`).
    pub base_url: Url,
    pub anchors: Vec<String>,
    pub forms: Vec<FormElement>,
    pub actions: Vec<Action>,
    /// URLs mentioned in HTML comments.
    pub comment_urls: Vec<String>,
}

impl PageSnapshot {
    pub fn empty(url: Url) -> Self {
        Self {
            base_url: url.clone(),
            url,
            anchors: Vec::new(),
            forms: Vec::new(),
            actions: Vec::new(),
            comment_urls: Vec::new(),
        }
    }
}

/// One leased browser context (a tab).
#[async_trait]
pub trait BrowserSession: Send {
    /// Loads `request` into the context. Returns once navigation has committed.
    async fn navigate(&mut self, request: &Request) -> Result<()>;

    /// Resolves once no network request has been in flight for `idle`.
    /// Never gives up on its own; callers bound it with a timeout.
    async fn wait_quiescent(&mut self, idle: Duration) -> Result<()>;

    /// Drains the requests observed since the last call.
    async fn list_network_events(&mut self) -> Result<Vec<NetworkEvent>>;

    async fn enumerate_interactive_elements(&mut self) -> Result<PageSnapshot>;

    async fn dispatch_action(&mut self, action: &Action) -> Result<()>;

    /// `false` once the context is unusable (crashed target, closed socket).
    fn is_healthy(&self) -> bool {
        true
    }

    async fn close(&mut self) {}
}

/// Opens browser contexts for the session pool.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn BrowserSession>>;

    async fn shutdown(&self) {}
}
