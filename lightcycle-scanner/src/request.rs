use crate::error::{CrawlError, Result};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use url::Url;

/// How a request was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    Target,
    Link,
    Form,
    Navigation,
    Redirect,
    Xhr,
    Fetch,
    WebSocket,
    EventSource,
    Comment,
    StaticResource,
    Robots,
    PathFuzz,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Source::Target => "target",
            Source::Link => "link",
            Source::Form => "form",
            Source::Navigation => "navigation",
            Source::Redirect => "redirect",
            Source::Xhr => "xhr",
            Source::Fetch => "fetch",
            Source::WebSocket => "web-socket",
            Source::EventSource => "event-source",
            Source::Comment => "comment",
            Source::StaticResource => "static-resource",
            Source::Robots => "robots",
            Source::PathFuzz => "path-fuzz",
        };
        f.write_str(name)
    }
}

/// Ordered header map with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Inserts a header, replacing an existing one with the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses a JSON object such as `{"Cookie": "a=b", "X-Retry": 3}`.
    /// Non-string values are stringified.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let object = value
            .as_object()
            .ok_or_else(|| CrawlError::Config("custom headers must be a JSON object".to_string()))?;

        let mut headers = Headers::new();
        for (name, value) in object {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            headers.insert(name.clone(), value);
        }
        Ok(headers)
    }

    /// Overlays `other` on top of `self`.
    pub fn merged(&self, other: &Headers) -> Headers {
        let mut merged = self.clone();
        for (k, v) in other.iter() {
            merged.insert(k, v);
        }
        merged
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

pub const URLENCODED: &str = "application/x-www-form-urlencoded";
pub const MULTIPART: &str = "multipart/form-data";
pub const JSON: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Body {
    pub fn new(content_type: Option<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type,
            data: data.into(),
        }
    }

    pub fn urlencoded<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        Self::new(Some(URLENCODED.to_string()), encoded)
    }

    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Content type without parameters, lowercased.
    pub fn mime(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
    }
}

/// A discovered crawl target. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    url: Url,
    headers: Headers,
    body: Option<Body>,
    source: Source,
}

impl Request {
    pub fn new(method: &str, mut url: Url, source: Source) -> Self {
        url.set_fragment(None);
        Self {
            method: method.trim().to_ascii_uppercase(),
            url,
            headers: Headers::new(),
            body: None,
            source,
        }
    }

    pub fn get(url: Url, source: Source) -> Self {
        Self::new("GET", url, source)
    }

    pub fn parse(method: &str, raw: &str, source: Source) -> Result<Self> {
        let url = Url::parse(raw)?;
        Ok(Self::new(method, url, source))
    }

    /// Resolves `href` against the page's effective base URL. Returns `None`
    /// for pseudo links (`javascript:`, `mailto:`, fragments) and non-web schemes.
    pub fn resolve(base: &Url, href: &str, method: &str, source: Source) -> Option<Self> {
        let href = href.trim();
        let lowered = href.to_ascii_lowercase();
        if href.is_empty()
            || href.starts_with('#')
            || lowered.starts_with("javascript:")
            || lowered.starts_with("mailto:")
            || lowered.starts_with("tel:")
            || lowered.starts_with("data:")
        {
            return None;
        }

        let resolved = base.join(href).ok()?;
        match resolved.scheme() {
            "http" | "https" | "ws" | "wss" => Some(Self::new(method, resolved, source)),
            _ => None,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        if let Some(ref ct) = body.content_type {
            self.headers.insert("Content-Type", ct.clone());
        }
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// Only plain GETs over http(s) are loaded into a browser tab; everything
    /// else is recorded without being replayed.
    pub fn is_navigable(&self) -> bool {
        self.method == "GET" && matches!(self.url.scheme(), "http" | "https")
    }

    /// Lowercased extension of the last path segment, if any.
    pub fn file_ext(&self) -> Option<String> {
        let segment = self.url.path_segments()?.last()?;
        let (stem, ext) = segment.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

impl Serialize for Request {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Request", 5)?;
        state.serialize_field("method", &self.method)?;
        state.serialize_field("url", self.url.as_str())?;
        state.serialize_field("headers", &self.headers)?;
        state.serialize_field("body", &self.body.as_ref().map(Body::as_text))?;
        state.serialize_field("discoveredFrom", &self.source)?;
        state.end()
    }
}

/// A queued unit of work.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    pub request: Request,
    pub depth: usize,
    pub referrer: Option<Url>,
}

impl CrawlTask {
    pub fn seed(request: Request) -> Self {
        Self {
            request,
            depth: 0,
            referrer: None,
        }
    }

    /// A task discovered while processing `self`, one level deeper.
    pub fn child(&self, request: Request) -> Self {
        Self {
            request,
            depth: self.depth + 1,
            referrer: Some(self.request.url().clone()),
        }
    }
}
