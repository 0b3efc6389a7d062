// Request fingerprinting and the shared "seen" set

use crate::error::CrawlError;
use crate::request::{Body, JSON, MULTIPART, Request, URLENCODED};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tokio::sync::Mutex;
use url::Url;

/// Query parameters dropped before fingerprinting. A trailing `*` matches by prefix.
pub const DEFAULT_TRACKING_PARAMS: &[&str] = &[
    "utm_*", "fbclid", "gclid", "dclid", "msclkid", "yclid", "mc_cid", "mc_eid", "_ga", "igshid",
];

static MULTIPART_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)content-disposition:\s*form-data;\s*name="([^"]*)""#).unwrap());

static HASH_LIKE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{16,}$").unwrap());

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterMode {
    /// Query values are part of the identity.
    #[default]
    Simple,
    /// Numeric and token-like query values collapse to a shape class.
    Smart,
}

impl FromStr for FilterMode {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simple" => Ok(FilterMode::Simple),
            "smart" => Ok(FilterMode::Smart),
            other => Err(CrawlError::Config(format!("unknown filter mode '{}'", other))),
        }
    }
}

/// Normalized identity of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    mode: FilterMode,
    denylist: Vec<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(
            FilterMode::Simple,
            DEFAULT_TRACKING_PARAMS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl Normalizer {
    pub fn new(mode: FilterMode, denylist: Vec<String>) -> Self {
        let denylist = denylist.into_iter().map(|p| p.to_ascii_lowercase()).collect();
        Self { mode, denylist }
    }

    fn is_tracking(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.denylist.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => name == *pattern,
        })
    }

    /// Canonical form of a URL: lowercased scheme and host, no default port,
    /// no fragment, tracking parameters removed, query sorted by name.
    /// Scheme/host casing, default ports and the empty-path slash are
    /// already canonical once parsed by `url`.
    pub fn normalize_url(&self, url: &Url) -> Url {
        let mut url = url.clone();
        url.set_fragment(None);

        if url.query().is_some() {
            let mut pairs: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| !self.is_tracking(k))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            // Stable: repeated names keep their relative order.
            pairs.sort_by(|a, b| a.0.cmp(&b.0));

            if pairs.is_empty() {
                url.set_query(None);
            } else {
                let query = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                    .finish();
                url.set_query(Some(&query));
            }
        }
        url
    }

    /// The string that is hashed into a fingerprint.
    pub fn canonical(&self, request: &Request) -> String {
        let mut url = self.normalize_url(request.url());

        if self.mode == FilterMode::Smart && url.query().is_some() {
            let shaped: Vec<(String, String)> = url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), value_shape(&v)))
                .collect();
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(shaped.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .finish();
            url.set_query(Some(&query));
        }

        let body = request.body().map(body_shape).unwrap_or_default();
        format!("{} {} {}", request.method(), url, body)
    }

    pub fn normalize(&self, request: &Request) -> Fingerprint {
        let digest = Sha256::digest(self.canonical(request).as_bytes());
        Fingerprint(hex::encode(digest))
    }
}

fn value_shape(value: &str) -> String {
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        "{int}".to_string()
    } else if HASH_LIKE.is_match(value) {
        "{hash}".to_string()
    } else {
        value.to_string()
    }
}

/// Structural description of a body: sorted parameter names, never values.
fn body_shape(body: &Body) -> String {
    let mime = body.mime().unwrap_or_default();
    let mut names: Vec<String> = if mime == URLENCODED {
        url::form_urlencoded::parse(&body.data)
            .map(|(k, _)| k.into_owned())
            .collect()
    } else if mime == MULTIPART {
        MULTIPART_NAME
            .captures_iter(&body.as_text())
            .map(|c| c[1].to_string())
            .collect()
    } else if mime == JSON || mime.ends_with("+json") {
        match serde_json::from_slice::<serde_json::Value>(&body.data) {
            Ok(serde_json::Value::Object(map)) => map.keys().cloned().collect(),
            _ => return format!("raw:{}", hex::encode(Sha256::digest(&body.data))),
        }
    } else {
        return format!("raw:{}", hex::encode(Sha256::digest(&body.data)));
    };

    names.sort();
    names.dedup();
    format!("params:{}", names.join("&"))
}

/// The shared "seen" set. Check-and-mark is one critical section.
pub struct Deduplicator {
    normalizer: Normalizer,
    seen: Mutex<HashSet<Fingerprint>>,
}

impl Deduplicator {
    pub fn new(normalizer: Normalizer) -> Self {
        Self {
            normalizer,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn normalize(&self, request: &Request) -> Fingerprint {
        self.normalizer.normalize(request)
    }

    pub async fn seen(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.lock().await.contains(fingerprint)
    }

    /// Marks `fingerprint` as seen. Returns `true` if this call inserted it,
    /// `false` if another caller got there first.
    pub async fn mark_seen(&self, fingerprint: Fingerprint) -> bool {
        self.seen.lock().await.insert(fingerprint)
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(Normalizer::default())
    }
}
