// Scope filtering, applied before anything is queued

use crate::request::Request;
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::debug;
use url::Url;

/// Static asset extensions that are never worth a browser tab.
pub const DEFAULT_EXCLUDED_EXTENSIONS: &[&str] = &[
    "png", "gif", "jpg", "jpeg", "bmp", "webp", "ico", "svg", "tif", "tiff", "mp4", "mp3", "ogg",
    "wav", "aac", "mid", "m4a", "m4v", "avi", "mov", "mpg", "mpeg", "wmv", "flv", "rm", "rmvb",
    "3gp", "ttf", "otf", "woff", "woff2", "eot", "pdf", "doc", "docx", "xls", "xlsx", "ppt",
    "pptx", "odt", "ods", "odp", "exe", "dll", "bin", "dmg", "apk", "iso", "zip", "rar", "tar",
    "gz", "bz2", "7z", "csv", "txt", "map", "swf", "css", "js", "less", "crt",
];

// Second-level labels under which registrations happen one level deeper,
// e.g. example.co.uk.
const SHARED_SECOND_LEVEL: &[&str] = &["co", "com", "net", "org", "gov", "edu", "ac"];

#[derive(Debug, Clone)]
pub struct ScopePolicy {
    pub include_subdomains: bool,
    pub path_prefix: Option<String>,
    pub excluded_extensions: HashSet<String>,
    pub max_depth: usize,
}

impl Default for ScopePolicy {
    fn default() -> Self {
        Self {
            include_subdomains: false,
            path_prefix: None,
            excluded_extensions: DEFAULT_EXCLUDED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_depth: 10,
        }
    }
}

/// Why a request was kept or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeDecision {
    InScope,
    UnsupportedScheme,
    OutOfDomain,
    OutsidePathPrefix,
    ExcludedExtension,
    TooDeep,
}

/// Approximate registrable domain of `host`: the last two labels, or three
/// under shared second-level labels like `co.uk`. IPs and single labels are
/// returned unchanged.
pub fn root_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<IpAddr>().is_ok() || host.starts_with('[') {
        return host;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }

    let tld = labels[labels.len() - 1];
    let sld = labels[labels.len() - 2];
    let keep = if tld.len() == 2 && SHARED_SECOND_LEVEL.contains(&sld) {
        3
    } else {
        2
    };
    labels[labels.len() - keep..].join(".")
}

pub fn is_subdomain_of(host: &str, root: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let root = root.to_ascii_lowercase();
    host == root || host.ends_with(&format!(".{}", root))
}

/// Contract form of the scope check.
pub fn in_scope(request: &Request, root_domain: &str, policy: &ScopePolicy, depth: usize) -> bool {
    ScopeFilter::for_root(root_domain, policy.clone()).in_scope(request, depth)
}

#[derive(Debug, Clone)]
pub struct ScopeFilter {
    seed_host: String,
    root_domain: String,
    policy: ScopePolicy,
}

impl ScopeFilter {
    pub fn new(seed: &Url, policy: ScopePolicy) -> Self {
        let seed_host = seed.host_str().unwrap_or_default().to_ascii_lowercase();
        Self {
            root_domain: root_domain(&seed_host),
            seed_host,
            policy,
        }
    }

    fn for_root(root: &str, policy: ScopePolicy) -> Self {
        Self {
            seed_host: root.to_ascii_lowercase(),
            root_domain: root.to_ascii_lowercase(),
            policy,
        }
    }

    pub fn root_domain(&self) -> &str {
        &self.root_domain
    }

    /// Host check only: same host as the seed, or a subdomain of its root
    /// domain when subdomains are included.
    pub fn host_in_scope(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        if host == self.seed_host {
            return true;
        }
        self.policy.include_subdomains && is_subdomain_of(&host, &self.root_domain)
    }

    pub fn check(&self, request: &Request, depth: usize) -> ScopeDecision {
        let url = request.url();
        if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
            return ScopeDecision::UnsupportedScheme;
        }
        if !self.host_in_scope(url) {
            return ScopeDecision::OutOfDomain;
        }
        if let Some(ref prefix) = self.policy.path_prefix
            && !url.path().starts_with(prefix.as_str())
        {
            return ScopeDecision::OutsidePathPrefix;
        }
        if let Some(ext) = request.file_ext()
            && self.policy.excluded_extensions.contains(&ext)
        {
            return ScopeDecision::ExcludedExtension;
        }
        if depth > self.policy.max_depth {
            return ScopeDecision::TooDeep;
        }
        ScopeDecision::InScope
    }

    pub fn in_scope(&self, request: &Request, depth: usize) -> bool {
        let decision = self.check(request, depth);
        if decision != ScopeDecision::InScope {
            debug!("Out of scope ({:?}): {}", decision, request);
        }
        decision == ScopeDecision::InScope
    }
}
