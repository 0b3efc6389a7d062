// Seed expansion: robots.txt entries and forced browsing before the crawl

use lightcycle_scanner::config::{BrowserOptions, CrawlConfig};
use lightcycle_scanner::{CrawlError, Headers, Request, Result, Source};
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

/// Paths probed by `--fuzz-path` when no dictionary is given.
pub const DEFAULT_WORDLIST: &str = include_str!("wordlist.txt");

/// Which extra seeds to gather before crawling.
#[derive(Debug, Clone, Default)]
pub struct SeedOptions {
    pub robots_path: bool,
    pub fuzz_path: bool,
    /// Replaces the bundled wordlist; implies `fuzz_path`.
    pub fuzz_wordlist: Option<PathBuf>,
    /// Concurrent probes.
    pub threads: usize,
}

impl SeedOptions {
    pub fn is_enabled(&self) -> bool {
        self.robots_path || self.fuzz_path || self.fuzz_wordlist.is_some()
    }
}

/// Build the client used for seeding requests
pub fn seed_client(options: &BrowserOptions, headers: &Headers) -> Result<Client> {
    let mut default_headers = HeaderMap::new();
    for (name, value) in headers.iter() {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                default_headers.insert(name, value);
            }
            _ => warn!("Skipping header {} for seeding requests", name),
        }
    }

    let mut builder = Client::builder()
        .user_agent(options.user_agent.as_str())
        .default_headers(default_headers)
        .timeout(Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::limited(3));

    if let Some(ref proxy) = options.proxy {
        let proxy = reqwest::Proxy::all(proxy.as_str())
            .map_err(|e| CrawlError::Config(format!("invalid proxy '{}': {}", proxy, e)))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Turn the Allow/Disallow rules of a robots.txt into GET requests.
///
/// Wildcards and end anchors are stripped, so `/private/*.php$` yields
/// `/private/.php`. Duplicate paths are reported once.
pub fn parse_robots(body: &str, base: &Url) -> Vec<Request> {
    let mut seen = HashSet::new();
    let mut requests = Vec::new();

    for line in body.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let field = field.trim().to_ascii_lowercase();
        if field != "allow" && field != "disallow" {
            continue;
        }

        let path: String = value.trim().chars().filter(|c| *c != '*' && *c != '$').collect();
        if path.is_empty() || !seen.insert(path.clone()) {
            continue;
        }
        if let Some(request) = Request::resolve(base, &path, "GET", Source::Robots) {
            requests.push(request);
        }
    }

    requests
}

/// Fetch `/robots.txt` from the seed origin. A missing or unreadable file
/// yields no seeds.
pub async fn robots_seeds(client: &Client, seed: &Url) -> Vec<Request> {
    let robots_url = match seed.join("/robots.txt") {
        Ok(url) => url,
        Err(e) => {
            warn!("Cannot build robots.txt URL for {}: {}", seed, e);
            return Vec::new();
        }
    };

    let response = match client.get(robots_url.clone()).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!("Failed to fetch {}: {}", robots_url, e);
            return Vec::new();
        }
    };
    if !response.status().is_success() {
        debug!("{} answered {}", robots_url, response.status());
        return Vec::new();
    }

    match response.text().await {
        Ok(body) => {
            let requests = parse_robots(&body, &robots_url);
            info!("robots.txt listed {} paths", requests.len());
            requests
        }
        Err(e) => {
            warn!("Failed to read {}: {}", robots_url, e);
            Vec::new()
        }
    }
}

/// Build a test URL from base URL and wordlist entry
pub fn build_test_url(base_url: &str, word: &str) -> Result<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| CrawlError::InvalidUrl(format!("{}: {}", base_url, e)))?;

    let current_path = url.path().to_string();
    let path_base = if current_path.ends_with('/') {
        current_path
    } else {
        format!("{}/", current_path)
    };

    url.set_path(&format!("{}{}", path_base, word.trim_start_matches('/')));
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

/// Split wordlist text into entries, skipping blanks and `#` comments.
pub fn parse_wordlist(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Load wordlist from file
pub fn load_wordlist(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|e| {
        CrawlError::Config(format!("Failed to read wordlist {}: {}", path.display(), e))
    })?;

    let words = parse_wordlist(&content);
    if words.is_empty() {
        return Err(CrawlError::Config(format!(
            "Wordlist {} is empty or contains only comments",
            path.display()
        )));
    }

    Ok(words)
}

/// Probe every word below the seed's directory. Anything but a 404 becomes a
/// seed; transport errors are skipped.
pub async fn fuzz_seeds(client: &Client, seed: &Url, words: &[String], threads: usize) -> Vec<Request> {
    let base = seed.join("./").unwrap_or_else(|_| seed.clone());
    let semaphore = Arc::new(Semaphore::new(threads.max(1)));
    let mut probes = Vec::new();

    for word in words {
        let url = match build_test_url(base.as_str(), word) {
            Ok(url) => url,
            Err(e) => {
                debug!("Skipping word {}: {}", word, e);
                continue;
            }
        };
        let client = client.clone();
        let semaphore = semaphore.clone();
        probes.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            match client.get(url.clone()).send().await {
                Ok(response) if response.status() != reqwest::StatusCode::NOT_FOUND => {
                    debug!("{} answered {}", url, response.status());
                    Some(url)
                }
                Ok(_) => None,
                Err(e) => {
                    debug!("Probe of {} failed: {}", url, e);
                    None
                }
            }
        }));
    }

    let mut found = Vec::new();
    for probe in probes {
        match probe.await {
            Ok(Some(url)) => found.push(Request::get(url, Source::PathFuzz)),
            Ok(None) => {}
            Err(e) => warn!("Fuzz probe task failed: {}", e),
        }
    }

    info!("Path fuzzing found {} of {} paths", found.len(), words.len());
    found
}

/// Gather the extra seeds the options ask for.
///
/// Only an unreadable user wordlist is an error; network failures while
/// seeding just mean fewer seeds.
pub async fn expand_seeds(config: &CrawlConfig, options: &SeedOptions) -> Result<Vec<Request>> {
    if !options.is_enabled() {
        return Ok(Vec::new());
    }

    let words = match options.fuzz_wordlist {
        Some(ref path) => Some(load_wordlist(path)?),
        None if options.fuzz_path => Some(parse_wordlist(DEFAULT_WORDLIST)),
        None => None,
    };

    let client = seed_client(&config.browser, &config.headers)?;
    let mut seeds = Vec::new();

    if options.robots_path {
        seeds.extend(robots_seeds(&client, &config.seed).await);
    }
    if let Some(words) = words {
        seeds.extend(fuzz_seeds(&client, &config.seed, &words, options.threads).await);
    }

    Ok(seeds)
}
