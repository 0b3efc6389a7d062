use clap::ArgMatches;
use colored::Colorize;
use lightcycle_core::crawl::{CrawlOptions, CrawlProgressCallback, Engine, execute_crawl};
use lightcycle_core::push::{DEFAULT_PUSH_POOL_MAX, ProxyPusher};
use lightcycle_core::report::{OutputMode, generate_json_report, generate_text_report, write_json_report};
use lightcycle_core::seed::SeedOptions;
use lightcycle_scanner::{CrawlConfig, CrawlError, CrawlResult, FilterMode, Headers, StopHandle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::filter::LevelFilter;
use url::Url;

pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_BROWSER_LAUNCH: i32 = 2;
pub const EXIT_OUTPUT: i32 = 3;

/// Route all logs to stderr so stdout only ever carries the result.
pub fn init_logging(level: &str) {
    let level = LevelFilter::from_str(level).unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

/// Parse the seed, trying to add http:// if needed
pub fn parse_seed_url(raw: &str) -> Result<Url, CrawlError> {
    let raw = raw.trim();
    if let Ok(url) = Url::parse(raw)
        && (raw.contains("://") || matches!(url.scheme(), "http" | "https"))
    {
        return Ok(url);
    }

    // `localhost:8080` parses with `localhost` as the scheme
    Url::parse(&format!("http://{}", raw))
        .map_err(|e| CrawlError::Config(format!("invalid seed URL '{}': {}", raw, e)))
}

/// Split a `key=value` argument
pub fn parse_key_value(raw: &str) -> Result<(String, String), CrawlError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_lowercase(), value.to_string()))
        }
        _ => Err(CrawlError::Config(format!(
            "expected KEY=VALUE, got '{}'",
            raw
        ))),
    }
}

fn key_values(args: &ArgMatches, id: &str) -> Result<HashMap<String, String>, CrawlError> {
    args.get_many::<String>(id)
        .into_iter()
        .flatten()
        .map(|raw| parse_key_value(raw))
        .collect()
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

/// What to do with the result once the crawl is over
#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub mode: OutputMode,
    pub json_path: Option<PathBuf>,
    pub push_proxy: Option<String>,
    pub push_pool_max: usize,
}

/// Translate `crawl` arguments into crawl options and output settings.
pub fn build_crawl_options(args: &ArgMatches) -> Result<(CrawlOptions, OutputSettings), CrawlError> {
    let seed_arg = args
        .get_one::<String>("URL")
        .ok_or_else(|| CrawlError::Config("a seed URL is required".to_string()))?;
    let mut config = CrawlConfig::new(parse_seed_url(seed_arg)?);

    if let Some(raw) = args.get_one::<String>("custom-headers") {
        let headers = Headers::from_json(raw)
            .map_err(|e| CrawlError::Config(format!("invalid --custom-headers: {}", e)))?;
        if let Some(user_agent) = headers.get("User-Agent") {
            config.browser.user_agent = user_agent.to_string();
        }
        config.headers = headers;
    }

    if let Some(depth) = args.get_one::<usize>("max-depth") {
        config.scope.max_depth = *depth;
    }
    if let Some(concurrency) = args.get_one::<usize>("concurrency") {
        config.concurrency = *concurrency;
    }
    if let Some(secs) = args.get_one::<u64>("page-timeout") {
        config.page_timeout = Duration::from_secs(*secs);
    }
    if let Some(max) = args.get_one::<usize>("max-requests") {
        config.max_requests = *max;
    }
    if let Some(secs) = args.get_one::<u64>("max-run-time") {
        config.max_run_time = Duration::from_secs(*secs);
    }
    config.scope.include_subdomains = args.get_flag("include-subdomains");
    config.scope.path_prefix = args.get_one::<String>("path-prefix").cloned();
    if let Some(mode) = args.get_one::<String>("filter-mode") {
        config.filter_mode = FilterMode::from_str(mode)?;
    }

    config.browser.headless = !args.get_flag("no-headless");
    config.browser.executable = args.get_one::<String>("chrome-path").map(|p| expand_path(p));
    config.browser.remote_url = args.get_one::<String>("remote-url").cloned();
    config.browser.proxy = args.get_one::<String>("proxy").cloned();

    config.form_values = key_values(args, "custom-form-values")?;
    config.form_keyword_values = key_values(args, "custom-form-keyword-values")?;
    if let Some(keywords) = args.get_many::<String>("ignore-url-keywords") {
        config.ignore_keywords = keywords.cloned().collect();
    }

    let engine = match args.get_one::<String>("engine") {
        Some(engine) => Engine::from_str(engine)?,
        None => Engine::default(),
    };
    let seeding = SeedOptions {
        robots_path: args.get_flag("robots-path"),
        fuzz_path: args.get_flag("fuzz-path"),
        fuzz_wordlist: args.get_one::<String>("fuzz-path-dict").map(|p| expand_path(p)),
        threads: 0,
    };

    let output = OutputSettings {
        mode: match args.get_one::<String>("output-mode") {
            Some(mode) => OutputMode::from_str(mode)?,
            None => OutputMode::default(),
        },
        json_path: args.get_one::<String>("output-json").map(|p| expand_path(p)),
        push_proxy: args.get_one::<String>("push-to-proxy").cloned(),
        push_pool_max: args.get_one::<usize>("push-pool-max").copied().unwrap_or(DEFAULT_PUSH_POOL_MAX),
    };

    let mut options = CrawlOptions::new(config);
    options.engine = engine;
    options.seeding = seeding;
    options.show_progress_bars = !args.get_flag("quiet");

    Ok((options, output))
}

/// Exit code for an error that ended the run before a result existed
pub fn exit_code_for(error: &CrawlError) -> i32 {
    match error {
        CrawlError::BrowserLaunch(_) => EXIT_BROWSER_LAUNCH,
        _ => EXIT_CONFIG,
    }
}

/// Print and save the result. Returns false when any output failed.
pub fn emit_result(result: &CrawlResult, output: &OutputSettings) -> bool {
    let mut ok = true;

    if let Some(ref path) = output.json_path
        && let Err(e) = write_json_report(result, path)
    {
        error!("Failed to write {}: {}", path.display(), e);
        ok = false;
    }

    let printed = match output.mode {
        OutputMode::Json => generate_json_report(result).and_then(|json| {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", json)?;
            stdout.flush()?;
            Ok(())
        }),
        OutputMode::Console => {
            let mut stdout = io::stdout().lock();
            write!(stdout, "{}", generate_text_report(result))
                .and_then(|_| stdout.flush())
                .map_err(CrawlError::from)
        }
        OutputMode::None => Ok(()),
    };
    if let Err(e) = printed {
        error!("Failed to print result: {}", e);
        ok = false;
    }

    ok
}

pub async fn handle_crawl(sub_matches: &ArgMatches) -> i32 {
    let (mut options, output) = match build_crawl_options(sub_matches) {
        Ok(built) => built,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            return EXIT_CONFIG;
        }
    };

    let stop_handle = StopHandle::new();
    options.stop_handle = Some(stop_handle.clone());
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping crawl");
            stop_handle.stop();
        }
    });

    let progress_callback: CrawlProgressCallback = Arc::new(|msg: String| {
        eprintln!("{}", msg.bright_black());
    });
    let callback = options.show_progress_bars.then_some(progress_callback);

    let result = execute_crawl(options, callback).await;
    interrupt.abort();

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{} Crawl failed: {}", "✗".red().bold(), e);
            return exit_code_for(&e);
        }
    };

    if !emit_result(&result, &output) {
        return EXIT_OUTPUT;
    }

    if let Some(ref proxy) = output.push_proxy {
        match ProxyPusher::new(proxy, output.push_pool_max) {
            Ok(pusher) => {
                let requests = result.requests.iter().map(|r| r.request.clone()).collect();
                pusher.push(requests).await;
            }
            Err(e) => warn!("Skipping proxy push: {}", e),
        }
    }

    EXIT_OK
}
