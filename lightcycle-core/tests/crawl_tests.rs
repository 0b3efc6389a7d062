// Tests for crawl orchestration over the plain HTTP engine

use lightcycle_core::crawl::{CrawlOptions, CrawlProgressCallback, Engine, execute_crawl};
use lightcycle_core::seed::SeedOptions;
use lightcycle_scanner::{CrawlConfig, CrawlError, Source, StopHandle, StopReason};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

async fn html(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(body.to_string()),
        )
        .mount(server)
        .await;
}

fn http_options(seed: &str) -> CrawlOptions {
    let mut config = CrawlConfig::new(Url::parse(seed).unwrap());
    config.settle_delay = Duration::ZERO;
    config.trigger_interval = Duration::ZERO;
    config.concurrency = 2;

    let mut options = CrawlOptions::new(config);
    options.engine = Engine::Http;
    options
}

// ============================================================================
// Engine Selection Tests
// ============================================================================

#[test]
fn test_engine_default_is_chrome() {
    assert_eq!(Engine::default(), Engine::Chrome);
}

#[test]
fn test_engine_from_str_invalid() {
    assert!("lynx".parse::<Engine>().is_err());
}

// ============================================================================
// Execution Tests
// ============================================================================

#[tokio::test]
async fn test_execute_crawl_follows_links() {
    let mock_server = MockServer::start().await;
    html(&mock_server, "/", r#"<a href="/a">a</a><a href="/b?x=1">b</a>"#).await;
    html(&mock_server, "/a", r#"<a href="/">home</a>"#).await;
    html(&mock_server, "/b", "<p>leaf</p>").await;

    let options = http_options(&format!("{}/", mock_server.uri()));
    let result = execute_crawl(options, None).await.unwrap();

    assert_eq!(result.requests.len(), 3);
    assert_eq!(result.stats.pages_crawled, 3);
    assert_eq!(result.stats.stop_reason, StopReason::Completed);
    assert!(result.find("GET", &format!("{}/b?x=1", mock_server.uri())).is_some());
}

#[tokio::test]
async fn test_execute_crawl_with_robots_seeds() {
    let mock_server = MockServer::start().await;
    html(&mock_server, "/", "<p>nothing linked</p>").await;
    html(&mock_server, "/hidden", "<p>unlinked page</p>").await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /hidden\n"))
        .mount(&mock_server)
        .await;

    let mut options = http_options(&format!("{}/", mock_server.uri()));
    options.seeding = SeedOptions {
        robots_path: true,
        ..Default::default()
    };

    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    let callback: CrawlProgressCallback = Arc::new(move |msg: String| sink.lock().unwrap().push(msg));
    let result = execute_crawl(options, Some(callback)).await.unwrap();

    let hidden = result
        .find("GET", &format!("{}/hidden", mock_server.uri()))
        .expect("robots.txt entry should be crawled");
    assert_eq!(hidden.request.source(), Source::Robots);
    assert_eq!(result.stats.pages_crawled, 2);
    assert!(messages.lock().unwrap()[0].starts_with("Expanding seeds"));
}

#[tokio::test]
async fn test_execute_crawl_rejects_bad_config() {
    let mut options = http_options("http://127.0.0.1:1/");
    options.config.concurrency = 0;

    let result = execute_crawl(options, None).await;
    assert!(matches!(result, Err(CrawlError::Config(_))));
}

#[tokio::test]
async fn test_execute_crawl_stopped_before_start() {
    let mock_server = MockServer::start().await;
    html(&mock_server, "/", r#"<a href="/a">a</a>"#).await;

    let handle = StopHandle::new();
    handle.stop();
    let mut options = http_options(&format!("{}/", mock_server.uri()));
    options.stop_handle = Some(handle);

    let result = execute_crawl(options, None).await.unwrap();
    assert_eq!(result.stats.stop_reason, StopReason::Cancelled);
    assert_eq!(result.stats.pages_crawled, 0);
    assert_eq!(result.requests.len(), 1);
}
