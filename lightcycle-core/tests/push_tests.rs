// Tests for replaying results through a proxy

use lightcycle_core::push::{DEFAULT_PUSH_POOL_MAX, ProxyPusher, PushSummary};
use lightcycle_scanner::request::Body;
use lightcycle_scanner::{Request, Source};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string, method, path},
};

fn requests() -> Vec<Request> {
    vec![
        Request::parse("GET", "http://target.test/", Source::Target).unwrap(),
        Request::parse("GET", "http://target.test/api/items", Source::Xhr).unwrap(),
        Request::parse("POST", "http://target.test/login", Source::Form)
            .unwrap()
            .with_body(Body::urlencoded([("user", "Lightcycle")])),
    ]
}

#[tokio::test]
async fn test_push_sends_every_request_through_proxy() {
    let proxy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string("user=Lightcycle"))
        .respond_with(ResponseTemplate::new(302))
        .expect(1)
        .mount(&proxy)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&proxy)
        .await;

    let pusher = ProxyPusher::new(&proxy.uri(), DEFAULT_PUSH_POOL_MAX).unwrap();
    let summary = pusher.push(requests()).await;

    assert_eq!(summary, PushSummary { sent: 3, failed: 0 });
    assert_eq!(proxy.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_push_failures_are_counted_not_fatal() {
    let pusher = ProxyPusher::new("http://127.0.0.1:1", 2).unwrap();
    let summary = pusher.push(requests()).await;
    assert_eq!(summary, PushSummary { sent: 0, failed: 3 });
}

#[tokio::test]
async fn test_push_nothing() {
    let proxy = MockServer::start().await;
    let pusher = ProxyPusher::new(&proxy.uri(), 1).unwrap();
    assert_eq!(pusher.push(Vec::new()).await, PushSummary::default());
}
