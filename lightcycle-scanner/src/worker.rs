// Loads one page in a leased session and collects what it reveals

use crate::browser::{Action, BrowserSession, FormElement, NetworkEvent, PageSnapshot, ResourceKind};
use crate::config::CrawlConfig;
use crate::error::{CrawlError, Result};
use crate::forms::FormFiller;
use crate::request::{Body, CrawlTask, Headers, Request, Source};
use crate::result::TaskFailure;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, warn};
use url::Url;

/// Raw material gathered from a page, turned into requests on demand.
enum Lead {
    Event(NetworkEvent),
    Anchor { base: Url, href: String },
    Form { base: Url, form: FormElement },
    Comment { base: Url, href: String },
}

/// Requests found on one page. Lazy, finite and single-use: each call to
/// `next` builds at most one request and nothing can be replayed.
pub struct Discovered {
    headers: Headers,
    filler: Arc<FormFiller>,
    leads: std::vec::IntoIter<Lead>,
}

impl Discovered {
    fn new(headers: Headers, filler: Arc<FormFiller>, leads: Vec<Lead>) -> Self {
        Self {
            headers,
            filler,
            leads: leads.into_iter(),
        }
    }

    /// Number of leads not yet examined.
    pub fn remaining(&self) -> usize {
        self.leads.len()
    }
}

impl Iterator for Discovered {
    type Item = Request;

    fn next(&mut self) -> Option<Request> {
        let Self {
            headers,
            filler,
            leads,
        } = self;

        for lead in leads.by_ref() {
            let request = match lead {
                Lead::Event(event) => request_from_event(event, headers),
                Lead::Anchor { base, href } => {
                    Request::resolve(&base, &href, "GET", Source::Link)
                        .map(|r| r.with_headers(headers.clone()))
                }
                Lead::Form { base, form } => filler.synthesize(&form, &base).map(|r| {
                    let merged = headers.merged(r.headers());
                    r.with_headers(merged)
                }),
                Lead::Comment { base, href } => {
                    Request::resolve(&base, &href, "GET", Source::Comment)
                        .map(|r| r.with_headers(headers.clone()))
                }
            };
            if request.is_some() {
                return request;
            }
        }
        None
    }
}

fn source_for(event: &NetworkEvent) -> Source {
    match event.kind {
        ResourceKind::Document if event.redirected_from.is_some() => Source::Redirect,
        ResourceKind::Document => Source::Navigation,
        ResourceKind::Xhr => Source::Xhr,
        ResourceKind::Fetch => Source::Fetch,
        ResourceKind::WebSocket => Source::WebSocket,
        ResourceKind::EventSource => Source::EventSource,
        _ => Source::StaticResource,
    }
}

fn request_from_event(event: NetworkEvent, defaults: &Headers) -> Option<Request> {
    let source = source_for(&event);
    let mut request = Request::parse(&event.method, &event.url, source).ok()?;
    request = request.with_headers(defaults.merged(&event.headers));
    if let Some(body) = event.body {
        let content_type = event.headers.get("Content-Type").map(str::to_string);
        request = request.with_body(Body::new(content_type, body));
    }
    Some(request)
}

fn leads_from(snapshot: PageSnapshot, leads: &mut Vec<Lead>) {
    let base = snapshot.base_url;
    leads.extend(snapshot.anchors.into_iter().map(|href| Lead::Anchor {
        base: base.clone(),
        href,
    }));
    leads.extend(snapshot.forms.into_iter().map(|form| Lead::Form {
        base: base.clone(),
        form,
    }));
    leads.extend(snapshot.comment_urls.into_iter().map(|href| Lead::Comment {
        base: base.clone(),
        href,
    }));
}

pub struct NavigationWorker {
    page_timeout: Duration,
    network_idle: Duration,
    settle_delay: Duration,
    action_timeout: Duration,
    action_budget: usize,
    trigger_interval: Duration,
    headers: Headers,
    filler: Arc<FormFiller>,
}

impl NavigationWorker {
    pub fn new(config: &CrawlConfig) -> Self {
        Self {
            page_timeout: config.page_timeout,
            network_idle: config.network_idle,
            settle_delay: config.settle_delay,
            action_timeout: config.action_timeout,
            action_budget: config.action_budget,
            trigger_interval: config.trigger_interval,
            headers: config.headers.clone(),
            filler: Arc::new(config.form_filler()),
        }
    }

    /// Visits `task` in `session`. Page-level errors come back as a
    /// [`TaskFailure`]; they never end the run.
    pub async fn process(
        &self,
        task: &CrawlTask,
        session: &mut dyn BrowserSession,
    ) -> std::result::Result<Discovered, TaskFailure> {
        self.visit(task, session).await.map_err(|e| {
            warn!("Failed to crawl {}: {}", task.request, e);
            TaskFailure::new(task, &e)
        })
    }

    /// Load, actions and post-action collection all share one deadline.
    async fn visit(&self, task: &CrawlTask, session: &mut dyn BrowserSession) -> Result<Discovered> {
        debug!("Visiting {} (depth {})", task.request, task.depth);
        let deadline = Instant::now() + self.page_timeout;

        timeout_at(deadline, self.explore(task, session, deadline))
            .await
            .map_err(|_| CrawlError::PageTimeout(self.page_timeout))?
    }

    async fn explore(
        &self,
        task: &CrawlTask,
        session: &mut dyn BrowserSession,
        deadline: Instant,
    ) -> Result<Discovered> {
        let (snapshot, events) = self.load(&task.request, session).await?;

        let mut leads: Vec<Lead> = events.into_iter().map(Lead::Event).collect();
        let actions = snapshot.actions.clone();
        leads_from(snapshot, &mut leads);

        if self.trigger_actions(session, &actions, deadline).await > 0 {
            match timeout(self.action_timeout, self.collect(session)).await {
                Ok(Ok((after, events))) => {
                    leads.extend(events.into_iter().map(Lead::Event));
                    leads_from(after, &mut leads);
                }
                Ok(Err(e)) => debug!("Post-action collection failed on {}: {}", task.request, e),
                Err(_) => debug!("Post-action collection timed out on {}", task.request),
            }
        }

        debug!("{} leads from {}", leads.len(), task.request);
        Ok(Discovered::new(self.headers.clone(), self.filler.clone(), leads))
    }

    async fn load(
        &self,
        request: &Request,
        session: &mut dyn BrowserSession,
    ) -> Result<(PageSnapshot, Vec<NetworkEvent>)> {
        session.navigate(request).await?;
        session.wait_quiescent(self.network_idle).await?;
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        self.collect(session).await
    }

    async fn collect(&self, session: &mut dyn BrowserSession) -> Result<(PageSnapshot, Vec<NetworkEvent>)> {
        let snapshot = session.enumerate_interactive_elements().await?;
        let events = session.list_network_events().await?;
        Ok((snapshot, events))
    }

    /// Fires at most `action_budget` actions, each bounded by the action
    /// timeout. Stops early once the page deadline has passed. Returns how
    /// many fired.
    async fn trigger_actions(
        &self,
        session: &mut dyn BrowserSession,
        actions: &[Action],
        deadline: Instant,
    ) -> usize {
        let mut fired = 0;
        for action in actions.iter().take(self.action_budget) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("Page time used up after {} actions", fired);
                break;
            }
            match timeout(self.action_timeout.min(remaining), session.dispatch_action(action)).await {
                Ok(Ok(())) => fired += 1,
                Ok(Err(e)) => debug!("Action on {} failed: {}", action.selector(), e),
                Err(_) => debug!("Action on {} timed out", action.selector()),
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.trigger_interval.is_zero() && !remaining.is_zero() {
                tokio::time::sleep(self.trigger_interval.min(remaining)).await;
            }
        }

        if fired > 0
            && timeout(self.action_timeout, session.wait_quiescent(self.network_idle))
                .await
                .is_err()
        {
            debug!("Network still busy after actions");
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptedLauncher, ScriptedPage, ScriptedSite};
    use crate::browser::BrowserLauncher;
    use crate::result::FailureKind;

    fn config() -> CrawlConfig {
        let mut config = CrawlConfig::new(Url::parse("http://example.test/").unwrap());
        config.settle_delay = Duration::ZERO;
        config.trigger_interval = Duration::ZERO;
        config
    }

    fn seed(url: &str) -> CrawlTask {
        CrawlTask::seed(Request::parse("GET", url, Source::Target).unwrap())
    }

    async fn session(site: ScriptedSite) -> Box<dyn BrowserSession> {
        ScriptedLauncher::new(site).open_session().await.unwrap()
    }

    #[tokio::test]
    async fn test_collects_links_forms_and_network() {
        let site = ScriptedSite::new().with(
            "http://example.test/",
            ScriptedPage::html(
                r#"<a href="/about">About</a>
                   <form action="/submit" method="post"><input name="q"></form>"#,
            )
            .xhr(NetworkEvent::new("GET", "http://example.test/api/items", ResourceKind::Xhr)),
        );
        let mut session = session(site).await;
        let worker = NavigationWorker::new(&config());

        let found: Vec<Request> = worker
            .process(&seed("http://example.test/"), session.as_mut())
            .await
            .unwrap()
            .collect();
        let described: Vec<String> = found.iter().map(|r| format!("{} {}", r, r.source())).collect();

        assert_eq!(
            described,
            vec![
                "GET http://example.test/ navigation",
                "GET http://example.test/api/items xhr",
                "GET http://example.test/about link",
                "POST http://example.test/submit form",
            ]
        );
        assert!(found[3].body().unwrap().as_text().contains("q="));
    }

    #[tokio::test]
    async fn test_discovered_is_lazy_and_single_use() {
        let site = ScriptedSite::new().with(
            "http://example.test/",
            ScriptedPage::html(r#"<a href="/a">a</a><a href="javascript:void(0)">x</a><a href="/b">b</a>"#),
        );
        let mut session = session(site).await;
        let worker = NavigationWorker::new(&config());
        let mut found = worker
            .process(&seed("http://example.test/"), session.as_mut())
            .await
            .unwrap();

        assert_eq!(found.remaining(), 4);
        assert_eq!(found.next().unwrap().source(), Source::Navigation);
        assert_eq!(found.next().unwrap().url().path(), "/a");
        // The pseudo link is skipped on the way to /b.
        assert_eq!(found.next().unwrap().url().path(), "/b");
        assert!(found.next().is_none());
        assert!(found.next().is_none());
    }

    #[tokio::test]
    async fn test_actions_reveal_requests_within_budget() {
        let mut page = ScriptedPage::html(
            r#"<button data-lc-action="0">one</button>
               <button data-lc-action="1">two</button>
               <button data-lc-action="2">three</button>"#,
        );
        for n in 0..3 {
            page = page.on_action(
                &format!("[data-lc-action=\"{}\"]", n),
                NetworkEvent::new("POST", &format!("http://example.test/api/{}", n), ResourceKind::Fetch),
            );
        }
        let site = ScriptedSite::new().with("http://example.test/", page);
        let mut session = session(site).await;

        let mut config = config();
        config.action_budget = 2;
        let worker = NavigationWorker::new(&config);

        let found: Vec<Request> = worker
            .process(&seed("http://example.test/"), session.as_mut())
            .await
            .unwrap()
            .filter(|r| r.source() == Source::Fetch)
            .collect();
        let paths: Vec<&str> = found.iter().map(|r| r.url().path()).collect();
        assert_eq!(paths, vec!["/api/0", "/api/1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_that_never_settles_times_out() {
        let site = ScriptedSite::new().with("http://example.test/slow", ScriptedPage::html("").never_idle());
        let mut session = session(site).await;
        let worker = NavigationWorker::new(&config());

        let failure = worker
            .process(&seed("http://example.test/slow"), session.as_mut())
            .await
            .err()
            .unwrap();
        assert_eq!(failure.kind, FailureKind::PageTimeout);
        assert_eq!(failure.url, "http://example.test/slow");
    }

    fn two_buttons() -> ScriptedPage {
        ScriptedPage::html(
            r#"<button data-lc-action="0">one</button>
               <button data-lc-action="1">two</button>"#,
        )
        .on_action(
            "[data-lc-action=\"1\"]",
            NetworkEvent::new("POST", "http://example.test/api/1", ResourceKind::Fetch),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_action_is_skipped() {
        let page = two_buttons().stall_on("[data-lc-action=\"0\"]");
        let mut session = session(ScriptedSite::new().with("http://example.test/", page)).await;
        let mut config = config();
        config.action_timeout = Duration::from_secs(1);
        let worker = NavigationWorker::new(&config);

        let start = Instant::now();
        let found: Vec<Request> = worker
            .process(&seed("http://example.test/"), session.as_mut())
            .await
            .unwrap()
            .filter(|r| r.source() == Source::Fetch)
            .collect();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url().path(), "/api/1");
        assert!(start.elapsed() < config.page_timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_timeout_covers_actions() {
        let page = two_buttons().busy_after_actions();
        let mut session = session(ScriptedSite::new().with("http://example.test/", page)).await;
        let mut config = config();
        config.page_timeout = Duration::from_secs(1);
        config.action_timeout = Duration::from_secs(2);
        let worker = NavigationWorker::new(&config);

        let start = Instant::now();
        let failure = worker
            .process(&seed("http://example.test/"), session.as_mut())
            .await
            .err()
            .unwrap();

        assert_eq!(failure.kind, FailureKind::PageTimeout);
        assert!(start.elapsed() <= config.page_timeout);
    }

    #[tokio::test]
    async fn test_navigation_error_is_reported() {
        let site = ScriptedSite::new().with(
            "http://example.test/broken",
            ScriptedPage::html("").fail("net::ERR_CONNECTION_REFUSED"),
        );
        let mut session = session(site).await;
        let worker = NavigationWorker::new(&config());

        let failure = worker
            .process(&seed("http://example.test/broken"), session.as_mut())
            .await
            .err()
            .unwrap();
        assert_eq!(failure.kind, FailureKind::Navigation);
        assert!(failure.message.contains("ERR_CONNECTION_REFUSED"));
    }

    #[test]
    fn test_event_sources() {
        let mut redirect = NetworkEvent::new("GET", "http://example.test/new", ResourceKind::Document);
        redirect.redirected_from = Some("http://example.test/old".into());
        assert_eq!(source_for(&redirect), Source::Redirect);

        let mut post = NetworkEvent::new("POST", "http://example.test/api", ResourceKind::Xhr);
        post.headers.insert("Content-Type", "application/json");
        post.body = Some(r#"{"id":1}"#.into());
        let request = request_from_event(post, &Headers::from_iter([("Cookie", "sid=1")])).unwrap();
        assert_eq!(request.headers().get("cookie"), Some("sid=1"));
        assert_eq!(request.body().unwrap().mime().as_deref(), Some("application/json"));
        assert_eq!(request.source(), Source::Xhr);
    }
}
