use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use spidering_core::config::RetrySection;
use spidering_core::session::{
    HttpFetcher, ScrapeDispatcher, ScrapeOutcome, ScrapeRequest, ScriptRuntime, SessionError,
    SessionMetrics, SessionResult,
};

#[derive(Default)]
struct MockRuntime {
    evaluations: Vec<String>,
    waits: Vec<String>,
    results: VecDeque<SessionResult<serde_json::Value>>,
    reloads: usize,
    captures: usize,
    missing_selectors: Vec<String>,
}

#[async_trait(?Send)]
impl ScriptRuntime for MockRuntime {
    async fn evaluate(&mut self, expression: &str) -> SessionResult<serde_json::Value> {
        self.evaluations.push(expression.to_string());
        self.results
            .pop_front()
            .unwrap_or_else(|| Ok(serde_json::Value::Null))
    }

    async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> SessionResult<()> {
        self.waits.push(selector.to_string());
        if self.missing_selectors.iter().any(|s| s == selector) {
            return Err(SessionError::Timeout(format!("selector {selector}")));
        }
        Ok(())
    }

    async fn reload(&mut self) -> SessionResult<()> {
        self.reloads += 1;
        Ok(())
    }

    async fn capture_failure(&mut self) -> SessionResult<()> {
        self.captures += 1;
        Ok(())
    }
}

#[derive(Default)]
struct MockFetcher {
    requests: RefCell<Vec<String>>,
    responses: RefCell<VecDeque<SessionResult<String>>>,
}

#[async_trait(?Send)]
impl HttpFetcher for MockFetcher {
    async fn get(&self, url: &str) -> SessionResult<String> {
        self.requests.borrow_mut().push(url.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

fn dispatcher(attempts: usize, cooldown_seconds: u64) -> (ScrapeDispatcher, Arc<Mutex<SessionMetrics>>) {
    let metrics = Arc::new(Mutex::new(SessionMetrics::default()));
    let retry = RetrySection {
        scrape_attempts: attempts,
        scrape_cooldown_seconds: cooldown_seconds,
        ..RetrySection::default()
    };
    (
        ScrapeDispatcher::new(&retry, Arc::clone(&metrics)),
        metrics,
    )
}

#[tokio::test]
async fn script_request_wraps_body_and_returns_value() {
    let (dispatcher, metrics) = dispatcher(3, 60);
    let mut runtime = MockRuntime::default();
    runtime
        .results
        .push_back(Ok(serde_json::json!({"title": "Example"})));
    let fetcher = MockFetcher::default();

    let outcome = dispatcher
        .scrape(
            &mut runtime,
            &fetcher,
            &ScrapeRequest::Script {
                body: "document.title".into(),
                wait_for: None,
            },
        )
        .await
        .unwrap();
    match outcome {
        ScrapeOutcome::Value(value) => assert_eq!(value["title"], "Example"),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(runtime.waits.is_empty());
    assert_eq!(
        runtime.evaluations,
        vec!["(async () => { return document.title })()".to_string()]
    );
    // The HTTP side was never involved.
    assert!(fetcher.requests.borrow().is_empty());
    assert_eq!(metrics.lock().unwrap().browser_scrapes, 1);
}

#[tokio::test]
async fn script_without_return_is_fire_and_forget() {
    let (dispatcher, _metrics) = dispatcher(3, 60);
    let mut runtime = MockRuntime::default();
    let fetcher = MockFetcher::default();

    let outcome = dispatcher
        .scrape(
            &mut runtime,
            &fetcher,
            &ScrapeRequest::ScriptNoReturn {
                body: "window.scrollTo(0, document.body.scrollHeight)".into(),
                wait_for: None,
            },
        )
        .await
        .unwrap();
    assert!(matches!(outcome, ScrapeOutcome::Done));
    assert_eq!(runtime.evaluations.len(), 1);
    assert!(!runtime.evaluations[0].contains("return"));
}

#[tokio::test]
async fn element_request_never_touches_the_browser() {
    let (dispatcher, metrics) = dispatcher(3, 60);
    let mut runtime = MockRuntime::default();
    let fetcher = MockFetcher::default();
    fetcher.responses.borrow_mut().push_back(Ok(
        r#"<html><body><div class="price">42</div></body></html>"#.to_string(),
    ));

    let outcome = dispatcher
        .scrape(
            &mut runtime,
            &fetcher,
            &ScrapeRequest::Element {
                selector: "div.price".into(),
                url: "https://shop.example.com/item".into(),
            },
        )
        .await
        .unwrap();
    match outcome {
        ScrapeOutcome::Fragments(fragments) => {
            assert_eq!(fragments.len(), 1);
            assert!(fragments[0].contains("42"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(runtime.evaluations.is_empty());
    assert_eq!(runtime.reloads, 0);
    assert_eq!(
        fetcher.requests.borrow().as_slice(),
        ["https://shop.example.com/item"]
    );
    let snapshot = metrics.lock().unwrap().clone();
    assert_eq!(snapshot.http_scrapes, 1);
    assert_eq!(snapshot.browser_scrapes, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_script_cools_down_and_reloads_before_retrying() {
    let (dispatcher, metrics) = dispatcher(3, 60);
    let mut runtime = MockRuntime::default();
    runtime
        .results
        .push_back(Err(SessionError::Evaluate("stale context".into())));
    runtime
        .results
        .push_back(Ok(serde_json::Value::String("ok".into())));
    let fetcher = MockFetcher::default();

    let started = tokio::time::Instant::now();
    let outcome = dispatcher
        .scrape(
            &mut runtime,
            &fetcher,
            &ScrapeRequest::Script {
                body: "document.title".into(),
                wait_for: None,
            },
        )
        .await
        .unwrap();
    assert!(matches!(outcome, ScrapeOutcome::Value(_)));
    assert_eq!(started.elapsed(), Duration::from_secs(60));
    assert_eq!(runtime.reloads, 1);
    assert_eq!(runtime.captures, 1);
    let snapshot = metrics.lock().unwrap().clone();
    assert_eq!(snapshot.scrape_retries, 1);
    assert_eq!(snapshot.diagnostics_captured, 1);
}

#[tokio::test(start_paused = true)]
async fn element_retries_exhaust_without_reloading_any_page() {
    let (dispatcher, _metrics) = dispatcher(3, 60);
    let mut runtime = MockRuntime::default();
    let fetcher = MockFetcher::default();
    for _ in 0..3 {
        fetcher
            .responses
            .borrow_mut()
            .push_back(Err(SessionError::Unexpected("connection refused".into())));
    }

    let started = tokio::time::Instant::now();
    let err = dispatcher
        .scrape(
            &mut runtime,
            &fetcher,
            &ScrapeRequest::Element {
                selector: "div.price".into(),
                url: "https://shop.example.com/item".into(),
            },
        )
        .await
        .unwrap_err();
    match err {
        SessionError::RetriesExhausted { url, attempts } => {
            assert_eq!(url, "https://shop.example.com/item");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Two cooldowns between three attempts.
    assert_eq!(started.elapsed(), Duration::from_secs(120));
    assert_eq!(runtime.reloads, 0);
    // No page is involved, so no page diagnostics either.
    assert_eq!(runtime.captures, 0);
    assert_eq!(fetcher.requests.borrow().len(), 3);
}

#[tokio::test]
async fn script_waits_for_its_element_before_evaluating() {
    let (dispatcher, _metrics) = dispatcher(3, 60);
    let mut runtime = MockRuntime::default();
    runtime
        .results
        .push_back(Ok(serde_json::Value::String("ready".into())));
    let fetcher = MockFetcher::default();

    let outcome = dispatcher
        .scrape(
            &mut runtime,
            &fetcher,
            &ScrapeRequest::Script {
                body: "document.querySelector('div.ready').innerText".into(),
                wait_for: Some("div.ready".into()),
            },
        )
        .await
        .unwrap();
    assert!(matches!(outcome, ScrapeOutcome::Value(_)));
    assert_eq!(runtime.waits, vec!["div.ready".to_string()]);
    assert_eq!(runtime.evaluations.len(), 1);
}

#[tokio::test]
async fn missing_wait_element_fails_without_evaluating() {
    let (dispatcher, _metrics) = dispatcher(1, 60);
    let mut runtime = MockRuntime {
        missing_selectors: vec!["div.never".into()],
        ..MockRuntime::default()
    };
    let fetcher = MockFetcher::default();

    let err = dispatcher
        .scrape(
            &mut runtime,
            &fetcher,
            &ScrapeRequest::Script {
                body: "document.title".into(),
                wait_for: Some("div.never".into()),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::RetriesExhausted { .. }));
    assert!(runtime.evaluations.is_empty());
    assert_eq!(runtime.captures, 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_script_captures_a_diagnostic_per_attempt() {
    let (dispatcher, metrics) = dispatcher(2, 60);
    let mut runtime = MockRuntime::default();
    for _ in 0..2 {
        runtime
            .results
            .push_back(Err(SessionError::Evaluate("stale context".into())));
    }
    let fetcher = MockFetcher::default();

    let err = dispatcher
        .scrape(
            &mut runtime,
            &fetcher,
            &ScrapeRequest::Script {
                body: "document.title".into(),
                wait_for: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::RetriesExhausted { attempts: 2, .. }));
    // The final attempt is captured too, not just the retried ones.
    assert_eq!(runtime.captures, 2);
    assert_eq!(metrics.lock().unwrap().diagnostics_captured, 2);
}
