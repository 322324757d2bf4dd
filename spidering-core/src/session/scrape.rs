use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use scraper::{Html, Selector};
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{RetrySection, ScrapeSection};

use super::error::{SessionError, SessionResult};
use super::metrics::SessionMetrics;

/// How long a script request waits for its `wait_for` element before
/// the evaluation runs.
const SCRIPT_WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// One extraction strategy per request. `Element` never touches the
/// browser: it is served by a plain HTTP fetch and an off-page parse.
#[derive(Debug, Clone)]
pub enum ScrapeRequest {
    /// Script body whose value is awaited and returned, optionally
    /// after an element appears.
    Script {
        body: String,
        wait_for: Option<String>,
    },
    /// Script body executed for its side effects only.
    ScriptNoReturn {
        body: String,
        wait_for: Option<String>,
    },
    /// CSS selector resolved against a freshly fetched document.
    Element { selector: String, url: String },
}

#[derive(Debug, Clone)]
pub enum ScrapeOutcome {
    Value(serde_json::Value),
    Done,
    Fragments(Vec<String>),
}

/// Seam for in-page script execution. The production implementation
/// lives in [`super::page::PageSession`].
#[async_trait(?Send)]
pub trait ScriptRuntime {
    async fn evaluate(&mut self, expression: &str) -> SessionResult<serde_json::Value>;
    /// Block until `selector` is present or `timeout` elapses.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> SessionResult<()>;
    async fn reload(&mut self) -> SessionResult<()>;
    /// Persist error diagnostics for a failed evaluation.
    async fn capture_failure(&mut self) -> SessionResult<()>;
}

#[async_trait(?Send)]
pub trait HttpFetcher {
    async fn get(&self, url: &str) -> SessionResult<String>;
}

/// HTTP collaborator for the browserless path, presenting a desktop
/// browser user agent.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    user_agent: String,
    downloads_dir: PathBuf,
}

impl ReqwestFetcher {
    pub fn new(section: &ScrapeSection) -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agent: section.user_agent.clone(),
            downloads_dir: PathBuf::from(&section.downloads_dir),
        }
    }

    /// Streams `url` into the downloads directory, named after the
    /// last path segment.
    pub async fn download_file(&self, url: &str) -> SessionResult<PathBuf> {
        let file_name = url
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or("download")
            .to_string();
        tokio::fs::create_dir_all(&self.downloads_dir).await?;
        let target = self.downloads_dir.join(file_name);

        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await?
            .error_for_status()?;
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(&target).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        debug!(url, path = %target.display(), "download complete");
        Ok(target)
    }
}

#[async_trait(?Send)]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &str) -> SessionResult<String> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Dispatches scrape requests over a bounded retry loop with a fixed
/// cooldown. Script variants reload the page before retrying so the
/// next evaluation sees a fresh document; the element path retries
/// the fetch alone.
pub struct ScrapeDispatcher {
    attempts: usize,
    cooldown: Duration,
    metrics: Arc<Mutex<SessionMetrics>>,
}

impl ScrapeDispatcher {
    pub fn new(retry: &RetrySection, metrics: Arc<Mutex<SessionMetrics>>) -> Self {
        Self {
            attempts: retry.scrape_attempts.max(1),
            cooldown: Duration::from_secs(retry.scrape_cooldown_seconds),
            metrics,
        }
    }

    pub async fn scrape<R, F>(
        &self,
        runtime: &mut R,
        fetcher: &F,
        request: &ScrapeRequest,
    ) -> SessionResult<ScrapeOutcome>
    where
        R: ScriptRuntime + ?Sized,
        F: HttpFetcher + ?Sized,
    {
        let is_script = matches!(
            request,
            ScrapeRequest::Script { .. } | ScrapeRequest::ScriptNoReturn { .. }
        );
        let mut attempt = 0usize;
        loop {
            let failure = match self.dispatch(runtime, fetcher, request).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) => error,
            };
            if is_script {
                self.capture_attempt_failure(runtime).await;
            }
            attempt += 1;
            if attempt >= self.attempts {
                warn!(attempts = attempt, error = %failure, "scrape retry budget exhausted");
                return Err(SessionError::RetriesExhausted {
                    url: request_url(request).to_string(),
                    attempts: attempt,
                });
            }
            {
                let mut guard = self.metrics.lock().unwrap();
                guard.record_scrape_retry();
            }
            warn!(
                attempt,
                cooldown_seconds = self.cooldown.as_secs(),
                error = %failure,
                "recoverable scrape failure"
            );
            sleep(self.cooldown).await;
            if is_script {
                runtime.reload().await?;
            }
        }
    }

    async fn capture_attempt_failure<R>(&self, runtime: &mut R)
    where
        R: ScriptRuntime + ?Sized,
    {
        match runtime.capture_failure().await {
            Ok(()) => {
                let mut guard = self.metrics.lock().unwrap();
                guard.record_diagnostic();
            }
            // Capture problems must never displace the failure that
            // triggered them.
            Err(err) => warn!(error = %err, "failed to capture scrape diagnostic"),
        }
    }

    async fn dispatch<R, F>(
        &self,
        runtime: &mut R,
        fetcher: &F,
        request: &ScrapeRequest,
    ) -> SessionResult<ScrapeOutcome>
    where
        R: ScriptRuntime + ?Sized,
        F: HttpFetcher + ?Sized,
    {
        match request {
            ScrapeRequest::Script { body, wait_for } => {
                {
                    let mut guard = self.metrics.lock().unwrap();
                    guard.record_browser_scrape();
                }
                if let Some(selector) = wait_for {
                    runtime.wait_for(selector, SCRIPT_WAIT_TIMEOUT).await?;
                }
                let value = runtime.evaluate(&wrap_script(body, true)).await?;
                Ok(ScrapeOutcome::Value(value))
            }
            ScrapeRequest::ScriptNoReturn { body, wait_for } => {
                {
                    let mut guard = self.metrics.lock().unwrap();
                    guard.record_browser_scrape();
                }
                if let Some(selector) = wait_for {
                    runtime.wait_for(selector, SCRIPT_WAIT_TIMEOUT).await?;
                }
                runtime.evaluate(&wrap_script(body, false)).await?;
                Ok(ScrapeOutcome::Done)
            }
            ScrapeRequest::Element { selector, url } => {
                {
                    let mut guard = self.metrics.lock().unwrap();
                    guard.record_http_scrape();
                }
                let body = fetcher.get(url).await?;
                Ok(ScrapeOutcome::Fragments(extract_fragments(
                    &body, selector,
                )?))
            }
        }
    }
}

fn request_url(request: &ScrapeRequest) -> &str {
    match request {
        ScrapeRequest::Element { url, .. } => url,
        _ => "in-page script",
    }
}

/// Wraps a script body in an async IIFE so awaits inside the body
/// resolve before the evaluation returns.
fn wrap_script(body: &str, with_return: bool) -> String {
    if with_return {
        format!("(async () => {{ return {body} }})()")
    } else {
        format!("(async () => {{ {body} }})()")
    }
}

fn extract_fragments(document: &str, selector: &str) -> SessionResult<Vec<String>> {
    let parsed = Html::parse_document(document);
    let selector = Selector::parse(selector)
        .map_err(|err| SessionError::Selector(format!("{selector}: {err}")))?;
    Ok(parsed
        .select(&selector)
        .map(|element| element.html())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_script_variants() {
        assert_eq!(
            wrap_script("document.title", true),
            "(async () => { return document.title })()"
        );
        assert_eq!(
            wrap_script("window.scrollTo(0, 0)", false),
            "(async () => { window.scrollTo(0, 0) })()"
        );
    }

    #[test]
    fn extract_fragments_returns_matching_subtrees() {
        let html = r#"<html><body>
            <div class="item"><span>one</span></div>
            <div class="item"><span>two</span></div>
            <div class="other">three</div>
        </body></html>"#;
        let fragments = extract_fragments(html, "div.item").unwrap();
        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].contains("one"));
        assert!(fragments[1].contains("two"));
    }

    #[test]
    fn invalid_selector_is_reported() {
        let err = extract_fragments("<html></html>", ":::nope").unwrap_err();
        assert!(matches!(err, SessionError::Selector(_)));
    }
}
