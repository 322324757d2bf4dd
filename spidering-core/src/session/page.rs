use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventResponseReceived, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventLifecycleEvent, NavigateParams, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::task::AbortHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

use super::diagnostics::{ArtifactKind, DiagnosticPaths};
use super::error::{SessionError, SessionResult};
use super::interaction::InputSurface;
use super::metrics::SessionMetrics;
use super::navigation::NavigationSession;
use super::profile::{apply_profile, PageProfile};
use super::scrape::ScriptRuntime;

const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A configured page inside a live session: holds the chromiumoxide
/// page, the session-current URL, and the interception listener
/// handles that die with it.
#[derive(Debug)]
pub struct PageSession {
    page: Page,
    profile: PageProfile,
    current_url: Option<String>,
    navigation_timeout: Duration,
    diagnostics: DiagnosticPaths,
    metrics: Arc<Mutex<SessionMetrics>>,
    listeners: Vec<AbortHandle>,
}

impl PageSession {
    pub(crate) async fn new(
        page: Page,
        profile: PageProfile,
        navigation_timeout: Duration,
        diagnostics: DiagnosticPaths,
        metrics: Arc<Mutex<SessionMetrics>>,
    ) -> SessionResult<Self> {
        let listeners = apply_profile(&page, profile).await?;
        {
            let mut guard = metrics.lock().unwrap();
            guard.record_page_open();
        }
        Ok(Self {
            page,
            profile,
            current_url: None,
            navigation_timeout,
            diagnostics,
            metrics,
            listeners,
        })
    }

    pub fn profile(&self) -> PageProfile {
        self.profile
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Navigate and wait for DOMContentLoaded, load and network idle
    /// to all fire before the timeout; returns the document status.
    async fn navigate_and_settle(&mut self, url: &str) -> SessionResult<u16> {
        // The URL becomes session-current before the attempt so error
        // artifacts are named after the page we were trying to reach.
        self.current_url = Some(url.to_string());

        self.page.execute(NetworkEnableParams::default()).await?;
        self.page
            .execute(SetLifecycleEventsEnabledParams::new(true))
            .await?;
        let mut lifecycle = self.page.event_listener::<EventLifecycleEvent>().await?;
        let mut responses = self.page.event_listener::<EventResponseReceived>().await?;

        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(SessionError::Configuration)?;
        self.page.goto(params).await?;

        let wait = async {
            let mut seen: HashSet<String> = HashSet::new();
            let mut status: Option<u16> = None;
            loop {
                tokio::select! {
                    Some(event) = lifecycle.next() => {
                        trace!(name = %event.name, "lifecycle signal");
                        seen.insert(event.name.clone());
                    }
                    Some(event) = responses.next() => {
                        if status.is_none()
                            && matches!(event.r#type, ResourceType::Document)
                        {
                            status = Some(event.response.status as u16);
                        }
                    }
                    else => break,
                }
                if seen.contains("DOMContentLoaded")
                    && seen.contains("load")
                    && seen.contains("networkIdle")
                {
                    break;
                }
            }
            status
        };

        let status = timeout(self.navigation_timeout, wait)
            .await
            .map_err(|_| SessionError::Navigation {
                url: url.to_string(),
                message: format!(
                    "Navigation timeout of {} ms exceeded",
                    self.navigation_timeout.as_millis()
                ),
            })?;
        debug!(url, status = ?status, "page settled");
        // Pages served entirely from cache may not replay a document
        // response; treat those as the success status.
        Ok(status.unwrap_or(200))
    }

    /// Persists a screenshot; error captures land in the diagnostics
    /// directory under the derived domain/timestamp name.
    pub async fn take_screenshot(
        &mut self,
        is_error: bool,
        path: Option<PathBuf>,
    ) -> SessionResult<PathBuf> {
        let target = match path {
            Some(path) => path,
            None => {
                let url = self.current_url().unwrap_or("").to_string();
                self.diagnostics
                    .artifact(&url, ArtifactKind::Screenshot, is_error)
            }
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.page
            .save_screenshot(ScreenshotParams::builder().build(), &target)
            .await?;
        {
            let mut guard = self.metrics.lock().unwrap();
            guard.record_diagnostic();
        }
        debug!(path = %target.display(), "screenshot saved");
        Ok(target)
    }

    /// Persists the page's full HTML, named like screenshots.
    pub async fn save_full_html(
        &mut self,
        is_error: bool,
        path: Option<PathBuf>,
    ) -> SessionResult<PathBuf> {
        let target = match path {
            Some(path) => path,
            None => {
                let url = self.current_url().unwrap_or("").to_string();
                self.diagnostics.artifact(&url, ArtifactKind::Html, is_error)
            }
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = self.page.content().await?;
        tokio::fs::write(&target, content).await?;
        {
            let mut guard = self.metrics.lock().unwrap();
            guard.record_diagnostic();
        }
        debug!(path = %target.display(), "html snapshot saved");
        Ok(target)
    }

    async fn wait_for_element(&mut self, selector: &str, wait: Duration) -> SessionResult<()> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SessionError::Timeout(format!("selector {selector}")));
            }
            sleep(ELEMENT_POLL_INTERVAL).await;
        }
    }

    pub(crate) async fn close(mut self) -> SessionResult<()> {
        for handle in self.listeners.drain(..) {
            handle.abort();
        }
        self.current_url = None;
        self.page.clone().close().await?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl NavigationSession for PageSession {
    async fn open(&mut self, url: &str) -> SessionResult<u16> {
        self.navigate_and_settle(url).await
    }

    async fn bytes_received(&mut self) -> SessionResult<u64> {
        let raw = self
            .page
            .evaluate("JSON.stringify(performance.getEntries())")
            .await?
            .into_value::<String>()
            .map_err(|err| SessionError::Evaluate(err.to_string()))?;
        let entries: Vec<serde_json::Value> = serde_json::from_str(&raw)
            .map_err(|err| SessionError::Evaluate(err.to_string()))?;
        let total = entries
            .iter()
            .filter_map(|entry| entry.get("transferSize"))
            .filter_map(|size| size.as_f64())
            .sum::<f64>();
        Ok(total as u64)
    }

    async fn capture_failure(&mut self) -> SessionResult<()> {
        self.take_screenshot(true, None).await?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl ScriptRuntime for PageSession {
    async fn evaluate(&mut self, expression: &str) -> SessionResult<serde_json::Value> {
        self.page
            .evaluate(expression)
            .await?
            .into_value::<serde_json::Value>()
            .map_err(|err| SessionError::Evaluate(err.to_string()))
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> SessionResult<()> {
        self.wait_for_element(selector, timeout).await
    }

    async fn capture_failure(&mut self) -> SessionResult<()> {
        // Failed evaluations get both views of the page: what it
        // looked like and what the DOM actually held.
        self.take_screenshot(true, None).await?;
        self.save_full_html(true, None).await?;
        Ok(())
    }

    async fn reload(&mut self) -> SessionResult<()> {
        let url = self
            .current_url
            .clone()
            .ok_or(SessionError::NoActivePage)?;
        let status = self.navigate_and_settle(&url).await?;
        if status != 200 {
            return Err(SessionError::BadStatus { status });
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl InputSurface for PageSession {
    async fn wait_for(&mut self, selector: &str, wait: Duration) -> SessionResult<()> {
        self.wait_for_element(selector, wait).await
    }

    async fn click(&mut self, selector: &str) -> SessionResult<()> {
        let element = self.page.find_element(selector).await.map_err(|err| {
            SessionError::Interaction {
                selector: selector.to_string(),
                message: err.to_string(),
            }
        })?;
        element
            .click()
            .await
            .map_err(|err| SessionError::Interaction {
                selector: selector.to_string(),
                message: err.to_string(),
            })?;
        Ok(())
    }

    async fn hover(&mut self, selector: &str) -> SessionResult<()> {
        let element = self.page.find_element(selector).await.map_err(|err| {
            SessionError::Interaction {
                selector: selector.to_string(),
                message: err.to_string(),
            }
        })?;
        let bbox = element
            .bounding_box()
            .await
            .map_err(|err| SessionError::Interaction {
                selector: selector.to_string(),
                message: format!("failed to get element bounding box: {err}"),
            })?;
        let center = Point::new(bbox.x + bbox.width / 2.0, bbox.y + bbox.height / 2.0);
        self.page
            .move_mouse(center)
            .await
            .map_err(|err| SessionError::Interaction {
                selector: selector.to_string(),
                message: format!("failed to move mouse: {err}"),
            })?;
        Ok(())
    }

    async fn focus(&mut self, selector: &str) -> SessionResult<()> {
        // Clicking is how a person focuses an input.
        self.click(selector).await
    }

    async fn type_char(&mut self, selector: &str, ch: char) -> SessionResult<()> {
        let element = self.page.find_element(selector).await.map_err(|err| {
            SessionError::Interaction {
                selector: selector.to_string(),
                message: err.to_string(),
            }
        })?;
        element
            .type_str(ch.to_string())
            .await
            .map_err(|err| SessionError::Interaction {
                selector: selector.to_string(),
                message: format!("failed to type character: {err}"),
            })?;
        Ok(())
    }

    async fn exists(&mut self, selector: &str) -> SessionResult<bool> {
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn scroll_by(&mut self, delta_y: f64) -> SessionResult<()> {
        let script = format!("window.scrollBy({{ top: {delta_y}, behavior: 'smooth' }});");
        self.page
            .evaluate(script.as_str())
            .await
            .map_err(|err| SessionError::Evaluate(format!("scroll script failed: {err}")))?;
        Ok(())
    }

    async fn capture_failure(&mut self) -> SessionResult<()> {
        self.take_screenshot(true, None).await?;
        Ok(())
    }
}

impl Drop for PageSession {
    fn drop(&mut self) {
        for handle in self.listeners.drain(..) {
            handle.abort();
        }
        if self.current_url.is_some() {
            warn!("page session dropped without explicit close");
        }
    }
}
