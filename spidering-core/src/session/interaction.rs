use std::time::Duration;

use async_trait::async_trait;
use rand::{thread_rng, Rng};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::InteractionSection;

use super::error::SessionResult;

/// Seam between the simulator and a concrete page's input machinery.
/// The production implementation lives in [`super::page::PageSession`].
#[async_trait(?Send)]
pub trait InputSurface {
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> SessionResult<()>;
    async fn click(&mut self, selector: &str) -> SessionResult<()>;
    async fn hover(&mut self, selector: &str) -> SessionResult<()>;
    async fn focus(&mut self, selector: &str) -> SessionResult<()>;
    async fn type_char(&mut self, selector: &str, ch: char) -> SessionResult<()>;
    async fn exists(&mut self, selector: &str) -> SessionResult<bool>;
    async fn scroll_by(&mut self, delta_y: f64) -> SessionResult<()>;
    async fn capture_failure(&mut self) -> SessionResult<()>;
}

/// Optional element waits around an interaction. Both waits share the
/// configured timeout unless overridden per call.
#[derive(Debug, Clone, Default)]
pub struct InteractionOptions {
    pub wait_before: Option<String>,
    pub wait_after: Option<String>,
    pub wait_timeout: Option<Duration>,
}

/// Performs page interactions at a human cadence: each keystroke is a
/// distinct input event trailed by a uniformly random pause.
#[derive(Debug, Clone)]
pub struct InteractionSimulator {
    config: InteractionSection,
}

impl InteractionSimulator {
    pub fn new(config: InteractionSection) -> Self {
        Self { config }
    }

    pub async fn click<S>(
        &self,
        surface: &mut S,
        selector: &str,
        options: &InteractionOptions,
    ) -> SessionResult<()>
    where
        S: InputSurface + ?Sized,
    {
        self.wait_before(surface, options).await?;
        let clicked = surface.click(selector).await;
        self.guard(surface, selector, clicked).await?;
        self.wait_after(surface, options).await
    }

    pub async fn hover<S>(
        &self,
        surface: &mut S,
        selector: &str,
        options: &InteractionOptions,
    ) -> SessionResult<()>
    where
        S: InputSurface + ?Sized,
    {
        self.wait_before(surface, options).await?;
        let hovered = surface.hover(selector).await;
        self.guard(surface, selector, hovered).await?;
        self.wait_after(surface, options).await
    }

    /// Focuses the element and types `text` one character at a time,
    /// sleeping a uniformly random interval after every keystroke.
    pub async fn type_input<S>(
        &self,
        surface: &mut S,
        selector: &str,
        text: &str,
        options: &InteractionOptions,
    ) -> SessionResult<()>
    where
        S: InputSurface + ?Sized,
    {
        self.wait_before(surface, options).await?;
        let focused = surface.focus(selector).await;
        self.guard(surface, selector, focused).await?;
        for ch in text.chars() {
            let typed = surface.type_char(selector, ch).await;
            self.guard(surface, selector, typed).await?;
            sleep(self.typing_delay()).await;
        }
        debug!(selector, chars = text.chars().count(), "typed input");
        self.wait_after(surface, options).await
    }

    pub async fn element_exists<S>(&self, surface: &mut S, selector: &str) -> SessionResult<bool>
    where
        S: InputSurface + ?Sized,
    {
        surface.exists(selector).await
    }

    /// Scrolls the page in `count` bursts of `height` pixels, pausing
    /// between bursts.
    pub async fn scroll_page<S>(
        &self,
        surface: &mut S,
        count: usize,
        height: Option<f64>,
    ) -> SessionResult<()>
    where
        S: InputSurface + ?Sized,
    {
        let delta = height.unwrap_or(600.0);
        for _ in 0..count {
            surface.scroll_by(delta).await?;
            sleep(Duration::from_millis(self.config.scroll_pause_ms)).await;
        }
        Ok(())
    }

    fn typing_delay(&self) -> Duration {
        let lower = self.config.min_type_delay_ms.min(self.config.max_type_delay_ms);
        let upper = self.config.min_type_delay_ms.max(self.config.max_type_delay_ms);
        let millis = thread_rng().gen_range(lower..=upper);
        Duration::from_millis(millis)
    }

    fn wait_timeout(&self, options: &InteractionOptions) -> Duration {
        options
            .wait_timeout
            .unwrap_or(Duration::from_millis(self.config.wait_timeout_ms))
    }

    async fn wait_before<S>(
        &self,
        surface: &mut S,
        options: &InteractionOptions,
    ) -> SessionResult<()>
    where
        S: InputSurface + ?Sized,
    {
        if let Some(selector) = &options.wait_before {
            let timeout = self.wait_timeout(options);
            let waited = surface.wait_for(selector, timeout).await;
            self.guard(surface, selector, waited).await?;
        }
        Ok(())
    }

    async fn wait_after<S>(
        &self,
        surface: &mut S,
        options: &InteractionOptions,
    ) -> SessionResult<()>
    where
        S: InputSurface + ?Sized,
    {
        if let Some(selector) = &options.wait_after {
            let timeout = self.wait_timeout(options);
            let waited = surface.wait_for(selector, timeout).await;
            self.guard(surface, selector, waited).await?;
        }
        Ok(())
    }

    /// Captures an error screenshot on failure, then surfaces the
    /// failure unchanged.
    async fn guard<S>(
        &self,
        surface: &mut S,
        selector: &str,
        result: SessionResult<()>,
    ) -> SessionResult<()>
    where
        S: InputSurface + ?Sized,
    {
        if let Err(error) = result {
            if let Err(capture_err) = surface.capture_failure().await {
                warn!(selector, error = %capture_err, "failed to capture interaction diagnostic");
            }
            return Err(error);
        }
        Ok(())
    }
}
