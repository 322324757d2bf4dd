use std::fmt::Write as _;
use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use spidering_core::session::{ScriptRuntime, SessionResult};
use spidering_core::{
    format_bytes, load_spidering_config, ErrorRuleBook, LaunchOptions, NavigationController,
    ReqwestFetcher, ScrapeDispatcher, ScrapeOutcome, ScrapeRequest, SessionError, SessionLauncher,
    SessionMetrics,
};

use crate::{DisplayFallback, Result, SmokeArgs};

#[derive(Debug, Serialize)]
pub struct SmokeReport {
    pub url: String,
    pub status: u16,
    pub attempts: usize,
    pub received: String,
    pub metrics: SessionMetrics,
}

impl DisplayFallback for SmokeReport {
    fn display(&self) -> String {
        format!(
            "{} -> {} in {} attempt(s), {} received",
            self.url, self.status, self.attempts, self.received
        )
    }
}

pub async fn smoke(config_path: &Path, args: &SmokeArgs) -> Result<SmokeReport> {
    let config = load_spidering_config(config_path)?;
    let rules = ErrorRuleBook::from_entries(&config.error_handlers);
    let retry = config.retry.clone();
    let launcher = SessionLauncher::new(config);

    let options = LaunchOptions {
        headless: args.headed.then_some(false),
        ..LaunchOptions::default()
    };
    let mut session = launcher.create_browser(options).await?;
    let controller = NavigationController::new(rules, &retry, session.metrics_handle());

    session.create_page(args.profile.into()).await?;
    if let Some(cookies) = &args.cookies {
        session.set_cookies(cookies).await?;
    }

    let outcome = {
        let page = session.page_mut()?;
        controller.navigate(page, &args.url).await
    };
    let metrics = session.metrics();
    let close_result = session
        .close_browser(args.cookies.as_deref())
        .await;

    let report = outcome?;
    close_result?;
    Ok(SmokeReport {
        url: report.url,
        status: report.status,
        attempts: report.attempts,
        received: format_bytes(report.bytes_received),
        metrics,
    })
}

#[derive(Debug, Serialize)]
pub struct FetchReport {
    pub url: String,
    pub selector: String,
    pub fragments: Vec<String>,
}

impl DisplayFallback for FetchReport {
    fn display(&self) -> String {
        let mut out = format!(
            "{} matched {} fragment(s) for `{}`",
            self.url,
            self.fragments.len(),
            self.selector
        );
        for fragment in &self.fragments {
            let _ = write!(out, "\n{fragment}");
        }
        out
    }
}

/// The fetch command runs without any browser; a script request
/// reaching this runtime is a bug.
struct NoBrowser;

#[async_trait(?Send)]
impl ScriptRuntime for NoBrowser {
    async fn evaluate(&mut self, _expression: &str) -> SessionResult<serde_json::Value> {
        Err(SessionError::Unexpected(
            "fetch mode has no browser to evaluate in".into(),
        ))
    }

    async fn wait_for(
        &mut self,
        _selector: &str,
        _timeout: std::time::Duration,
    ) -> SessionResult<()> {
        Err(SessionError::Unexpected(
            "fetch mode has no page to wait on".into(),
        ))
    }

    async fn reload(&mut self) -> SessionResult<()> {
        Err(SessionError::Unexpected(
            "fetch mode has no page to reload".into(),
        ))
    }

    async fn capture_failure(&mut self) -> SessionResult<()> {
        Err(SessionError::Unexpected(
            "fetch mode has no page to capture".into(),
        ))
    }
}

pub async fn fetch(config_path: &Path, args: &crate::FetchArgs) -> Result<FetchReport> {
    let config = load_spidering_config(config_path)?;
    let fetcher = ReqwestFetcher::new(&config.scrape);
    let metrics = std::sync::Arc::new(std::sync::Mutex::new(SessionMetrics::default()));
    let dispatcher = ScrapeDispatcher::new(&config.retry, metrics);

    let request = ScrapeRequest::Element {
        selector: args.selector.clone(),
        url: args.url.clone(),
    };
    let outcome = dispatcher.scrape(&mut NoBrowser, &fetcher, &request).await?;
    let fragments = match outcome {
        ScrapeOutcome::Fragments(fragments) => fragments,
        _ => Vec::new(),
    };
    Ok(FetchReport {
        url: args.url.clone(),
        selector: args.selector.clone(),
        fragments,
    })
}

#[derive(Debug, Serialize)]
pub struct ConfigReport {
    pub environment: String,
    pub error_rules: usize,
    pub user_agents: usize,
    pub max_navigation_attempts: usize,
    pub scrape_attempts: usize,
    pub scrape_cooldown_seconds: u64,
    pub navigation_timeout_ms: u64,
}

impl DisplayFallback for ConfigReport {
    fn display(&self) -> String {
        format!(
            "environment={} rules={} user_agents={} nav_attempts={} scrape_attempts={} cooldown={}s nav_timeout={}ms",
            self.environment,
            self.error_rules,
            self.user_agents,
            self.max_navigation_attempts,
            self.scrape_attempts,
            self.scrape_cooldown_seconds,
            self.navigation_timeout_ms,
        )
    }
}

pub fn config_check(config_path: &Path) -> Result<ConfigReport> {
    let config = load_spidering_config(config_path)?;
    Ok(ConfigReport {
        environment: config.system.environment.clone(),
        error_rules: config.error_handlers.len(),
        user_agents: config.user_agents.pool.len(),
        max_navigation_attempts: config.retry.max_navigation_attempts,
        scrape_attempts: config.retry.scrape_attempts,
        scrape_cooldown_seconds: config.retry.scrape_cooldown_seconds,
        navigation_timeout_ms: config.navigation_timeout_ms(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_path() -> std::path::PathBuf {
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/spidering.toml")
    }

    #[test]
    fn config_check_summarizes_the_fixture() {
        let report = config_check(&fixture_path()).unwrap();
        assert_eq!(report.environment, "production");
        assert_eq!(report.max_navigation_attempts, 5);
        assert!(report.error_rules >= 3);
    }

    #[test]
    fn config_check_fails_cleanly_on_missing_file() {
        let missing = std::path::Path::new("/nonexistent/spidering.toml");
        assert!(config_check(missing).is_err());
    }
}
