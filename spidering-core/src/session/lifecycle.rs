use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use futures::StreamExt;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SpideringConfig;

use super::diagnostics::DiagnosticPaths;
use super::error::{SessionError, SessionResult};
use super::metrics::SessionMetrics;
use super::page::PageSession;
use super::profile::PageProfile;

/// Per-session launch knobs. Everything not set here comes from the
/// loaded config; once the session exists the resulting spec is
/// frozen.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub proxy: Option<String>,
    pub endpoint_server: Option<String>,
    pub block_ads: bool,
    pub slow_mo: Option<Duration>,
    pub headless: Option<bool>,
    pub user_data_dir: Option<PathBuf>,
}

/// The frozen launch parameters of one session. Built from a private
/// copy of the configured args so one session's proxy flag can never
/// leak into another's.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    args: Vec<String>,
    headless: bool,
    endpoint_server: Option<String>,
    block_ads: bool,
    slow_mo: Option<Duration>,
    user_data_dir: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn headless(&self) -> bool {
        self.headless
    }

    pub fn is_remote(&self) -> bool {
        self.endpoint_server.is_some()
    }

    /// Websocket attach URL for an endpoint server: the chrome args
    /// ride along as query parameters.
    pub fn endpoint_url(&self) -> Option<String> {
        let server = self.endpoint_server.as_deref()?;
        let mut query = self.args.join("&");
        if self.block_ads {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str("blockAds");
        }
        if let Some(slow_mo) = self.slow_mo {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&format!("slowMo={}", slow_mo.as_millis()));
        }
        if query.is_empty() {
            Some(format!("ws://{server}"))
        } else {
            Some(format!("ws://{server}?{query}"))
        }
    }
}

/// Builds sessions from the loaded config plus per-session options.
#[derive(Debug, Clone)]
pub struct SessionLauncher {
    config: Arc<SpideringConfig>,
}

impl SessionLauncher {
    pub fn new(config: SpideringConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SpideringConfig {
        &self.config
    }

    pub fn config_handle(&self) -> Arc<SpideringConfig> {
        Arc::clone(&self.config)
    }

    pub async fn create_browser(&self, options: LaunchOptions) -> SessionResult<Session> {
        let spec = self.build_launch_spec(&options);
        let (browser, mut handler) = match spec.endpoint_url() {
            Some(url) => {
                info!(url = %url, "attaching to endpoint browser");
                Browser::connect(url)
                    .await
                    .map_err(|err| SessionError::Launch(err.to_string()))?
            }
            None => {
                let chromium_config = self.build_chromium_config(&spec)?;
                info!(headless = spec.headless, "launching chromium instance");
                Browser::launch(chromium_config)
                    .await
                    .map_err(|err| SessionError::Launch(err.to_string()))?
            }
        };

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        Ok(Session {
            browser,
            handler_task: Some(handler_task),
            config: Arc::clone(&self.config),
            spec,
            metrics: Arc::new(Mutex::new(SessionMetrics::default())),
            page: None,
            cookies_path: None,
        })
    }

    fn build_launch_spec(&self, options: &LaunchOptions) -> LaunchSpec {
        let mut args = vec![];
        if self.config.flags.no_first_run {
            args.push("--no-first-run".to_string());
        }
        if self.config.flags.disable_automation_controlled {
            args.push("--disable-features=AutomationControlled".to_string());
        }
        if self.config.flags.mute_audio {
            args.push("--mute-audio".to_string());
        }
        if let Some(lang) = &self.config.flags.lang {
            args.push(format!("--lang={lang}"));
        }
        if self.config.system.environment == "development"
            && self.config.chromium.devtools_in_development
        {
            args.push("--auto-open-devtools-for-tabs".to_string());
        }
        args.extend(self.config.flags.extra_args.iter().cloned());
        if let Some(proxy) = &options.proxy {
            args.push(format!("--proxy-server={proxy}"));
        }
        LaunchSpec {
            args,
            headless: options.headless.unwrap_or_else(|| self.config.headless()),
            endpoint_server: options.endpoint_server.clone(),
            block_ads: options.block_ads,
            slow_mo: options.slow_mo,
            user_data_dir: options.user_data_dir.clone(),
        }
    }

    fn build_chromium_config(&self, spec: &LaunchSpec) -> SessionResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder();
        if let Some(executable) = &self.config.chromium.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if let Some(user_data_dir) = &spec.user_data_dir {
            builder = builder.user_data_dir(user_data_dir);
        }
        if !spec.headless {
            builder = builder.with_head();
        }
        if !self.config.chromium.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.config.chromium.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }
        builder = builder.args(spec.args.clone());
        builder.build().map_err(SessionError::Configuration)
    }
}

/// One live browser with at most one active page. Creating a new page
/// replaces the previous one; closing persists cookies first, then
/// tears down page and browser in order.
#[derive(Debug)]
pub struct Session {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    config: Arc<SpideringConfig>,
    spec: LaunchSpec,
    metrics: Arc<Mutex<SessionMetrics>>,
    page: Option<PageSession>,
    cookies_path: Option<PathBuf>,
}

impl Session {
    pub fn launch_spec(&self) -> &LaunchSpec {
        &self.spec
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.metrics.lock().unwrap().clone()
    }

    pub fn metrics_handle(&self) -> Arc<Mutex<SessionMetrics>> {
        Arc::clone(&self.metrics)
    }

    pub fn config(&self) -> &SpideringConfig {
        &self.config
    }

    pub async fn create_page(&mut self, profile: PageProfile) -> SessionResult<&mut PageSession> {
        if let Some(previous) = self.page.take() {
            if let Err(err) = previous.close().await {
                warn!(error = %err, "failed to close replaced page");
            }
        }
        let params = CreateTargetParams::new("about:blank");
        let page = self.browser.new_page(params).await?;

        if self.config.user_agents.randomize {
            if let Some(user_agent) = self.select_user_agent() {
                let params = SetUserAgentOverrideParams::builder()
                    .user_agent(user_agent.clone())
                    .build()
                    .map_err(SessionError::Configuration)?;
                page.set_user_agent(params).await?;
                debug!(ua = %user_agent, "user agent applied to page");
            }
        }

        let session_page = PageSession::new(
            page,
            profile,
            Duration::from_millis(self.config.navigation_timeout_ms()),
            DiagnosticPaths::new(&self.config.diagnostics),
            Arc::clone(&self.metrics),
        )
        .await?;
        Ok(self.page.insert(session_page))
    }

    pub fn page_mut(&mut self) -> SessionResult<&mut PageSession> {
        self.page.as_mut().ok_or(SessionError::NoActivePage)
    }

    /// Writes the page's full cookie set as pretty-printed JSON and
    /// remembers the path for `close_browser`.
    pub async fn save_cookies<P: AsRef<Path>>(&mut self, path: P) -> SessionResult<()> {
        let path = path.as_ref();
        let page = self.page.as_ref().ok_or(SessionError::NoActivePage)?;
        let cookies = page.page().get_cookies().await?;
        let json = serde_json::to_string_pretty(&cookies)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await?;
        self.cookies_path = Some(path.to_path_buf());
        {
            let mut guard = self.metrics.lock().unwrap();
            guard.record_cookies_saved();
        }
        debug!(path = %path.display(), count = cookies.len(), "cookies saved");
        Ok(())
    }

    /// Restores cookies from a previous run. A missing or empty file
    /// is a silent no-op; a present but malformed file is fatal.
    pub async fn set_cookies<P: AsRef<Path>>(&mut self, path: P) -> SessionResult<()> {
        let path = path.as_ref();
        let cookies = match load_cookie_file(path).await? {
            Some(cookies) => cookies,
            None => return Ok(()),
        };
        let page = self.page.as_ref().ok_or(SessionError::NoActivePage)?;
        page.page().set_cookies(cookies).await?;
        self.cookies_path = Some(path.to_path_buf());
        {
            let mut guard = self.metrics.lock().unwrap();
            guard.record_cookies_restored();
        }
        Ok(())
    }

    /// Ordered teardown: cookie persistence, then page, then browser.
    /// Later steps still run when an earlier one fails; the first
    /// failure is reported.
    pub async fn close_browser(mut self, cookies_path: Option<&Path>) -> SessionResult<()> {
        let mut first_failure: Option<SessionError> = None;

        let persist_to = cookies_path
            .map(Path::to_path_buf)
            .or_else(|| self.cookies_path.clone());
        if let Some(path) = persist_to {
            if self.page.is_some() {
                if let Err(err) = self.save_cookies(&path).await {
                    warn!(path = %path.display(), error = %err, "cookie persistence failed during close");
                    first_failure.get_or_insert(err);
                }
            }
        }

        if let Some(page) = self.page.take() {
            if let Err(err) = page.close().await {
                warn!(error = %err, "failed to close page");
                first_failure.get_or_insert(err);
            }
        }

        info!("shutting down browser session");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
            first_failure.get_or_insert(err.into());
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn select_user_agent(&self) -> Option<String> {
        let mut rng = rand::thread_rng();
        self.config.user_agents.pool.choose(&mut rng).cloned()
    }
}

/// Reads a cookie file: `None` when absent or empty, the parsed set
/// when present, `CookieFormat` when present but malformed.
pub(crate) async fn load_cookie_file(path: &Path) -> SessionResult<Option<Vec<CookieParam>>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no cookie file, continuing without");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    if content.trim().is_empty() {
        debug!(path = %path.display(), "cookie file empty, continuing without");
        return Ok(None);
    }
    let cookies: Vec<CookieParam> = serde_json::from_str(&content)?;
    Ok(Some(cookies))
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("session dropped without explicit close_browser");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_config() -> SpideringConfig {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/spidering.toml");
        crate::config::load_spidering_config(path).expect("fixture config should parse")
    }

    #[test]
    fn proxy_flag_stays_in_the_session_spec() {
        let launcher = SessionLauncher::new(fixture_config());
        let with_proxy = launcher.build_launch_spec(&LaunchOptions {
            proxy: Some("127.0.0.1:9050".into()),
            ..LaunchOptions::default()
        });
        let without_proxy = launcher.build_launch_spec(&LaunchOptions::default());
        assert!(with_proxy
            .args()
            .iter()
            .any(|arg| arg == "--proxy-server=127.0.0.1:9050"));
        assert!(!without_proxy
            .args()
            .iter()
            .any(|arg| arg.starts_with("--proxy-server")));
    }

    #[test]
    fn endpoint_url_carries_args_and_flags() {
        let launcher = SessionLauncher::new(fixture_config());
        let spec = launcher.build_launch_spec(&LaunchOptions {
            endpoint_server: Some("browserless:3000".into()),
            block_ads: true,
            slow_mo: Some(Duration::from_millis(250)),
            ..LaunchOptions::default()
        });
        let url = spec.endpoint_url().expect("endpoint spec should build a url");
        assert!(url.starts_with("ws://browserless:3000?"));
        assert!(url.contains("--no-first-run"));
        assert!(url.contains("blockAds"));
        assert!(url.contains("slowMo=250"));
    }

    #[test]
    fn local_spec_has_no_endpoint_url() {
        let launcher = SessionLauncher::new(fixture_config());
        let spec = launcher.build_launch_spec(&LaunchOptions::default());
        assert!(!spec.is_remote());
        assert!(spec.endpoint_url().is_none());
    }

    #[tokio::test]
    async fn missing_cookie_file_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_cookie_file(&dir.path().join("cookies.json"))
            .await
            .unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn empty_cookie_file_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        tokio::fs::write(&path, "  \n").await.unwrap();
        assert!(load_cookie_file(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_cookie_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        let err = load_cookie_file(&path).await.unwrap_err();
        assert!(matches!(err, SessionError::CookieFormat(_)));
    }

    #[tokio::test]
    async fn cookie_file_round_trips_through_serde() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        let cookies = vec![CookieParam::new("session", "abc123")];
        let json = serde_json::to_string_pretty(&cookies).unwrap();
        tokio::fs::write(&path, json).await.unwrap();
        let loaded = load_cookie_file(&path).await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "session");
        assert_eq!(loaded[0].value, "abc123");
    }

    #[test]
    fn devtools_flag_only_in_development() {
        let mut config = fixture_config();
        config.system.environment = "development".into();
        let launcher = SessionLauncher::new(config);
        let spec = launcher.build_launch_spec(&LaunchOptions::default());
        assert!(spec
            .args()
            .iter()
            .any(|arg| arg == "--auto-open-devtools-for-tabs"));

        let launcher = SessionLauncher::new(fixture_config());
        let spec = launcher.build_launch_spec(&LaunchOptions::default());
        assert!(!spec
            .args()
            .iter()
            .any(|arg| arg == "--auto-open-devtools-for-tabs"));
    }

    #[test]
    fn headless_override_wins_over_config() {
        let launcher = SessionLauncher::new(fixture_config());
        let spec = launcher.build_launch_spec(&LaunchOptions {
            headless: Some(false),
            ..LaunchOptions::default()
        });
        assert!(!spec.headless());
    }
}
