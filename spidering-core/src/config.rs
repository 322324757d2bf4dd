use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SpideringConfig {
    pub system: SystemSection,
    pub chromium: ChromiumSection,
    pub flags: FlagsSection,
    pub user_agents: UserAgentSection,
    pub error_handlers: Vec<ErrorRuleEntry>,
    pub retry: RetrySection,
    pub interaction: InteractionSection,
    pub scrape: ScrapeSection,
    pub diagnostics: DiagnosticsSection,
    pub timeouts: TimeoutSection,
}

impl SpideringConfig {
    /// Navigation timeout for the configured environment, in milliseconds.
    pub fn navigation_timeout_ms(&self) -> u64 {
        if self.system.environment == "development" {
            self.timeouts.navigation_development_ms
        } else {
            self.timeouts.navigation_ms
        }
    }

    pub fn headless(&self) -> bool {
        // Development runs headed with devtools, mirroring a debugging session.
        self.system.environment != "development" && self.chromium.headless
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub devtools_in_development: bool,
    pub request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagsSection {
    pub no_first_run: bool,
    pub disable_automation_controlled: bool,
    pub mute_audio: bool,
    pub lang: Option<String>,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentSection {
    pub pool: Vec<String>,
    pub randomize: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorRuleEntry {
    pub pattern: String,
    pub sleep_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    pub max_navigation_attempts: usize,
    pub scrape_attempts: usize,
    pub scrape_cooldown_seconds: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_navigation_attempts: 5,
            scrape_attempts: 3,
            scrape_cooldown_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionSection {
    pub min_type_delay_ms: u64,
    pub max_type_delay_ms: u64,
    pub wait_timeout_ms: u64,
    pub scroll_pause_ms: u64,
}

impl Default for InteractionSection {
    fn default() -> Self {
        Self {
            min_type_delay_ms: 500,
            max_type_delay_ms: 5000,
            wait_timeout_ms: 120_000,
            scroll_pause_ms: 400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeSection {
    pub user_agent: String,
    pub downloads_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosticsSection {
    pub screenshots_dir: String,
    pub html_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutSection {
    pub navigation_ms: u64,
    pub navigation_development_ms: u64,
}

pub fn load_spidering_config<P: AsRef<Path>>(path: P) -> Result<SpideringConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/spidering.toml");
        let config = load_spidering_config(path).expect("config should parse");
        assert_eq!(config.retry.max_navigation_attempts, 5);
        assert_eq!(config.retry.scrape_cooldown_seconds, 60);
        assert!(config.user_agents.pool.len() >= 2);
        assert!(!config.error_handlers.is_empty());
        assert_eq!(config.interaction.min_type_delay_ms, 500);
    }

    #[test]
    fn development_environment_overrides_timeout_and_headless() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/spidering.toml");
        let mut config = load_spidering_config(path).expect("config should parse");
        config.system.environment = "development".into();
        assert_eq!(
            config.navigation_timeout_ms(),
            config.timeouts.navigation_development_ms
        );
        assert!(!config.headless());
        config.system.environment = "production".into();
        assert_eq!(config.navigation_timeout_ms(), config.timeouts.navigation_ms);
    }

    #[test]
    fn missing_config_reports_path() {
        let err = load_spidering_config("/nonexistent/spidering.toml").unwrap_err();
        match err {
            ConfigError::Io { path, .. } => {
                assert!(path.ends_with("spidering.toml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
