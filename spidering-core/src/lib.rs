pub mod config;
pub mod error;
pub mod session;

pub use config::{load_spidering_config, SpideringConfig};
pub use error::{ConfigError, Result};
pub use session::{
    format_bytes, ErrorRuleBook, InteractionOptions, InteractionSimulator, LaunchOptions,
    NavigationController, NavigationReport, PageProfile, ReqwestFetcher, ScrapeDispatcher,
    ScrapeOutcome, ScrapeRequest, Session, SessionError, SessionLauncher, SessionMetrics,
    SessionResult,
};
