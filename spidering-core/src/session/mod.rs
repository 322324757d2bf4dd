mod diagnostics;
mod error;
mod interaction;
mod lifecycle;
mod metrics;
mod navigation;
mod page;
mod profile;
mod rules;
mod scrape;

pub use diagnostics::{artifact_name, registered_domain, ArtifactKind, DiagnosticPaths};
pub use error::{SessionError, SessionResult};
pub use interaction::{InputSurface, InteractionOptions, InteractionSimulator};
pub use lifecycle::{LaunchOptions, LaunchSpec, Session, SessionLauncher};
pub use metrics::SessionMetrics;
pub use navigation::{format_bytes, NavigationController, NavigationReport, NavigationSession};
pub use page::PageSession;
pub use profile::PageProfile;
pub use rules::{ErrorRule, ErrorRuleBook};
pub use scrape::{
    HttpFetcher, ReqwestFetcher, ScrapeDispatcher, ScrapeOutcome, ScrapeRequest, ScriptRuntime,
};
