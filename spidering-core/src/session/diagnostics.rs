use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::config::DiagnosticsSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Screenshot,
    Html,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "png",
            ArtifactKind::Html => "html",
        }
    }
}

/// Resolves where diagnostic artifacts land on disk.
#[derive(Debug, Clone)]
pub struct DiagnosticPaths {
    screenshots_dir: PathBuf,
    html_dir: PathBuf,
}

impl DiagnosticPaths {
    pub fn new(section: &DiagnosticsSection) -> Self {
        Self {
            screenshots_dir: PathBuf::from(&section.screenshots_dir),
            html_dir: PathBuf::from(&section.html_dir),
        }
    }

    pub fn dir_for(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Screenshot => &self.screenshots_dir,
            ArtifactKind::Html => &self.html_dir,
        }
    }

    pub fn artifact(&self, url: &str, kind: ArtifactKind, is_error: bool) -> PathBuf {
        self.dir_for(kind)
            .join(artifact_name(url, kind, is_error, Utc::now()))
    }
}

fn domain_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^https?://(?:www\.)?([^/?#]+)").expect("valid domain pattern")
    })
}

/// Host of `url` with a leading `www.` stripped. Strings that do not
/// look like an http(s) URL yield `None`.
pub fn registered_domain(url: &str) -> Option<String> {
    domain_pattern()
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|host| host.as_str().to_string())
}

/// Artifact file name: `<domain>_<timestamp>[_error].<ext>`, with the
/// domain segment omitted when the URL carries none. Timestamps are
/// second-resolution so artifacts from one capture burst collide into
/// a single file instead of flooding the directory.
pub fn artifact_name(
    url: &str,
    kind: ArtifactKind,
    is_error: bool,
    now: DateTime<Utc>,
) -> String {
    let timestamp = now.format("%Y-%m-%dT%H-%M-%S");
    let domain_prefix = registered_domain(url)
        .map(|domain| format!("{domain}_"))
        .unwrap_or_default();
    let suffix = if is_error { "_error" } else { "" };
    format!("{domain_prefix}{timestamp}{suffix}.{}", kind.extension())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn domain_strips_www_and_trailing_parts() {
        assert_eq!(
            registered_domain("https://www.example.com/x?y=1"),
            Some("example.com".to_string())
        );
        assert_eq!(
            registered_domain("http://sub.example.org/path#frag"),
            Some("sub.example.org".to_string())
        );
    }

    #[test]
    fn non_http_input_yields_no_domain() {
        assert_eq!(registered_domain("about:blank"), None);
        assert_eq!(registered_domain("example.com/no-scheme"), None);
        assert_eq!(registered_domain(""), None);
    }

    #[test]
    fn error_artifact_name_layout() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 20, 30).unwrap();
        let name = artifact_name(
            "https://www.example.com/x?y=1",
            ArtifactKind::Screenshot,
            true,
            now,
        );
        assert_eq!(name, "example.com_2024-03-01T10-20-30_error.png");
    }

    #[test]
    fn artifact_without_domain_still_names_cleanly() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 20, 30).unwrap();
        let name = artifact_name("about:blank", ArtifactKind::Html, false, now);
        assert_eq!(name, "2024-03-01T10-20-30.html");
    }
}
