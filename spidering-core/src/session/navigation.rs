use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::RetrySection;

use super::error::{SessionError, SessionResult};
use super::metrics::SessionMetrics;
use super::rules::ErrorRuleBook;

/// Seam between the retry loop and a concrete page. The production
/// implementation lives in [`super::page::PageSession`].
#[async_trait(?Send)]
pub trait NavigationSession {
    /// Issue the navigation, wait for the joint completion signals
    /// (DOMContentLoaded, load, network idle) and return the document
    /// response status.
    async fn open(&mut self, url: &str) -> SessionResult<u16>;
    /// Bytes transferred for the current document, summed over the
    /// page's performance entries.
    async fn bytes_received(&mut self) -> SessionResult<u64>;
    /// Persist an error screenshot for a failed attempt.
    async fn capture_failure(&mut self) -> SessionResult<()>;
}

#[derive(Debug, Clone)]
pub struct NavigationReport {
    pub url: String,
    pub status: u16,
    pub bytes_received: u64,
    pub attempts: usize,
}

/// Drives navigation attempts through the ordered rule table: a
/// matching rule schedules a bounded retry after its sleep window, an
/// unmatched failure is surfaced as-is.
pub struct NavigationController {
    rules: ErrorRuleBook,
    max_attempts: usize,
    metrics: Arc<Mutex<SessionMetrics>>,
}

impl NavigationController {
    pub fn new(
        rules: ErrorRuleBook,
        retry: &RetrySection,
        metrics: Arc<Mutex<SessionMetrics>>,
    ) -> Self {
        Self {
            rules,
            max_attempts: retry.max_navigation_attempts.max(1),
            metrics,
        }
    }

    pub async fn navigate<S>(&self, session: &mut S, url: &str) -> SessionResult<NavigationReport>
    where
        S: NavigationSession + ?Sized,
    {
        {
            let mut guard = self.metrics.lock().unwrap();
            guard.record_navigation();
        }
        let mut attempt = 0usize;
        loop {
            let failure = match session.open(url).await {
                Ok(200) => {
                    let bytes_received = match session.bytes_received().await {
                        Ok(bytes) => bytes,
                        Err(err) => {
                            warn!(url, error = %err, "byte accounting failed, reporting 0");
                            0
                        }
                    };
                    info!(
                        url,
                        attempt = attempt + 1,
                        received = %format_bytes(bytes_received),
                        "navigation complete"
                    );
                    return Ok(NavigationReport {
                        url: url.to_string(),
                        status: 200,
                        bytes_received,
                        attempts: attempt + 1,
                    });
                }
                // A non-200 document is handled exactly like a thrown
                // failure so status-specific rules can reschedule it.
                Ok(status) => SessionError::BadStatus { status },
                Err(error) => error,
            };

            self.capture_attempt_failure(session, url).await;

            match self.rules.classify(&failure) {
                Some(rule) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        let mut guard = self.metrics.lock().unwrap();
                        guard.record_navigation_fatal();
                        warn!(url, attempts = attempt, error = %failure, "retry budget exhausted");
                        return Err(SessionError::RetriesExhausted {
                            url: url.to_string(),
                            attempts: attempt,
                        });
                    }
                    {
                        let mut guard = self.metrics.lock().unwrap();
                        guard.record_navigation_retry();
                    }
                    warn!(
                        url,
                        attempt,
                        pattern = %rule.pattern,
                        sleep_seconds = rule.sleep.as_secs(),
                        error = %failure,
                        "recoverable navigation failure"
                    );
                    sleep(rule.sleep).await;
                }
                None => {
                    let mut guard = self.metrics.lock().unwrap();
                    guard.record_navigation_fatal();
                    warn!(url, error = %failure, "unclassified navigation failure");
                    return Err(failure);
                }
            }
        }
    }

    async fn capture_attempt_failure<S>(&self, session: &mut S, url: &str)
    where
        S: NavigationSession + ?Sized,
    {
        match session.capture_failure().await {
            Ok(()) => {
                let mut guard = self.metrics.lock().unwrap();
                guard.record_diagnostic();
            }
            // Capture problems must never displace the failure that
            // triggered them.
            Err(err) => warn!(url, error = %err, "failed to capture error diagnostic"),
        }
    }
}

/// Human-readable rendering of a byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["kB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} bytes");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for candidate in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = candidate;
    }
    format!("{value:.1} {unit}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_rendering() {
        assert_eq!(format_bytes(0), "0 bytes");
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.0 kB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
