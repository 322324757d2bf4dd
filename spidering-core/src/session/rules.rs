use std::time::Duration;

use crate::config::ErrorRuleEntry;

use super::error::SessionError;

/// A single recoverable-failure rule: any failure whose rendered
/// message contains `pattern` is retried after `sleep` elapses.
#[derive(Debug, Clone)]
pub struct ErrorRule {
    pub pattern: String,
    pub sleep: Duration,
}

/// Ordered rule table. Earlier rules win; a failure matching no rule
/// is fatal and ends the retry loop.
#[derive(Debug, Clone, Default)]
pub struct ErrorRuleBook {
    rules: Vec<ErrorRule>,
}

impl ErrorRuleBook {
    pub fn new(rules: Vec<ErrorRule>) -> Self {
        Self { rules }
    }

    pub fn from_entries(entries: &[ErrorRuleEntry]) -> Self {
        let rules = entries
            .iter()
            .map(|entry| ErrorRule {
                pattern: entry.pattern.clone(),
                sleep: Duration::from_secs(entry.sleep_seconds),
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn classify(&self, error: &SessionError) -> Option<&ErrorRule> {
        self.classify_message(&error.to_string())
    }

    pub fn classify_message(&self, message: &str) -> Option<&ErrorRule> {
        self.rules
            .iter()
            .find(|rule| message.contains(&rule.pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> ErrorRuleBook {
        ErrorRuleBook::new(vec![
            ErrorRule {
                pattern: "Navigation timeout".into(),
                sleep: Duration::from_secs(60),
            },
            ErrorRule {
                pattern: "timeout".into(),
                sleep: Duration::from_secs(10),
            },
            ErrorRule {
                pattern: "status 503".into(),
                sleep: Duration::from_secs(300),
            },
        ])
    }

    #[test]
    fn from_entries_converts_config_sleep_seconds() {
        let book = ErrorRuleBook::from_entries(&[ErrorRuleEntry {
            pattern: "status 503".into(),
            sleep_seconds: 300,
        }]);
        let rule = book
            .classify_message("page responded with status 503")
            .expect("should match");
        assert_eq!(rule.sleep, Duration::from_secs(300));
    }

    #[test]
    fn first_matching_rule_wins() {
        let book = book();
        let rule = book
            .classify_message("Navigation timeout of 30000 ms exceeded")
            .expect("should match");
        assert_eq!(rule.sleep, Duration::from_secs(60));
    }

    #[test]
    fn later_rule_matches_when_earlier_does_not() {
        let book = book();
        let rule = book
            .classify_message("cdp request timeout")
            .expect("should match");
        assert_eq!(rule.sleep, Duration::from_secs(10));
    }

    #[test]
    fn bad_status_routes_through_rules() {
        let book = book();
        let error = SessionError::BadStatus { status: 503 };
        let rule = book.classify(&error).expect("503 should be retryable");
        assert_eq!(rule.sleep, Duration::from_secs(300));
    }

    #[test]
    fn unmatched_message_is_fatal() {
        let book = book();
        assert!(book.classify_message("net::ERR_CERT_AUTHORITY_INVALID").is_none());
    }
}
