use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub pages_opened: u64,
    pub navigations: u64,
    pub navigation_retries: u64,
    pub navigations_fatal: u64,
    pub browser_scrapes: u64,
    pub http_scrapes: u64,
    pub scrape_retries: u64,
    pub diagnostics_captured: u64,
    pub cookies_saved: u64,
    pub cookies_restored: u64,
}

impl SessionMetrics {
    pub fn record_page_open(&mut self) {
        self.pages_opened = self.pages_opened.saturating_add(1);
    }

    pub fn record_navigation(&mut self) {
        self.navigations = self.navigations.saturating_add(1);
    }

    pub fn record_navigation_retry(&mut self) {
        self.navigation_retries = self.navigation_retries.saturating_add(1);
    }

    pub fn record_navigation_fatal(&mut self) {
        self.navigations_fatal = self.navigations_fatal.saturating_add(1);
    }

    pub fn record_browser_scrape(&mut self) {
        self.browser_scrapes = self.browser_scrapes.saturating_add(1);
    }

    pub fn record_http_scrape(&mut self) {
        self.http_scrapes = self.http_scrapes.saturating_add(1);
    }

    pub fn record_scrape_retry(&mut self) {
        self.scrape_retries = self.scrape_retries.saturating_add(1);
    }

    pub fn record_diagnostic(&mut self) {
        self.diagnostics_captured = self.diagnostics_captured.saturating_add(1);
    }

    pub fn record_cookies_saved(&mut self) {
        self.cookies_saved = self.cookies_saved.saturating_add(1);
    }

    pub fn record_cookies_restored(&mut self) {
        self.cookies_restored = self.cookies_restored.saturating_add(1);
    }

    pub fn navigation_success_rate(&self) -> f64 {
        if self.navigations == 0 {
            0.0
        } else {
            let failed = self.navigations_fatal as f64;
            ((self.navigations as f64 - failed) / self.navigations as f64) * 100.0
        }
    }
}
