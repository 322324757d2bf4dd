use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no active page in session")]
    NoActivePage,
    #[error("page responded with status {status}")]
    BadStatus { status: u16 },
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("gave up on {url} after {attempts} attempts")]
    RetriesExhausted { url: String, attempts: usize },
    #[error("script evaluation failed: {0}")]
    Evaluate(String),
    #[error("interaction with {selector} failed: {message}")]
    Interaction { selector: String, message: String },
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid selector: {0}")]
    Selector(String),
    #[error("cookie file is not valid JSON: {0}")]
    CookieFormat(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<tokio::task::JoinError> for SessionError {
    fn from(err: tokio::task::JoinError) -> Self {
        SessionError::Unexpected(err.to_string())
    }
}
