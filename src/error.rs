use thiserror::Error;

/// Failure surfaced by a source adapter.
///
/// `Transient` covers timeouts, rate limits and upstream 5xx responses and is
/// retried with backoff. `Fatal` is not retried. Either way the entity being
/// scraped gets a failed attempt, never the whole run.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transient source failure: {0}")]
    Transient(String),
    #[error("source failure: {0}")]
    Fatal(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        let retryable = e.is_timeout()
            || e.is_connect()
            || e
                .status()
                .map(|s| s.as_u16() == 429 || s.is_server_error())
                .unwrap_or(false);
        if retryable {
            SourceError::Transient(e.to_string())
        } else {
            SourceError::Fatal(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode or decode stored column: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("invalid stored value in {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("classifier returned status {0}")]
    Status(u16),
}
