use thiserror::Error;

/// Outcome of a governed fetch that did not produce JSON.
///
/// Cloneable because every caller coalesced onto one in-flight request
/// receives the same result.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },
    #[error("HTTP {status} {url}\n{snippet}")]
    Http {
        status: u16,
        url: String,
        snippet: String,
    },
    #[error("429 after {retries} retries ({url})")]
    RateLimited { url: String, retries: u32 },
    #[error("empty body from {url}")]
    EmptyBody { url: String },
    #[error("non-JSON response from {url}\n{snippet}")]
    NonJson { url: String, snippet: String },
    #[error("unexpected payload shape: {0}")]
    Decode(String),
    #[error("fetch task failed: {0}")]
    Task(String),
}

impl FetchError {
    /// Rate limiting, empty bodies, non-JSON bodies and transport failures
    /// are worth retrying; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. }
                | FetchError::EmptyBody { .. }
                | FetchError::NonJson { .. }
                | FetchError::Network { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("poller task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("update receiver dropped while the loop was running")]
    UpdateChannelClosed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration directory on this platform")]
    NoConfigDir,
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config json error: {0}")]
    Json(#[from] serde_json::Error),
}
