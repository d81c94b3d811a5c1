use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by [`SpotifyClient`](crate::spotify::SpotifyClient).
///
/// Zero search results are not an error: they come back as
/// [`Lookup::NotFound`](crate::spotify::data::Lookup::NotFound).
///
/// The type is `Clone` because one token refresh outcome is handed to every
/// caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum CatalogError {
    #[error("invalid catalog id `{id}`: {message}")]
    InvalidId { id: String, message: String },

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("transport error: {0}")]
    Transport(#[source] Arc<reqwest::Error>),

    #[error("rate limited by catalog API (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("catalog API returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("failed to decode catalog response: {0}")]
    Decode(String),

    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl CatalogError {
    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited { .. })
            || matches!(self, Self::Upstream { status, .. } if *status >= 500)
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(Arc::new(err))
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to serialize stored value: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to write default configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("configuration file not found. A default '{0}' has been created. Please update it with your credentials.")]
    Missing(String),
}
