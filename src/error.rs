// =============================================================================
// error.rs - THINGS THAT GO WRONG, BY NAME
// =============================================================================

use std::path::PathBuf;

use thiserror::Error;

/// Failures while talking to EDGAR or writing to the filing cache.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("EDGAR returned HTTP {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Failed to parse filing listing: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Filing cache I/O error at {path}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Whether another attempt might succeed. Network hiccups, bad statuses
    /// and garbled listings are worth retrying; a broken cache directory or
    /// a malformed base URL is not going to fix itself in two seconds.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Http(_) | FetchError::Status { .. } | FetchError::Parse(_)
        )
    }
}

/// Failures at the storage boundary. Always caught per record.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Storage rejected record: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let status = FetchError::Status {
            status: reqwest::StatusCode::TOO_MANY_REQUESTS,
            url: "https://data.sec.gov".to_string(),
        };
        assert!(status.is_transient());

        let parse = FetchError::Parse(serde_json::from_str::<u32>("nope").unwrap_err());
        assert!(parse.is_transient());

        let cache = FetchError::Cache {
            path: PathBuf::from("/nowhere"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!cache.is_transient());
    }
}
