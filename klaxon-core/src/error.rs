use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("circuit breaker open: {0}")]
    CircuitOpen(String),

    #[error("data corruption: {0}")]
    DataCorruption(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("queue full: {0}")]
    QueueFull(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "database")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "database")]
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http status {status} from {url}")]
    HttpStatus {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("model error: {0}")]
    Model(#[from] klaxon_model::ModelError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AlertError {
    /// Whether a retry has any chance of succeeding.
    ///
    /// The split mirrors the dispatch policy: network resets, timeouts, 429
    /// and 5xx responses retry; everything structurally wrong dead-letters.
    pub fn is_transient(&self) -> bool {
        match self {
            AlertError::Transient(_) | AlertError::QueueFull(_) => true,
            AlertError::CircuitOpen(_) => true,
            #[cfg(feature = "database")]
            AlertError::Database(_) | AlertError::Cache(_) => true,
            AlertError::Http(err) => {
                err.is_timeout() || err.is_connect() || err.is_request()
            }
            AlertError::HttpStatus { status, .. } => {
                status.as_u16() == 429 || status.is_server_error()
            }
            AlertError::Internal(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("timeout")
                    || lower.contains("timed out")
                    || lower.contains("temporar")
                    || lower.contains("connection")
                    || lower.contains("unavailable")
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AlertError::Cancelled(_))
    }

    /// Classify an HTTP response status into the retryable/terminal split.
    pub fn from_status(status: reqwest::StatusCode, url: impl Into<String>) -> Self {
        let url = url.into();
        if status.as_u16() == 429 || status.is_server_error() {
            AlertError::Transient(format!("HTTP {status} ({url})"))
        } else {
            AlertError::HttpStatus { status, url }
        }
    }
}

pub type Result<T> = std::result::Result<T, AlertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_follows_retry_policy() {
        assert!(AlertError::Transient("reset".into()).is_transient());
        assert!(AlertError::Internal("connection refused".into()).is_transient());
        assert!(!AlertError::Validation("bad".into()).is_transient());
        assert!(!AlertError::Permanent("unsupported sink".into()).is_transient());
    }

    #[test]
    fn status_classification_splits_on_retryability() {
        let transient =
            AlertError::from_status(reqwest::StatusCode::SERVICE_UNAVAILABLE, "http://x");
        assert!(transient.is_transient());
        let terminal =
            AlertError::from_status(reqwest::StatusCode::NOT_FOUND, "http://x");
        assert!(!terminal.is_transient());
        let throttled =
            AlertError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "http://x");
        assert!(throttled.is_transient());
    }
}
