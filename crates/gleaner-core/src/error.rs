use std::time::Duration;

use thiserror::Error;

/// Application-wide error types for Gleaner.
#[derive(Error, Debug)]
pub enum AppError {
    /// Connection-level failure (DNS, refused, reset, TLS).
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP 429 from the target site.
    #[error("Rate limited (HTTP 429)")]
    RateLimited,

    /// HTTP 401/403: the current credential was refused.
    #[error("Blocked by target (HTTP {status})")]
    Blocked { status: u16 },

    /// Any other non-2xx response.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// The retry budget was consumed without a successful response.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<AppError> },

    /// A page contained zero parseable items. Pagination treats this as the end.
    #[error("No items found on page")]
    ExtractionEmpty,

    /// Malformed markup or payload for a single item or document.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid configuration (empty user-agent list, bad proxy URI, bad recipe).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Writing or reading an output file failed.
    #[error("Sink error: {0}")]
    Sink(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled before this operation started or finished.
    #[error("Cancelled")]
    Cancelled,

    /// A per-target task panicked or was aborted.
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl AppError {
    /// Returns true if another attempt at the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Network(_)
            | AppError::Timeout(_)
            | AppError::RateLimited
            | AppError::Blocked { .. } => true,
            AppError::HttpStatus { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }

    /// Returns the HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::RateLimited => Some(429),
            AppError::Blocked { status } | AppError::HttpStatus { status, .. } => Some(*status),
            AppError::RetryExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Returns true for errors that end a pagination loop without being a
    /// failure of the target: no more items, or the run was cancelled.
    pub fn is_terminal_for_pagination(&self) -> bool {
        matches!(self, AppError::ExtractionEmpty | AppError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::Network("reset".into()).is_retryable());
        assert!(AppError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(AppError::RateLimited.is_retryable());
        assert!(AppError::Blocked { status: 403 }.is_retryable());
        assert!(
            AppError::HttpStatus {
                status: 503,
                url: "https://example.com".into()
            }
            .is_retryable()
        );
        assert!(
            !AppError::HttpStatus {
                status: 404,
                url: "https://example.com".into()
            }
            .is_retryable()
        );
        assert!(!AppError::Parse("bad html".into()).is_retryable());
        assert!(!AppError::ExtractionEmpty.is_retryable());
    }

    #[test]
    fn test_pagination_terminal_errors() {
        assert!(AppError::ExtractionEmpty.is_terminal_for_pagination());
        assert!(AppError::Cancelled.is_terminal_for_pagination());
        assert!(!AppError::Parse("x".into()).is_terminal_for_pagination());
    }

    #[test]
    fn test_status_reaches_through_exhaustion() {
        let err = AppError::RetryExhausted {
            attempts: 4,
            last: Box::new(AppError::Blocked { status: 403 }),
        };
        assert_eq!(err.status(), Some(403));
        assert!(err.to_string().contains("4 attempts"));
        assert_eq!(AppError::Network("x".into()).status(), None);
    }
}
