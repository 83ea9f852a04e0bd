use thiserror::Error;

/// Main error type for the orderflow provider
///
/// Maps the failure modes of upstream I/O and the indicator engines onto a
/// small set of dispositions: retryable transport faults, rate limiting,
/// parse/schema failures (skip the event), sequence gaps (resync the book),
/// integrity violations (reject the update), and fail-fast states.
#[derive(Error, Debug)]
pub enum OrderflowError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Sequence gap: {0}")]
    SequenceGap(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrderflowError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrderflowError::Connection(_) | OrderflowError::RateLimited(_)
        )
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            OrderflowError::Connection(_) => "connection_error",
            OrderflowError::RateLimited(_) => "rate_limit",
            OrderflowError::Parse(_) => "parse_error",
            OrderflowError::SequenceGap(_) => "sequence_gap",
            OrderflowError::Integrity(_) => "integrity_error",
            OrderflowError::InvalidRequest(_) => "invalid_request",
            OrderflowError::NotReady(_) => "not_ready",
            OrderflowError::Storage(_) => "storage_error",
            OrderflowError::Config(_) => "config_error",
            OrderflowError::Internal(_) => "internal_error",
        }
    }
}

impl From<reqwest::Error> for OrderflowError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OrderflowError::Connection("Request timeout talking to Binance API".to_string())
        } else if err.is_connect() {
            OrderflowError::Connection("Failed to connect to Binance API".to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                429 => OrderflowError::RateLimited(
                    "Too many requests to Binance API. Retry after 60 seconds.".to_string(),
                ),
                418 => OrderflowError::Connection(
                    "IP address banned by Binance. Back off before retrying.".to_string(),
                ),
                403 => OrderflowError::Connection(
                    "WAF limit violated. Reduce request frequency.".to_string(),
                ),
                500..=599 => OrderflowError::Connection(format!(
                    "Binance server error (HTTP {})",
                    status.as_u16()
                )),
                _ => OrderflowError::Internal(format!("HTTP error: {}", status)),
            }
        } else {
            OrderflowError::Internal(err.to_string())
        }
    }
}

impl From<serde_json::Error> for OrderflowError {
    fn from(err: serde_json::Error) -> Self {
        OrderflowError::Parse(format!("JSON parsing failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, OrderflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(OrderflowError::Connection("reset".into()).is_retryable());
        assert!(OrderflowError::RateLimited("429".into()).is_retryable());
        assert!(!OrderflowError::Parse("bad json".into()).is_retryable());
        assert!(!OrderflowError::SequenceGap("pu mismatch".into()).is_retryable());
    }

    #[test]
    fn test_error_type_labels() {
        assert_eq!(
            OrderflowError::NotReady("book unsynced".into()).error_type(),
            "not_ready"
        );
        assert_eq!(
            OrderflowError::Integrity("negative volume".into()).error_type(),
            "integrity_error"
        );
    }
}
