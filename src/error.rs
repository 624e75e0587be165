//! Typed errors for the request path. The streaming core uses `anyhow`.

use thiserror::Error;

/// A subscription request that cannot become a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid {field} '{value}', allowed are: {allowed}")]
    InvalidValue {
        field: &'static str,
        value: String,
        allowed: String,
    },

    #[error("invalid contract address '{0}': expected a 0x-prefixed 20-byte hex string")]
    InvalidAddress(String),
}

impl ValidationError {
    pub fn invalid_value(field: &'static str, value: &str, allowed: &[&str]) -> Self {
        ValidationError::InvalidValue {
            field,
            value: value.to_string(),
            allowed: allowed.join(", "),
        }
    }
}

/// Failure of a subscribe/unsubscribe attempt.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to resolve contract interface from {url}: {cause:#}")]
    AbiResolution { url: String, cause: anyhow::Error },

    #[error("event '{0}' is not declared in the contract interface")]
    UnknownEvent(String),

    #[error("repository error: {0:#}")]
    Repository(anyhow::Error),
}
