//! Broker HTTP error classification.

use thiserror::Error;

use crate::error::EngineError;

/// Broker HTTP adapter errors, classified by how the caller should react.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The HTTP request itself failed (connect/timeout/DNS) before a
    /// response was received.
    #[error("broker request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The broker responded with a status code that clears on its own:
    /// 429 (rate limited), 408, or 5xx.
    #[error("broker transient error (status {status}): {message}")]
    Transient {
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },

    /// The broker responded with a status code that will not clear by
    /// retrying: 4xx other than 408/429.
    #[error("broker permanent error (status {status}): {message}")]
    Permanent {
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },

    /// The response body did not parse as the expected JSON shape.
    #[error("broker response parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Retries were exhausted without success.
    #[error("broker retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
    },
}

impl BrokerError {
    /// Classifies an HTTP status code into a transient-vs-permanent
    /// [`BrokerError`], mirroring the broker status-code union named as
    /// authoritative for reconciliation purposes.
    #[must_use]
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        if matches!(status, 429 | 408 | 500 | 502 | 503 | 504) {
            Self::Transient { status, message }
        } else {
            Self::Permanent { status, message }
        }
    }

    /// True if this error should be retried with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Request(_))
    }
}

impl From<BrokerError> for EngineError {
    fn from(error: BrokerError) -> Self {
        match &error {
            BrokerError::Transient { .. } | BrokerError::Request(_) => {
                Self::transient_upstream(error)
            }
            BrokerError::RetriesExhausted { .. } => Self::transient_upstream(error),
            BrokerError::Permanent { .. } | BrokerError::Parse(_) => {
                Self::permanent_upstream(error)
            }
        }
    }
}
