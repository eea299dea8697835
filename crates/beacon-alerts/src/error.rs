//! Error types for the beacon-alerts crate.

use beacon_broker::BrokerError;
use thiserror::Error;

/// Errors raised while classifying observations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlerterError {
    /// The message is neither a well-formed result nor a well-formed error.
    #[error("received unexpected data: {reason}")]
    UnrecognizedObservation {
        /// What was wrong with the message.
        reason: String,
    },

    /// An error observation carried a code no handler knows about.
    #[error("unrecognized error code: {code}")]
    UnrecognizedErrorCode {
        /// The offending code.
        code: i64,
    },

    /// Alerter configuration is unusable.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// An alert could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl AlerterError {
    /// Creates an [`AlerterError::UnrecognizedObservation`].
    pub fn unrecognized(reason: impl Into<String>) -> Self {
        Self::UnrecognizedObservation {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for AlerterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for classification operations.
pub type Result<T> = std::result::Result<T, AlerterError>;

/// Errors that stop the alert pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The broker failed.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// An alert was rejected by the broker and stays queued.
    #[error("alert was not delivered: {0}")]
    DeliveryFailed(BrokerError),

    /// An alert could not be encoded for publishing.
    #[error("failed to encode alert: {0}")]
    Encoding(#[from] AlerterError),
}

impl PipelineError {
    /// Returns true for channel-level broker errors.
    #[must_use]
    pub const fn is_channel_error(&self) -> bool {
        matches!(self, Self::Broker(err) if err.is_channel_error())
    }

    /// Returns true for connection-level broker errors.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Broker(err) if err.is_connection_error())
    }
}
