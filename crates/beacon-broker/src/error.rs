//! Error types for the beacon-broker crate.

use thiserror::Error;

/// Errors raised by a broker connection.
///
/// The variants mirror how an AMQP client reports failures: channel-level
/// errors leave the connection usable (a fresh channel is opened behind the
/// scenes), connection-level errors require reconnecting and re-declaring
/// topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// An operation was attempted before `connect` succeeded.
    #[error("connection not initialized")]
    NotConnected,

    /// The channel was closed by the broker.
    #[error("channel error: {reason}")]
    Channel {
        /// Why the channel was closed.
        reason: String,
    },

    /// The connection to the broker was lost.
    #[error("connection error: {reason}")]
    Connection {
        /// Why the connection was lost.
        reason: String,
    },

    /// A mandatory message matched no queue and was returned by the broker.
    #[error("message was not delivered: exchange '{exchange}' has no route for '{routing_key}'")]
    Unroutable {
        /// Exchange the message was published to.
        exchange: String,
        /// Routing key of the message.
        routing_key: String,
    },

    /// A message body could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BrokerError {
    /// Creates a channel error.
    pub fn channel(reason: impl Into<String>) -> Self {
        Self::Channel {
            reason: reason.into(),
        }
    }

    /// Creates a connection error.
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    /// Returns true for errors recovered by opening a new channel.
    #[must_use]
    pub const fn is_channel_error(&self) -> bool {
        matches!(self, Self::Channel { .. })
    }

    /// Returns true for errors that require a new connection.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Returns true when a published message was not confirmed.
    #[must_use]
    pub const fn is_delivery_failure(&self) -> bool {
        matches!(self, Self::Unroutable { .. })
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
