//! Core types exchanged with a broker.

use serde::Serialize;

use crate::error::Result;

/// The routing behaviour of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Routes on exact routing key equality.
    Direct,
    /// Routes on `.`-separated word patterns with `*` and `#` wildcards.
    Topic,
}

impl ExchangeKind {
    /// Returns the kind as the broker names it.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Topic => "topic",
        }
    }
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options used when declaring a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Survive broker restarts.
    pub durable: bool,
    /// Restrict the queue to the declaring connection.
    pub exclusive: bool,
    /// Delete the queue once its last consumer goes away.
    pub auto_delete: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Tag used to acknowledge this delivery.
    pub delivery_tag: u64,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key the message was published with.
    pub routing_key: String,
    /// Raw message body.
    pub body: Vec<u8>,
    /// True when the message was delivered before and never acknowledged.
    pub redelivered: bool,
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Target exchange.
    pub exchange: String,
    /// Routing key.
    pub routing_key: String,
    /// Raw message body.
    pub body: Vec<u8>,
    /// Return the message as undeliverable if it matches no queue.
    pub mandatory: bool,
    /// Ask the broker to persist the message.
    pub persistent: bool,
}

impl OutboundMessage {
    /// Creates a persistent, mandatory message with a raw body.
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            body,
            mandatory: true,
            persistent: true,
        }
    }

    /// Creates a persistent, mandatory message with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Serialization` if the value cannot be encoded.
    pub fn json<T: Serialize>(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        value: &T,
    ) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(exchange, routing_key, body))
    }

    /// Clears the mandatory flag so unroutable messages are silently dropped.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.mandatory = false;
        self
    }
}

/// Checks whether a routing key matches a binding pattern.
///
/// Direct exchanges compare the key for equality. Topic exchanges split both
/// on `.`: `*` matches exactly one word and `#` matches zero or more words.
#[must_use]
pub fn routing_key_matches(kind: ExchangeKind, pattern: &str, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Direct => pattern == routing_key,
        ExchangeKind::Topic => {
            let pattern: Vec<&str> = pattern.split('.').collect();
            let key: Vec<&str> = routing_key.split('.').collect();
            topic_matches(&pattern, &key)
        }
    }
}

fn topic_matches(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| topic_matches(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&first, key_rest)) => (word == "*" || word == first) && topic_matches(rest, key_rest),
            None => false,
        },
    }
}
