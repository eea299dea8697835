//! Bounded buffer of alerts waiting to be published.

use std::collections::VecDeque;

use beacon_broker::OutboundMessage;

use crate::error::Result;
use crate::types::Alert;

/// An alert together with where it is to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedAlert {
    /// Target exchange.
    pub exchange: String,
    /// Routing key.
    pub routing_key: String,
    /// The alert.
    pub alert: Alert,
}

impl QueuedAlert {
    /// Creates an envelope.
    #[must_use]
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>, alert: Alert) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            alert,
        }
    }

    /// Encodes the envelope as a mandatory, persistent broker message.
    ///
    /// # Errors
    ///
    /// Returns `AlerterError::Serialization` if the alert cannot be encoded.
    pub fn to_message(&self) -> Result<OutboundMessage> {
        let body = serde_json::to_vec(&self.alert)?;
        Ok(OutboundMessage::new(
            self.exchange.clone(),
            self.routing_key.clone(),
            body,
        ))
    }
}

/// Fixed-capacity FIFO of pending alerts.
///
/// When full, pushing evicts the oldest entry so the newest alerts survive.
#[derive(Debug, Clone)]
pub struct PublishQueue {
    entries: VecDeque<QueuedAlert>,
    capacity: usize,
}

impl PublishQueue {
    /// Creates an empty queue. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Appends an entry, returning the entry evicted to make room, if any.
    pub fn push(&mut self, entry: QueuedAlert) -> Option<QueuedAlert> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Returns the oldest entry.
    #[must_use]
    pub fn front(&self) -> Option<&QueuedAlert> {
        self.entries.front()
    }

    /// Removes and returns the oldest entry.
    pub fn pop_front(&mut self) -> Option<QueuedAlert> {
        self.entries.pop_front()
    }

    /// Returns the number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the maximum number of pending entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates over pending entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedAlert> {
        self.entries.iter()
    }
}
