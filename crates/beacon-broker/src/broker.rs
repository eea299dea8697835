//! The broker transport trait.

use crate::error::Result;
use crate::types::{Delivery, ExchangeKind, OutboundMessage, QueueOptions};

/// A connection to an AMQP-style message broker.
///
/// One value corresponds to one connection with one channel. Declarations
/// are idempotent so a component can re-run its topology setup after a
/// reconnect.
#[allow(async_fn_in_trait)]
pub trait Broker {
    /// Opens the connection (and its channel).
    async fn connect(&mut self) -> Result<()>;

    /// Declares an exchange.
    async fn exchange_declare(&mut self, name: &str, kind: ExchangeKind, durable: bool) -> Result<()>;

    /// Declares a queue.
    async fn queue_declare(&mut self, name: &str, options: QueueOptions) -> Result<()>;

    /// Binds a queue to an exchange with a routing key pattern.
    async fn queue_bind(&mut self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Bounds the number of unacknowledged deliveries handed to this connection.
    async fn basic_qos(&mut self, prefetch_count: u16) -> Result<()>;

    /// Switches the channel into publisher-confirm mode.
    async fn confirm_delivery(&mut self) -> Result<()>;

    /// Waits for the next message on a queue.
    ///
    /// Returns `None` once the broker will not deliver anything else from
    /// the queue.
    async fn next_delivery(&mut self, queue: &str) -> Result<Option<Delivery>>;

    /// Acknowledges a single delivery.
    async fn ack(&mut self, delivery_tag: u64) -> Result<()>;

    /// Publishes a message.
    ///
    /// In confirm mode this returns only after the broker accepted the
    /// message, and a mandatory message that matched no queue fails with
    /// `BrokerError::Unroutable`.
    async fn publish(&mut self, message: &OutboundMessage) -> Result<()>;

    /// Deletes a queue.
    async fn queue_delete(&mut self, name: &str, if_unused: bool, if_empty: bool) -> Result<()>;

    /// Closes the connection.
    async fn disconnect(&mut self) -> Result<()>;
}
