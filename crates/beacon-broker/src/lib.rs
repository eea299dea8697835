//! Message broker transport for Beacon components.
//!
//! `beacon-broker` defines the [`Broker`] trait that Beacon's alerters use to
//! consume observations and publish alerts, plus an AMQP-flavoured
//! [`InMemoryBroker`] that runs the same topology in-process.
//!
//! # Example
//!
//! ```rust
//! use beacon_broker::{Broker, ExchangeKind, InMemoryBroker, OutboundMessage, QueueOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), beacon_broker::BrokerError> {
//! let broker = InMemoryBroker::new();
//! let mut client = broker.client();
//! client.connect().await?;
//! client.exchange_declare("alert", ExchangeKind::Topic, true).await?;
//! client.queue_declare("system_alerter_queue_p1", QueueOptions::default()).await?;
//! client.queue_bind("system_alerter_queue_p1", "alert", "alerter.system.p1").await?;
//!
//! let message = OutboundMessage::new("alert", "alerter.system.p1", b"{}".to_vec());
//! client.publish(&message).await?;
//!
//! let delivery = client
//!     .next_delivery("system_alerter_queue_p1")
//!     .await?
//!     .expect("message was routed to the queue");
//! client.ack(delivery.delivery_tag).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod broker;
pub mod error;
pub mod memory;
pub mod types;

pub use broker::Broker;
pub use error::{BrokerError, Result};
pub use memory::{FaultPoint, InMemoryBroker, InMemoryClient};
pub use types::{routing_key_matches, Delivery, ExchangeKind, OutboundMessage, QueueOptions};
