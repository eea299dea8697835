//! An in-process broker with AMQP routing and acknowledgement semantics.
//!
//! [`InMemoryBroker`] holds exchanges, queues and in-flight deliveries.
//! Each [`InMemoryClient`] it hands out behaves like one connection: it must
//! connect before use, its unacknowledged deliveries are requeued when it
//! disconnects (or is dropped), and it can be made to fail on demand through
//! [`InMemoryBroker::fail_next`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::broker::Broker;
use crate::error::{BrokerError, Result};
use crate::types::{
    routing_key_matches, Delivery, ExchangeKind, OutboundMessage, QueueOptions,
};

/// Operations that can be made to fail with [`InMemoryBroker::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// `connect`.
    Connect,
    /// `next_delivery`.
    Receive,
    /// `ack`.
    Ack,
    /// `publish`.
    Publish,
    /// `queue_delete`.
    QueueDelete,
}

#[derive(Debug)]
struct Exchange {
    kind: ExchangeKind,
    durable: bool,
    bindings: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug)]
struct Queue {
    options: QueueOptions,
    messages: VecDeque<StoredMessage>,
    sealed: bool,
}

#[derive(Debug)]
struct InFlight {
    client_id: u64,
    queue: String,
    message: StoredMessage,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    unacked: HashMap<u64, InFlight>,
    faults: HashMap<FaultPoint, VecDeque<BrokerError>>,
    next_tag: u64,
    next_client: u64,
}

impl BrokerState {
    fn requeue_client(&mut self, client_id: u64) -> usize {
        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, in_flight)| in_flight.client_id == client_id)
            .map(|(tag, _)| *tag)
            .collect();
        // Highest tag first so that pushing to the front restores delivery order.
        tags.sort_unstable_by(|a, b| b.cmp(a));

        let mut requeued = 0;
        for tag in tags {
            let Some(in_flight) = self.unacked.remove(&tag) else {
                continue;
            };
            if let Some(queue) = self.queues.get_mut(&in_flight.queue) {
                let mut message = in_flight.message;
                message.redelivered = true;
                queue.messages.push_front(message);
                requeued += 1;
            }
        }
        requeued
    }

    fn in_flight_for(&self, client_id: u64) -> usize {
        self.unacked
            .values()
            .filter(|in_flight| in_flight.client_id == client_id)
            .count()
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// A shared in-memory broker.
///
/// Cloning is cheap; all clones refer to the same exchanges and queues.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new, not yet connected, client connection.
    #[must_use]
    pub fn client(&self) -> InMemoryClient {
        let id = {
            let mut state = self.shared.state.lock();
            state.next_client += 1;
            state.next_client
        };
        InMemoryClient {
            shared: Arc::clone(&self.shared),
            id,
            connected: false,
            confirm: false,
            prefetch: 0,
        }
    }

    /// Makes the next call of the given operation, on any client, fail.
    ///
    /// Faults queue up: calling this twice fails the next two calls.
    pub fn fail_next(&self, point: FaultPoint, error: BrokerError) {
        let mut state = self.shared.state.lock();
        state.faults.entry(point).or_default().push_back(error);
    }

    /// Returns the number of ready (not in-flight) messages in a queue.
    #[must_use]
    pub fn queue_len(&self, name: &str) -> Option<usize> {
        let state = self.shared.state.lock();
        state.queues.get(name).map(|q| q.messages.len())
    }

    /// Returns true if the queue is declared.
    #[must_use]
    pub fn queue_exists(&self, name: &str) -> bool {
        self.shared.state.lock().queues.contains_key(name)
    }

    /// Returns true if the exchange is declared.
    #[must_use]
    pub fn exchange_exists(&self, name: &str) -> bool {
        self.shared.state.lock().exchanges.contains_key(name)
    }

    /// Returns the number of deliveries awaiting acknowledgement.
    #[must_use]
    pub fn unacked_count(&self) -> usize {
        self.shared.state.lock().unacked.len()
    }

    /// Marks a queue as finished: once drained, consumers receive `None`.
    ///
    /// Returns false if the queue does not exist.
    pub fn seal_queue(&self, name: &str) -> bool {
        let sealed = {
            let mut state = self.shared.state.lock();
            match state.queues.get_mut(name) {
                Some(queue) => {
                    queue.sealed = true;
                    true
                }
                None => false,
            }
        };
        if sealed {
            debug!(queue = %name, "sealed queue");
            self.shared.notify.notify_waiters();
        }
        sealed
    }
}

/// One connection to an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryClient {
    shared: Arc<Shared>,
    id: u64,
    connected: bool,
    confirm: bool,
    prefetch: u16,
}

impl InMemoryClient {
    /// Returns true between a successful `connect` and `disconnect`.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }

    /// Pops an injected fault for `point` and applies its side effects.
    fn check_fault(&mut self, point: FaultPoint) -> Result<()> {
        let fault = {
            let mut state = self.shared.state.lock();
            let fault = state.faults.get_mut(&point).and_then(VecDeque::pop_front);
            if let Some(err) = &fault {
                // A closed channel or connection hands its in-flight messages back.
                if err.is_channel_error() || err.is_connection_error() {
                    state.requeue_client(self.id);
                }
            }
            fault
        };

        match fault {
            Some(err) => {
                if err.is_connection_error() {
                    self.connected = false;
                }
                self.shared.notify.notify_waiters();
                Err(err)
            }
            None => Ok(()),
        }
    }
}

impl Broker for InMemoryClient {
    async fn connect(&mut self) -> Result<()> {
        self.check_fault(FaultPoint::Connect)?;
        self.connected = true;
        trace!(client = self.id, "client connected");
        Ok(())
    }

    async fn exchange_declare(&mut self, name: &str, kind: ExchangeKind, durable: bool) -> Result<()> {
        self.ensure_connected()?;
        let mut state = self.shared.state.lock();
        match state.exchanges.get(name) {
            Some(existing) if existing.kind != kind || existing.durable != durable => {
                Err(BrokerError::channel(format!(
                    "PRECONDITION_FAILED - inequivalent arg 'type' for exchange '{name}'"
                )))
            }
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(
                    name.to_string(),
                    Exchange {
                        kind,
                        durable,
                        bindings: Vec::new(),
                    },
                );
                debug!(exchange = %name, kind = %kind, "declared exchange");
                Ok(())
            }
        }
    }

    async fn queue_declare(&mut self, name: &str, options: QueueOptions) -> Result<()> {
        self.ensure_connected()?;
        let mut state = self.shared.state.lock();
        match state.queues.get(name) {
            Some(existing) if existing.options.durable != options.durable => {
                Err(BrokerError::channel(format!(
                    "PRECONDITION_FAILED - inequivalent arg 'durable' for queue '{name}'"
                )))
            }
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    name.to_string(),
                    Queue {
                        options,
                        messages: VecDeque::new(),
                        sealed: false,
                    },
                );
                debug!(queue = %name, "declared queue");
                Ok(())
            }
        }
    }

    async fn queue_bind(&mut self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.ensure_connected()?;
        let mut state = self.shared.state.lock();
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::channel(format!("NOT_FOUND - no queue '{queue}'")));
        }
        let target = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::channel(format!("NOT_FOUND - no exchange '{exchange}'")))?;
        let binding = (queue.to_string(), routing_key.to_string());
        if !target.bindings.contains(&binding) {
            target.bindings.push(binding);
            debug!(queue = %queue, exchange = %exchange, routing_key = %routing_key, "bound queue");
        }
        Ok(())
    }

    async fn basic_qos(&mut self, prefetch_count: u16) -> Result<()> {
        self.ensure_connected()?;
        self.prefetch = prefetch_count;
        Ok(())
    }

    async fn confirm_delivery(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.confirm = true;
        Ok(())
    }

    async fn next_delivery(&mut self, queue: &str) -> Result<Option<Delivery>> {
        self.ensure_connected()?;
        self.check_fault(FaultPoint::Receive)?;

        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut guard = self.shared.state.lock();
                let in_flight = guard.in_flight_for(self.id);
                let state = &mut *guard;
                let ready = state
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| BrokerError::channel(format!("NOT_FOUND - no queue '{queue}'")))?;

                let may_take = self.prefetch == 0 || in_flight < usize::from(self.prefetch);
                if may_take {
                    if let Some(message) = ready.messages.pop_front() {
                        state.next_tag += 1;
                        let delivery_tag = state.next_tag;
                        let delivery = Delivery {
                            delivery_tag,
                            exchange: message.exchange.clone(),
                            routing_key: message.routing_key.clone(),
                            body: message.body.clone(),
                            redelivered: message.redelivered,
                        };
                        state.unacked.insert(
                            delivery_tag,
                            InFlight {
                                client_id: self.id,
                                queue: queue.to_string(),
                                message,
                            },
                        );
                        return Ok(Some(delivery));
                    }
                }

                if ready.sealed && ready.messages.is_empty() {
                    return Ok(None);
                }
            }

            notified.await;
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<()> {
        self.ensure_connected()?;
        self.check_fault(FaultPoint::Ack)?;
        let known = {
            let mut state = self.shared.state.lock();
            let owned = state
                .unacked
                .get(&delivery_tag)
                .is_some_and(|in_flight| in_flight.client_id == self.id);
            if owned {
                state.unacked.remove(&delivery_tag);
            } else {
                // The broker closes the channel on an unknown tag.
                state.requeue_client(self.id);
            }
            owned
        };
        self.shared.notify.notify_waiters();

        if known {
            Ok(())
        } else {
            Err(BrokerError::channel(format!(
                "PRECONDITION_FAILED - unknown delivery tag {delivery_tag}"
            )))
        }
    }

    async fn publish(&mut self, message: &OutboundMessage) -> Result<()> {
        self.ensure_connected()?;
        self.check_fault(FaultPoint::Publish)?;
        {
            let mut state = self.shared.state.lock();
            let exchange = state.exchanges.get(&message.exchange).ok_or_else(|| {
                BrokerError::channel(format!("NOT_FOUND - no exchange '{}'", message.exchange))
            })?;

            let mut targets: Vec<String> = Vec::new();
            for (queue, pattern) in &exchange.bindings {
                if routing_key_matches(exchange.kind, pattern, &message.routing_key)
                    && !targets.contains(queue)
                {
                    targets.push(queue.clone());
                }
            }

            if targets.is_empty() {
                if message.mandatory && self.confirm {
                    return Err(BrokerError::Unroutable {
                        exchange: message.exchange.clone(),
                        routing_key: message.routing_key.clone(),
                    });
                }
                trace!(exchange = %message.exchange, routing_key = %message.routing_key, "dropped unroutable message");
                return Ok(());
            }

            for queue in targets {
                if let Some(queue) = state.queues.get_mut(&queue) {
                    queue.messages.push_back(StoredMessage {
                        exchange: message.exchange.clone(),
                        routing_key: message.routing_key.clone(),
                        body: message.body.clone(),
                        redelivered: false,
                    });
                }
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn queue_delete(&mut self, name: &str, if_unused: bool, if_empty: bool) -> Result<()> {
        self.ensure_connected()?;
        self.check_fault(FaultPoint::QueueDelete)?;
        {
            let mut state = self.shared.state.lock();
            let Some(queue) = state.queues.get(name) else {
                return Ok(());
            };
            if if_empty && !queue.messages.is_empty() {
                return Err(BrokerError::channel(format!(
                    "PRECONDITION_FAILED - queue '{name}' not empty"
                )));
            }
            let in_use = state.unacked.values().any(|f| f.queue == name);
            if if_unused && in_use {
                return Err(BrokerError::channel(format!(
                    "PRECONDITION_FAILED - queue '{name}' in use"
                )));
            }
            state.queues.remove(name);
            for exchange in state.exchanges.values_mut() {
                exchange.bindings.retain(|(queue, _)| queue != name);
            }
        }
        debug!(queue = %name, "deleted queue");
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let requeued = self.shared.state.lock().requeue_client(self.id);
        self.connected = false;
        self.confirm = false;
        self.prefetch = 0;
        self.shared.notify.notify_waiters();
        trace!(client = self.id, requeued, "client disconnected");
        Ok(())
    }
}

impl Drop for InMemoryClient {
    fn drop(&mut self) {
        let requeued = self.shared.state.lock().requeue_client(self.id);
        if requeued > 0 {
            self.shared.notify.notify_waiters();
        }
    }
}
