//! Transport abstraction.
//!
//! The mediator talks to the broker through [`Transport`]: publish, request
//! with a deadline, and subscribe. A subscription yields [`Delivery`] values
//! that the mediator completes by replying, acknowledging or negatively
//! acknowledging them.
//!
//! [`MemoryTransport`] implements the same semantics in process for tests
//! and single-binary deployments.

mod memory;

pub use memory::{MemoryDelivery, MemoryTransport, TransportStats};

use std::{future::Future, time::Duration};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by a transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport is not connected.
    #[error("transport is not connected")]
    NotConnected,

    /// Nobody is subscribed to the subject of a request.
    #[error("no responders for subject {0}")]
    NoResponders(String),

    /// A request got no reply before its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The delivery cannot be answered.
    #[error("delivery on {0} has no reply subject")]
    NoReplySubject(String),

    /// The delivery is not part of a durable stream.
    #[error("delivery on {0} cannot be acknowledged")]
    NotAckable(String),

    /// The subscription is closed.
    #[error("subscription {0} is closed")]
    Closed(u64),

    /// A backend specific failure.
    #[error(transparent)]
    Backend(#[from] courier_core::BoxError),
}

/// Durable consumer settings of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    /// Name of the stream.
    pub stream: String,
    /// Durable consumer name; deliveries resume where it stopped.
    pub durable: String,
}

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeSpec {
    /// Subject pattern.
    pub subject: String,
    /// Queue group; each delivery goes to one member of the group.
    pub queue: Option<String>,
    /// Durable stream consumer, with manual acknowledgement.
    pub stream: Option<StreamSpec>,
}

impl SubscribeSpec {
    /// A plain subscription to `subject`.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            queue: None,
            stream: None,
        }
    }

    /// Join queue group `queue`.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Consume durably from `stream` under the consumer name `durable`.
    pub fn stream(mut self, stream: impl Into<String>, durable: impl Into<String>) -> Self {
        self.stream = Some(StreamSpec {
            stream: stream.into(),
            durable: durable.into(),
        });
        self
    }
}

/// Identifier of a transport subscription.
pub type SubscriptionKey = u64;

/// A stream of deliveries for one subscription.
pub struct Subscription<D> {
    key: SubscriptionKey,
    receiver: mpsc::UnboundedReceiver<D>,
}

impl<D> Subscription<D> {
    /// Wrap the receiving half of a delivery channel.
    pub fn new(key: SubscriptionKey, receiver: mpsc::UnboundedReceiver<D>) -> Self {
        Self { key, receiver }
    }

    /// Identifier to pass to [`Transport::unsubscribe`].
    pub fn key(&self) -> SubscriptionKey {
        self.key
    }

    /// The next delivery, `None` once the subscription is closed.
    pub async fn next(&mut self) -> Option<D> {
        self.receiver.recv().await
    }
}

/// One inbound message.
pub trait Delivery: Send + Sync + 'static {
    /// Concrete subject the message was published on.
    fn subject(&self) -> &str;

    /// Raw bytes of the message.
    fn payload(&self) -> &[u8];

    /// Answer a request.
    fn respond(&self, payload: Vec<u8>) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Acknowledge a durable delivery.
    fn ack(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Ask for redelivery of a durable delivery after `delay`.
    fn nak(&self, delay: Duration) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// A pub/sub broker connection.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a message transport",
    label = "missing `Transport` implementation",
    note = "Implement `Transport` or use `MemoryTransport`."
)]
pub trait Transport: Send + Sync + 'static {
    /// Delivery type produced by subscriptions.
    type Delivery: Delivery;

    /// Open the connection.
    fn connect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Drain subscriptions and close the connection.
    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Whether the connection is open.
    fn is_connected(&self) -> bool;

    /// Send `payload` to every subscriber of `subject`.
    fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Send `payload` and wait up to `timeout` for the first reply.
    fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Start receiving deliveries.
    fn subscribe(
        &self,
        spec: SubscribeSpec,
    ) -> impl Future<Output = Result<Subscription<Self::Delivery>, TransportError>> + Send;

    /// Stop a subscription; its stream ends.
    fn unsubscribe(
        &self,
        key: SubscriptionKey,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
