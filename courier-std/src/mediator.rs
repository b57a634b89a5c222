//! The mediator: routes deliveries to subscribers and completes them.
//!
//! Every delivery goes through the same pipeline:
//!
//! ```text
//! received -> decoded -> materialized -> resolved -> invoked -> completed
//! ```
//!
//! Completion depends on the subscriber:
//!
//! | subscriber      | success          | failure                         |
//! |-----------------|------------------|---------------------------------|
//! | reply           | `{data, error}`  | `{data: null, error}`           |
//! | durable stream  | ack              | report to the sink, nak         |
//! | fire and forget | nothing          | report to the sink              |
//!
//! Each delivery runs in its own task inside a `delivery` span carrying the
//! subject, the service and, when the sender provided them, the trace and
//! span ids of the message context.

use crate::{
    registry::{Registry, SubscriptionId},
    service::{Completion, RegistrationError, Service, Subscriber},
    sink::{FailureSink, TracingSink},
    transport::{Delivery, Subscription, SubscriptionKey, Transport, TransportError},
};
use courier_core::{
    Bindings, Error, ErrorKind, Message, Object, Result, Traceable, inject::panic_message,
};
use futures::{FutureExt, future::join_all};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use thiserror::Error as ThisError;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::Instrument;

/// Environment variable overriding [`MediatorConfig::request_timeout`].
pub const REQUEST_TIMEOUT_VAR: &str = "COURIER_REQUEST_TIMEOUT_MS";
/// Environment variable overriding [`MediatorConfig::nak_delay`].
pub const NAK_DELAY_VAR: &str = "COURIER_NAK_DELAY_MS";

// ============================================================================
// Configuration
// ============================================================================

/// Errors raised while reading configuration.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A duration variable is not a number of milliseconds.
    #[error("{name} must be a number of milliseconds, got `{value}`")]
    InvalidDuration {
        /// Variable name.
        name: &'static str,
        /// Value found.
        value: String,
    },
}

/// Tunables of a [`Mediator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediatorConfig {
    request_timeout: Duration,
    nak_delay: Duration,
    expose_debug: bool,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            nak_delay: Duration::from_secs(5),
            expose_debug: false,
        }
    }
}

impl MediatorConfig {
    /// Defaults overridden by `COURIER_*` environment variables.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by the values `lookup` returns.
    pub fn from_lookup<F>(lookup: F) -> std::result::Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |name: &'static str| -> std::result::Result<Option<Duration>, ConfigError> {
            lookup(name)
                .map(|value| {
                    value
                        .trim()
                        .parse::<u64>()
                        .map(Duration::from_millis)
                        .map_err(|_| ConfigError::InvalidDuration { name, value })
                })
                .transpose()
        };

        let mut config = Self::default();
        if let Some(timeout) = millis(REQUEST_TIMEOUT_VAR)? {
            config.request_timeout = timeout;
        }
        if let Some(delay) = millis(NAK_DELAY_VAR)? {
            config.nak_delay = delay;
        }
        Ok(config)
    }

    /// How long [`Mediator::request`] waits for a reply.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Delay before a failed stream delivery is redelivered.
    pub fn nak_delay(mut self, delay: Duration) -> Self {
        self.nak_delay = delay;
        self
    }

    /// Keep the `debug` context of errors in replies.
    pub fn expose_debug(mut self, expose: bool) -> Self {
        self.expose_debug = expose;
        self
    }

    /// Current request timeout.
    pub fn get_request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Current nak delay.
    pub fn get_nak_delay(&self) -> Duration {
        self.nak_delay
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by the mediator lifecycle.
#[derive(ThisError, Debug)]
pub enum MediatorError {
    /// A service could not be registered.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Subscribing needs a connected transport.
    #[error("attempt to subscribe before the transport is connected")]
    NotConnected,

    /// No service is subscribed under this id.
    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),

    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<MediatorError> for Error {
    fn from(err: MediatorError) -> Self {
        Error::internal_from(&err)
    }
}

// ============================================================================
// Reply envelope
// ============================================================================

/// What a reply subscriber sends back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// Handler output, `null` on failure.
    #[serde(default)]
    pub data: Value,
    /// Serialized error, `null` on success.
    #[serde(default)]
    pub error: Option<Value>,
}

impl ReplyEnvelope {
    /// Envelope of a handler outcome; `debug` is stripped unless `expose_debug`.
    pub fn from_result(outcome: Result<Value>, expose_debug: bool) -> Self {
        match outcome {
            Ok(data) => Self { data, error: None },
            Err(err) => {
                let err = if expose_debug { err } else { err.redacted() };
                Self {
                    data: Value::Null,
                    error: Some(err.to_value()),
                }
            }
        }
    }

    /// The remote outcome, with the remote error returned verbatim.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) if !error.is_null() => Err(Error::from_value(error)),
            _ => Ok(self.data),
        }
    }
}

// ============================================================================
// Mediator
// ============================================================================

struct Active {
    key: SubscriptionKey,
    task: JoinHandle<()>,
}

struct Shared<T> {
    transport: T,
    config: MediatorConfig,
    bindings: Bindings,
    sink: Arc<dyn FailureSink>,
    registry: RwLock<Arc<Registry>>,
}

/// Routes messages between a transport and subscribed services.
pub struct Mediator<T: Transport> {
    shared: Arc<Shared<T>>,
    active: Mutex<HashMap<SubscriptionId, Vec<Active>>>,
    next_id: AtomicU64,
}

/// Builder for [`Mediator`].
pub struct MediatorBuilder<T> {
    transport: T,
    config: MediatorConfig,
    bindings: Bindings,
    sink: Arc<dyn FailureSink>,
}

impl<T: Transport> MediatorBuilder<T> {
    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: MediatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Values available to every handler, such as connection pools.
    pub fn bindings(mut self, bindings: Bindings) -> Self {
        self.bindings = bindings;
        self
    }

    /// Where failures without a requester are reported.
    pub fn sink(mut self, sink: impl FailureSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// Build the mediator.
    pub fn build(self) -> Mediator<T> {
        Mediator {
            shared: Arc::new(Shared {
                transport: self.transport,
                config: self.config,
                bindings: self.bindings,
                sink: self.sink,
                registry: RwLock::new(Arc::new(Registry::new())),
            }),
            active: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T: Transport> Mediator<T> {
    /// A mediator over `transport` with default settings.
    pub fn new(transport: T) -> Self {
        Self::builder(transport).build()
    }

    /// Start configuring a mediator over `transport`.
    pub fn builder(transport: T) -> MediatorBuilder<T> {
        MediatorBuilder {
            transport,
            config: MediatorConfig::default(),
            bindings: Bindings::new(),
            sink: Arc::new(TracingSink),
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    /// Current settings.
    pub fn config(&self) -> &MediatorConfig {
        &self.shared.config
    }

    /// Snapshot of the routing table.
    pub fn registry(&self) -> Arc<Registry> {
        self.shared.registry()
    }

    /// Connect the transport. Connecting twice is harmless.
    pub async fn connect(&self) -> std::result::Result<(), MediatorError> {
        if self.shared.transport.is_connected() {
            return Ok(());
        }
        self.shared.transport.connect().await?;
        tracing::info!("mediator connected");
        Ok(())
    }

    /// Stop every subscription and disconnect the transport.
    pub async fn disconnect(&self) -> std::result::Result<(), MediatorError> {
        let mut active = self.active.lock().await;
        for (_, subscriptions) in active.drain() {
            for subscription in subscriptions {
                subscription.task.abort();
            }
        }
        self.shared.replace_registry(Registry::new());
        if self.shared.transport.is_connected() {
            self.shared.transport.disconnect().await?;
        }
        tracing::info!("mediator disconnected");
        Ok(())
    }

    /// Subscribe every subscriber of `service`.
    ///
    /// Either all subscribers are subscribed or none is.
    pub async fn subscribe(&self, service: Service) -> std::result::Result<SubscriptionId, MediatorError> {
        if !self.shared.transport.is_connected() {
            return Err(MediatorError::NotConnected);
        }
        let mut active = self.active.lock().await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let registry = self.shared.registry().to_builder().register(id, &service)?.build();

        let mut started = Vec::with_capacity(service.subscribers().len());
        for subscriber in service.subscribers() {
            match self.shared.transport.subscribe(subscriber.subscribe_spec()).await {
                Ok(subscription) => {
                    let key = subscription.key();
                    let task = tokio::spawn(consume(
                        self.shared.clone(),
                        subscriber.clone(),
                        subscription,
                    ));
                    started.push(Active { key, task });
                }
                Err(err) => {
                    self.stop(started).await;
                    return Err(err.into());
                }
            }
        }

        active.insert(id, started);
        self.shared.replace_registry(registry);
        tracing::info!(
            service = service.name(),
            id,
            subscribers = service.subscribers().len(),
            "service subscribed"
        );
        Ok(id)
    }

    /// Unsubscribe the service subscribed under `id`.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> std::result::Result<(), MediatorError> {
        let mut active = self.active.lock().await;
        let subscriptions = active
            .remove(&id)
            .ok_or(MediatorError::UnknownSubscription(id))?;
        let registry = self.shared.registry().to_builder().remove(id).build();
        self.shared.replace_registry(registry);
        self.stop(subscriptions).await;
        tracing::info!(id, "service unsubscribed");
        Ok(())
    }

    async fn stop(&self, subscriptions: Vec<Active>) {
        for Active { key, task } in subscriptions {
            if let Err(err) = self.shared.transport.unsubscribe(key).await {
                tracing::warn!(key, error = %err, "transport unsubscribe failed");
            }
            task.abort();
        }
    }

    /// Publish `message` on its topic.
    pub async fn publish<P: Serialize>(&self, message: &Message<P>) -> Result<()> {
        self.publish_raw(serde_json::to_value(message)?).await
    }

    /// Publish a raw message on the topic named by its `name` key.
    pub async fn publish_raw(&self, raw: Value) -> Result<()> {
        let subject = subject_of(&raw)?.to_owned();
        let bytes = serde_json::to_vec(&raw)?;
        self.shared
            .transport
            .publish(&subject, bytes)
            .await
            .map_err(|err| Error::internal_from(&err).with_debug("subject", subject))
    }

    /// Send `message` and wait for its reply.
    pub async fn request<P: Serialize>(&self, message: &Message<P>) -> Result<Value> {
        self.request_raw(serde_json::to_value(message)?).await
    }

    /// Send `message` and materialize the reply as `R`.
    pub async fn request_as<P: Serialize, R: Object>(&self, message: &Message<P>) -> Result<R> {
        R::create(Some(self.request(message).await?))
    }

    /// Send a raw message and wait for its reply.
    ///
    /// No reply within the configured timeout fails `request_timeout`; no
    /// subscriber at all fails `missing_subscriber`. An error sent by the
    /// remote handler is returned as is.
    pub async fn request_raw(&self, raw: Value) -> Result<Value> {
        let subject = subject_of(&raw)?.to_owned();
        let bytes = serde_json::to_vec(&raw)?;
        let timeout = self.shared.config.request_timeout;
        match self.shared.transport.request(&subject, bytes, timeout).await {
            Ok(reply) => serde_json::from_slice::<ReplyEnvelope>(&reply)
                .map_err(|err| Error::internal_from(&err).with_debug("subject", subject))?
                .into_result(),
            Err(TransportError::Timeout(waited)) => Err(Error::request_timeout()
                .with_debug("subject", subject)
                .with_debug(
                    "timeout_ms",
                    u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                )),
            Err(TransportError::NoResponders(_)) => {
                Err(Error::missing_subscriber().with_debug("subject", subject))
            }
            Err(err) => Err(Error::internal_from(&err).with_debug("subject", subject)),
        }
    }

    /// Run the first matching reply subscriber in process.
    pub async fn dispatch(&self, raw: Value) -> Result<Value> {
        let subject = subject_of(&raw)?.to_owned();
        let registry = self.shared.registry();
        let Some(subscriber) = registry.reply_for(&subject) else {
            return Err(Error::missing_subscriber().with_debug("subject", subject));
        };
        let span = delivery_span(&subject, subscriber, &raw);
        self.shared
            .run(subscriber, raw, &subject)
            .instrument(span)
            .await
    }

    /// Run every matching non-reply subscriber in process.
    ///
    /// Failures go to the sink. Returns how many subscribers ran.
    pub async fn broadcast(&self, raw: Value) -> Result<usize> {
        let subject = subject_of(&raw)?.to_owned();
        let registry = self.shared.registry();
        let runs = registry.listeners(&subject).map(|subscriber| {
            let span = delivery_span(&subject, subscriber, &raw);
            let raw = raw.clone();
            let subject = subject.as_str();
            async move {
                if let Err(err) = self.shared.run(subscriber, raw, subject).await {
                    self.shared.sink.report(subject, &err);
                }
            }
            .instrument(span)
        });
        Ok(join_all(runs).await.len())
    }
}

impl<T> Shared<T> {
    fn registry(&self) -> Arc<Registry> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_registry(&self, registry: Registry) {
        *self.registry.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(registry);
    }

    /// Invoke `subscriber`, turning panics into internal errors.
    async fn run(&self, subscriber: &Subscriber, raw: Value, subject: &str) -> Result<Value> {
        let outcome = AssertUnwindSafe(subscriber.invoke(raw, self.bindings.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(Error::internal().with_debug("message", panic_message(panic.as_ref())))
            });
        outcome.map_err(|err| match err.kind() {
            ErrorKind::Internal if !err.debug().contains_key("subject") => {
                err.with_debug("subject", subject)
            }
            _ => err,
        })
    }
}

impl<T: Transport> Shared<T> {
    async fn deliver(&self, subscriber: &Arc<Subscriber>, delivery: T::Delivery) {
        let subject = delivery.subject().to_owned();
        if !self.answers(subscriber, &subject) {
            tracing::trace!(
                subject = %subject,
                topic = %subscriber.topic(),
                "request left to an earlier reply subscriber"
            );
            return;
        }
        let (outcome, span) = match serde_json::from_slice::<Value>(delivery.payload()) {
            Ok(raw) => {
                let span = delivery_span(&subject, subscriber, &raw);
                let outcome = self
                    .run(subscriber, raw, &subject)
                    .instrument(span.clone())
                    .await;
                (outcome, span)
            }
            Err(err) => {
                let span = delivery_span(&subject, subscriber, &Value::Null);
                let err = Error::bad_request()
                    .with_detail("message is not valid JSON")
                    .with_debug("message", err.to_string());
                (Err(err), span)
            }
        };
        self.complete(subscriber, &delivery, &subject, outcome)
            .instrument(span)
            .await;
    }

    /// Only the first matching reply subscriber, in registration order,
    /// answers a request. A subscriber missing from the current snapshot is
    /// still being subscribed or removed and answers on its own.
    fn answers(&self, subscriber: &Arc<Subscriber>, subject: &str) -> bool {
        if !subscriber.will_reply() {
            return true;
        }
        let registry = self.registry();
        let known = registry.subscribers().any(|sub| Arc::ptr_eq(sub, subscriber));
        !known || registry.reply_for(subject).is_some_and(|first| Arc::ptr_eq(first, subscriber))
    }

    async fn complete(
        &self,
        subscriber: &Subscriber,
        delivery: &T::Delivery,
        subject: &str,
        outcome: Result<Value>,
    ) {
        match subscriber.completion() {
            Completion::Reply => {
                if let Err(err) = &outcome {
                    tracing::debug!(code = err.code(), "replying with error");
                }
                let envelope = ReplyEnvelope::from_result(outcome, self.config.expose_debug);
                let sent = match serde_json::to_vec(&envelope) {
                    Ok(bytes) => delivery.respond(bytes).await,
                    Err(err) => Err(TransportError::Backend(Box::new(err))),
                };
                if let Err(err) = sent {
                    tracing::error!(error = %err, "reply could not be sent");
                }
            }
            Completion::Stream => {
                let settled = match &outcome {
                    Ok(_) => delivery.ack().await,
                    Err(err) => {
                        self.sink.report(subject, err);
                        delivery.nak(self.config.nak_delay).await
                    }
                };
                if let Err(err) = settled {
                    tracing::error!(error = %err, "stream delivery could not be settled");
                }
            }
            Completion::Fire => {
                if let Err(err) = &outcome {
                    self.sink.report(subject, err);
                }
            }
        }
    }
}

async fn consume<T: Transport>(
    shared: Arc<Shared<T>>,
    subscriber: Arc<Subscriber>,
    mut subscription: Subscription<T::Delivery>,
) {
    while let Some(delivery) = subscription.next().await {
        let shared = shared.clone();
        let subscriber = subscriber.clone();
        tokio::spawn(async move { shared.deliver(&subscriber, delivery).await });
    }
    tracing::debug!(key = subscription.key(), "subscription closed");
}

fn subject_of(raw: &Value) -> Result<&str> {
    raw.get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::missing_field("name"))
}

/// Trace identifiers read from the context of an undecoded message.
struct RawTrace<'a>(&'a Value);

impl Traceable for RawTrace<'_> {
    fn trace_id(&self) -> Option<&str> {
        self.0.pointer("/context/trace_id")?.as_str()
    }

    fn span_id(&self) -> Option<&str> {
        self.0.pointer("/context/span_id")?.as_str()
    }
}

fn delivery_span(subject: &str, subscriber: &Subscriber, raw: &Value) -> tracing::Span {
    let trace = RawTrace(raw);
    if let Some(trace_id) = trace.trace_id() {
        tracing::info_span!(
            "delivery",
            subject = %subject,
            service = %subscriber.service(),
            trace_id = %trace_id,
            span_id = %trace.span_id().unwrap_or(""),
        )
    } else {
        tracing::info_span!(
            "delivery",
            subject = %subject,
            service = %subscriber.service(),
        )
    }
}
