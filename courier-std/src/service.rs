//! Services and their subscribers.
//!
//! A [`Service`] is a named, ordered list of [`Subscriber`]s. It is assembled
//! with [`ServiceBuilder`] and frozen by [`ServiceBuilder::build`]; the
//! mediator never changes a subscriber once it is registered.
//!
//! # Handlers
//!
//! A handler is an `async fn` whose first parameter is the [`Message<P>`] it
//! handles. The remaining parameters are resolved like any other dependency:
//!
//! ```rust,ignore
//! async fn get_user(message: Message<GetUser>, Depends(repo): Depends<Users>) -> Result<User> {
//!     repo.get(&message.payload().id).await
//! }
//!
//! let service = Service::builder("users")
//!     .reply("user.get", get_user)?
//!     .on("user.*.deleted", SubscribeOptions::new().stream("USERS"), forget_user)?
//!     .build();
//! ```

use crate::topic::{TopicError, TopicPattern};
use crate::transport::SubscribeSpec;
use courier_core::{
    Bindings, Dependency, Error, Injectable, Message, Object, Result, call_with_dependencies,
};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::{any::type_name, borrow::Cow, fmt, marker::PhantomData, sync::Arc};
use thiserror::Error as ThisError;

/// Errors raised while registering subscribers.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The topic is not a valid pattern.
    #[error("invalid topic `{topic}`: {source}")]
    InvalidTopic {
        /// The topic as written.
        topic: String,
        /// Why it was rejected.
        #[source]
        source: TopicError,
    },

    /// Two reply subscribers use the same topic.
    #[error("topic `{0}` already has a reply subscriber")]
    DuplicateReply(String),

    /// A stream subscription names an empty stream.
    #[error("subscriber of `{0}` names an empty stream")]
    EmptyStream(String),

    /// The service name is empty.
    #[error("service name is empty")]
    EmptyServiceName,
}

// ============================================================================
// Options
// ============================================================================

/// How an [`on`](ServiceBuilder::on) subscriber receives messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    queued: bool,
    stream: Option<String>,
    arg: Cow<'static, str>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscribeOptions {
    /// Every instance of the service receives every message.
    pub fn new() -> Self {
        Self {
            queued: false,
            stream: None,
            arg: Cow::Borrowed(courier_core::inject::MESSAGE_ARG),
        }
    }

    /// Only one instance of the service receives each message.
    pub fn queued(mut self) -> Self {
        self.queued = true;
        self
    }

    /// Consume from a durable stream with acknowledgement.
    pub fn stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = Some(stream.into());
        self
    }

    /// Bind the message under `arg` instead of `message`.
    pub fn arg(mut self, arg: impl Into<Cow<'static, str>>) -> Self {
        self.arg = arg.into();
        self
    }
}

/// What happens to a delivery once its handler is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Send the outcome back to the requester.
    Reply,
    /// Acknowledge on success, ask for redelivery on failure.
    Stream,
    /// Report failures, nothing else.
    Fire,
}

// ============================================================================
// Subscriber
// ============================================================================

/// Parameter lists whose first element is the handled message.
#[diagnostic::on_unimplemented(
    message = "the first parameter of a subscriber must be a `Message<P>`",
    label = "handler parameters `{Self}` do not start with a message",
    note = "Write the handler as `async fn(message: Message<P>, ...) -> Result<R>`."
)]
pub trait MessageArgs: Dependency {
    /// Payload type of the handled message.
    type Payload: Object;
}

macro_rules! impl_message_args {
    ($($T:ident),*) => {
        impl<P: Object, $($T: Dependency,)*> MessageArgs for (Message<P>, $($T,)*) {
            type Payload = P;
        }
    };
}

impl_message_args!();
impl_message_args!(T2);
impl_message_args!(T2, T3);
impl_message_args!(T2, T3, T4);
impl_message_args!(T2, T3, T4, T5);
impl_message_args!(T2, T3, T4, T5, T6);
impl_message_args!(T2, T3, T4, T5, T6, T7);
impl_message_args!(T2, T3, T4, T5, T6, T7, T8);

trait Callback: Send + Sync + 'static {
    fn call<'a>(&'a self, raw: Value, arg: &'a str, bindings: Bindings)
    -> BoxFuture<'a, Result<Value>>;
}

struct Handler<H, Args> {
    handler: H,
    _args: PhantomData<fn() -> Args>,
}

impl<H, Args> Callback for Handler<H, Args>
where
    H: Injectable<Args>,
    H::Output: Serialize,
    Args: MessageArgs,
{
    fn call<'a>(
        &'a self,
        raw: Value,
        arg: &'a str,
        bindings: Bindings,
    ) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            let message = Message::<Args::Payload>::create(Some(raw))
                .map_err(|err| Error::validation_failed(err.into_errors()))?;
            let bindings = bindings.with_message(arg.to_owned(), message);
            let output = call_with_dependencies(&self.handler, bindings).await?;
            Ok::<Value, Error>(serde_json::to_value(output)?)
        })
    }
}

/// A registered handler and how it is subscribed.
pub struct Subscriber {
    service: Arc<str>,
    topic: TopicPattern,
    arg: Cow<'static, str>,
    message_type: &'static str,
    queued: bool,
    will_reply: bool,
    stream: Option<String>,
    callback: Arc<dyn Callback>,
}

impl Subscriber {
    /// Name of the owning service.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Topic pattern.
    pub fn topic(&self) -> &TopicPattern {
        &self.topic
    }

    /// Binding name of the message.
    pub fn arg(&self) -> &str {
        &self.arg
    }

    /// Rust type name of the message payload.
    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    /// Whether one instance of the service receives each message.
    pub fn queued(&self) -> bool {
        self.queued
    }

    /// Whether the handler answers requests.
    pub fn will_reply(&self) -> bool {
        self.will_reply
    }

    /// Durable stream the subscriber consumes from.
    pub fn stream(&self) -> Option<&str> {
        self.stream.as_deref()
    }

    /// How deliveries are completed.
    pub fn completion(&self) -> Completion {
        if self.will_reply {
            Completion::Reply
        } else if self.stream.is_some() {
            Completion::Stream
        } else {
            Completion::Fire
        }
    }

    /// Transport subscription for this subscriber.
    ///
    /// Queued subscribers join a group named after the service; stream
    /// subscribers use the service name as durable consumer.
    pub fn subscribe_spec(&self) -> SubscribeSpec {
        let mut spec = SubscribeSpec::new(self.topic.as_str());
        if self.queued {
            spec = spec.queue(self.service.as_ref());
        }
        if let Some(stream) = &self.stream {
            spec = spec.stream(stream.as_str(), self.service.as_ref());
        }
        spec
    }

    /// Materialize `raw` into the handler's message, resolve the handler's
    /// parameters and run it.
    ///
    /// An invalid message fails `validation_failed` without calling the
    /// handler. The handler's output is returned as JSON.
    pub async fn invoke(&self, raw: Value, bindings: Bindings) -> Result<Value> {
        self.callback.call(raw, &self.arg, bindings).await
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("service", &self.service)
            .field("topic", &self.topic.as_str())
            .field("arg", &self.arg)
            .field("message_type", &self.message_type)
            .field("queued", &self.queued)
            .field("will_reply", &self.will_reply)
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Service
// ============================================================================

/// A named, frozen list of subscribers.
#[derive(Debug, Clone)]
pub struct Service {
    name: Arc<str>,
    subscribers: Vec<Arc<Subscriber>>,
}

impl Service {
    /// Start building a service called `name`.
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            name: Arc::from(name.into()),
            subscribers: Vec::new(),
        }
    }

    /// Name of the service.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribers in registration order.
    pub fn subscribers(&self) -> &[Arc<Subscriber>] {
        &self.subscribers
    }
}

/// Builder for [`Service`].
pub struct ServiceBuilder {
    name: Arc<str>,
    subscribers: Vec<Arc<Subscriber>>,
}

impl ServiceBuilder {
    /// Handle messages on `topic` without replying.
    pub fn on<H, Args>(
        self,
        topic: &str,
        options: SubscribeOptions,
        handler: H,
    ) -> std::result::Result<Self, RegistrationError>
    where
        H: Injectable<Args>,
        H::Output: Serialize,
        Args: MessageArgs,
    {
        if options.stream.as_deref().is_some_and(str::is_empty) {
            return Err(RegistrationError::EmptyStream(topic.to_owned()));
        }
        self.add(topic, options, false, handler)
    }

    /// Answer requests on `topic`.
    ///
    /// Reply subscribers are always queued and never bound to a stream.
    pub fn reply<H, Args>(self, topic: &str, handler: H) -> std::result::Result<Self, RegistrationError>
    where
        H: Injectable<Args>,
        H::Output: Serialize,
        Args: MessageArgs,
    {
        if self
            .subscribers
            .iter()
            .any(|sub| sub.will_reply && sub.topic.as_str() == topic)
        {
            return Err(RegistrationError::DuplicateReply(topic.to_owned()));
        }
        self.add(topic, SubscribeOptions::new().queued(), true, handler)
    }

    fn add<H, Args>(
        mut self,
        topic: &str,
        options: SubscribeOptions,
        will_reply: bool,
        handler: H,
    ) -> std::result::Result<Self, RegistrationError>
    where
        H: Injectable<Args>,
        H::Output: Serialize,
        Args: MessageArgs,
    {
        if self.name.is_empty() {
            return Err(RegistrationError::EmptyServiceName);
        }
        let pattern = TopicPattern::parse(topic).map_err(|source| RegistrationError::InvalidTopic {
            topic: topic.to_owned(),
            source,
        })?;
        self.subscribers.push(Arc::new(Subscriber {
            service: self.name.clone(),
            topic: pattern,
            arg: options.arg,
            message_type: type_name::<Args::Payload>(),
            queued: options.queued,
            will_reply,
            stream: if will_reply { None } else { options.stream },
            callback: Arc::new(Handler {
                handler,
                _args: PhantomData,
            }),
        }));
        Ok(self)
    }

    /// Freeze the service.
    pub fn build(self) -> Service {
        Service {
            name: self.name,
            subscribers: self.subscribers,
        }
    }
}
