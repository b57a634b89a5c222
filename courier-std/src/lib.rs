//! # courier-std
//!
//! Standard implementations for the Courier message-driven service toolkit.
//!
//! This crate provides:
//! - **Topic patterns**: [`TopicPattern`] with `*` and `>` wildcards
//! - **Services**: [`Service`], [`ServiceBuilder`], [`Subscriber`]
//! - **Routing table**: [`Registry`], frozen and swapped as a whole
//! - **Transports**: the [`Transport`] abstraction and [`MemoryTransport`]
//! - **Mediator**: [`Mediator`], the delivery pipeline and its completion
//! - **Failure sinks**: [`FailureSink`], [`TracingSink`]
//! - **Collaborators**: repository, authorization, email and token ports
//! - **Testing**: recording sinks and notifiers

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

// Re-export core crate
pub use courier_core;

// Modules
pub mod collab;
pub mod mediator;
pub mod registry;
pub mod service;
pub mod sink;
pub mod testing;
pub mod topic;
pub mod transport;

pub use mediator::{
    ConfigError, Mediator, MediatorBuilder, MediatorConfig, MediatorError, ReplyEnvelope,
};
pub use registry::{Registry, RegistryBuilder, SubscriptionId};
pub use service::{
    Completion, MessageArgs, RegistrationError, Service, ServiceBuilder, SubscribeOptions,
    Subscriber,
};
pub use sink::{FailureSink, TracingSink};
pub use topic::{TopicError, TopicPattern};
pub use transport::{
    Delivery, MemoryDelivery, MemoryTransport, StreamSpec, SubscribeSpec, Subscription, Transport,
    TransportError, TransportStats,
};
