//! # courier - Message-Driven Service Toolkit
//!
//! `courier` turns untyped messages arriving over a pub/sub transport into
//! typed domain objects, routes them to handlers whose dependencies are
//! resolved on demand, and translates the handler's outcome back into a
//! reply, an acknowledgement or a failure report.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! #[derive(Debug, Clone, Object)]
//! struct GetUser {
//!     id: Id,
//! }
//!
//! async fn get_user(message: Message<GetUser>, Bound(users): Bound<Users>) -> Result<User> {
//!     users.find(&message.payload().id).await
//! }
//!
//! let service = Service::builder("users").reply("user.get", get_user)?.build();
//!
//! let mediator = Mediator::builder(transport)
//!     .bindings(Bindings::new().provide(users))
//!     .build();
//! mediator.connect().await?;
//! mediator.subscribe(service).await?;
//! ```
//!
//! ## Crates
//!
//! - `courier-core`: results, errors, value objects, messages, dependency resolution
//! - `courier-std`: topics, services, transports, the mediator, collaborator ports
//! - `courier-macros`: `#[derive(Object)]`

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

extern crate self as courier;

pub use courier_core::{
    // Dependency resolution
    Bindings,
    Bound,
    // Error types
    BoxError,
    // Value objects
    Construct,
    // Primitives
    DateTime,
    Dependency,
    Depends,
    Details,
    Email,
    EntityStatus,
    Error,
    ErrorKind,
    FieldSchema,
    FieldValue,
    Id,
    Injectable,
    Latitude,
    Locale,
    LocalizedText,
    Longitude,
    Map,
    // Messages
    Message,
    MsgClient,
    MsgClientDevice,
    MsgContext,
    Object,
    Options,
    PositiveInt,
    Provided,
    Provider,
    Release,
    ResolveError,
    Resolver,
    // Results
    Result,
    ResultExt,
    Schema,
    Shape,
    SortDirection,
    Status,
    Time,
    Timezone,
    Traceable,
    call_with_dependencies,
    combine,
    combine_map,
    options,
};

pub use courier_std::{
    Completion, ConfigError, Delivery, FailureSink, MemoryDelivery, MemoryTransport, Mediator,
    MediatorBuilder, MediatorConfig, MediatorError, MessageArgs, RegistrationError, Registry,
    RegistryBuilder, ReplyEnvelope, Service, ServiceBuilder, StreamSpec, SubscribeOptions,
    SubscribeSpec, Subscriber, Subscription, SubscriptionId, TopicError, TopicPattern, TracingSink,
    Transport, TransportError, TransportStats,
};

#[cfg(feature = "macros")]
pub use courier_macros::Object;

#[cfg(feature = "macros")]
pub mod objects;

/// Construction engine internals, for hand-written [`Object`] impls.
pub mod schema {
    pub use courier_core::schema::{Fields, create, float, integer, mismatch};
}

/// Collaborator ports and their in-memory implementations.
pub mod collab {
    #![allow(clippy::wildcard_imports)]
    pub use courier_std::collab::*;
}

/// Topic pattern matching.
pub mod topic {
    pub use courier_std::topic::matches;
}

/// Testing utilities.
pub mod testing {
    #![allow(clippy::wildcard_imports)]
    pub use courier_std::testing::*;
}

#[doc(hidden)]
pub mod __private {
    pub use courier_core::__private::{serde, serde_json};
}

/// Prelude module - common imports for Courier.
///
/// # Usage
///
/// ```rust,ignore
/// use courier::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Bindings, Bound, DateTime, Depends, Email, Error, ErrorKind, Id, Map, Mediator,
        MediatorConfig, MemoryTransport, Message, Object, Provided, Provider, Result, ResultExt,
        Service, SubscribeOptions, Transport,
    };
}
