//! # courier-core
//!
//! Core types for the Courier message-driven service toolkit.
//!
//! This crate has no transport or runtime dependency and is meant to be
//! imported by domain crates that only define value objects, payloads and
//! providers.
//!
//! # Building blocks
//!
//! ## Result algebra ([`outcome`])
//!
//! Every fallible operation returns [`Result`]. [`combine`] inspects every
//! result of a batch and folds the failures into a single aggregate instead
//! of stopping at the first one.
//!
//! ## Value objects ([`schema`], [`primitives`], [`options`])
//!
//! [`Object::create`] turns untyped JSON into a typed value. Leaf objects
//! validate a single value; composite objects walk a cached [`Schema`] of
//! named fields and report every invalid field at once.
//!
//! ## Messages ([`message`])
//!
//! [`Message<P>`] is the envelope exchanged between services: topic, source,
//! id, creation time, payload and sender context.
//!
//! ## Dependency resolution ([`inject`])
//!
//! [`call_with_dependencies`] resolves the parameters of an async handler
//! from bindings and [`Provider`]s, runs it and releases scoped resources.
//!
//! # Error Types
//!
//! - [`Error`] - the domain error value carried on the wire
//! - [`ResolveError`] - parameter resolution failures

#![deny(clippy::wildcard_imports)]
#![warn(missing_docs)]

pub mod error;
pub mod inject;
pub mod message;
pub mod options;
pub mod outcome;
pub mod primitives;
pub mod schema;

// Re-exports
pub use error::{BoxError, Details, Error, ErrorKind, Status};
pub use inject::{
    Bindings, Bound, Dependency, Depends, Injectable, Provided, Provider, Release, ResolveError,
    Resolver, call_with_dependencies,
};
pub use message::{Message, MsgClient, MsgClientDevice, MsgContext, Traceable};
pub use options::{EntityStatus, Options, SortDirection};
pub use outcome::{Result, ResultExt, combine, combine_map};
pub use primitives::{
    DateTime, Email, Id, Latitude, Locale, LocalizedText, Longitude, Map, PositiveInt, Time,
    Timezone,
};
pub use schema::{Construct, FieldSchema, FieldValue, Object, Schema, Shape};

#[doc(hidden)]
pub mod __private {
    pub use serde;
    pub use serde_json;
}
