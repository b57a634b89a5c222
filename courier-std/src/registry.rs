//! Frozen routing table of subscribed services.
//!
//! The mediator never mutates a [`Registry`] in place: subscribing or
//! unsubscribing builds a new one with [`RegistryBuilder`] and swaps the
//! shared snapshot, so deliveries in flight keep routing against the table
//! they started with.

use crate::service::{RegistrationError, Service, Subscriber};
use std::sync::Arc;

/// Identifier of a subscribed service.
pub type SubscriptionId = u64;

/// Subscribers of every subscribed service, in subscription order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<(SubscriptionId, Arc<Subscriber>)>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new registry from this one.
    pub fn to_builder(&self) -> RegistryBuilder {
        RegistryBuilder {
            entries: self.entries.clone(),
        }
    }

    /// First reply subscriber whose topic matches `subject`.
    pub fn reply_for(&self, subject: &str) -> Option<&Arc<Subscriber>> {
        self.subscribers()
            .find(|sub| sub.will_reply() && sub.topic().matches(subject))
    }

    /// Every non-reply subscriber whose topic matches `subject`.
    pub fn listeners<'a>(&'a self, subject: &'a str) -> impl Iterator<Item = &'a Arc<Subscriber>> {
        self.subscribers()
            .filter(move |sub| !sub.will_reply() && sub.topic().matches(subject))
    }

    /// Every subscriber, in subscription order.
    pub fn subscribers(&self) -> impl Iterator<Item = &Arc<Subscriber>> {
        self.entries.iter().map(|(_, sub)| sub)
    }

    /// Subscribers registered under `id`.
    pub fn of(&self, id: SubscriptionId) -> impl Iterator<Item = &Arc<Subscriber>> {
        self.entries
            .iter()
            .filter(move |(owner, _)| *owner == id)
            .map(|(_, sub)| sub)
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: Vec<(SubscriptionId, Arc<Subscriber>)>,
}

impl RegistryBuilder {
    /// Create a new empty registry builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the subscribers of `service` under `id`.
    ///
    /// Fails if one of its reply topics already has a reply subscriber.
    pub fn register(mut self, id: SubscriptionId, service: &Service) -> Result<Self, RegistrationError> {
        for sub in service.subscribers() {
            let taken = sub.will_reply()
                && self.entries.iter().any(|(_, other)| {
                    other.will_reply() && other.topic().as_str() == sub.topic().as_str()
                });
            if taken {
                return Err(RegistrationError::DuplicateReply(sub.topic().to_string()));
            }
            self.entries.push((id, sub.clone()));
        }
        Ok(self)
    }

    /// Drop every subscriber registered under `id`.
    pub fn remove(mut self, id: SubscriptionId) -> Self {
        self.entries.retain(|(owner, _)| *owner != id);
        self
    }

    /// Build the registry.
    pub fn build(self) -> Registry {
        Registry {
            entries: self.entries,
        }
    }
}
