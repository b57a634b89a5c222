//! In-process transport.
//!
//! Subjects, wildcards, queue groups, request/reply and durable stream
//! consumers behave like a NATS server with JetStream:
//!
//! - every plain subscription matching a subject receives a copy,
//! - subscriptions sharing both a subject pattern and a queue group (or a
//!   durable consumer name) receive each message once per group, round robin,
//! - durable deliveries must be acknowledged; a nak redelivers the message to
//!   the same subscription after the requested delay.

use super::{Delivery, SubscribeSpec, Subscription, SubscriptionKey, Transport, TransportError};
use crate::topic::TopicPattern;
use futures::future::{Ready, ready};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};

type ReplySlot = Arc<Mutex<Option<oneshot::Sender<Vec<u8>>>>>;

/// A queue group is scoped to the pattern it subscribed with.
type GroupKey = (String, String);

/// Counters of a [`MemoryTransport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Messages published or requested.
    pub published: usize,
    /// Durable deliveries acknowledged.
    pub acked: usize,
    /// Durable deliveries negatively acknowledged.
    pub nacked: usize,
    /// Durable deliveries sent again after a nak.
    pub redelivered: usize,
}

/// A transport living entirely in the current process.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    connected: AtomicBool,
    next_key: AtomicU64,
    routes: Mutex<Routes>,
    published: AtomicUsize,
    acked: AtomicUsize,
    nacked: AtomicUsize,
    redelivered: AtomicUsize,
}

#[derive(Default)]
struct Routes {
    entries: Vec<Entry>,
    cursors: HashMap<GroupKey, usize>,
}

struct Entry {
    key: SubscriptionKey,
    pattern: TopicPattern,
    group: Option<GroupKey>,
    durable: bool,
    sender: mpsc::UnboundedSender<MemoryDelivery>,
}

struct Target {
    key: SubscriptionKey,
    durable: bool,
    sender: mpsc::UnboundedSender<MemoryDelivery>,
}

impl Routes {
    /// Subscriptions receiving a message on `subject`: every plain match plus
    /// one member per group.
    fn targets(&mut self, subject: &str) -> Vec<Target> {
        let mut targets = Vec::new();
        let mut groups: Vec<(GroupKey, Vec<usize>)> = Vec::new();
        for (idx, entry) in self.entries.iter().enumerate() {
            if !entry.pattern.matches(subject) {
                continue;
            }
            match &entry.group {
                None => targets.push(idx),
                Some(group) => match groups.iter_mut().find(|(name, _)| name == group) {
                    Some((_, members)) => members.push(idx),
                    None => groups.push((group.clone(), vec![idx])),
                },
            }
        }
        for (group, members) in groups {
            let cursor = self.cursors.entry(group).or_insert(0);
            targets.push(members[*cursor % members.len()]);
            *cursor = cursor.wrapping_add(1);
        }
        targets
            .into_iter()
            .map(|idx| {
                let entry = &self.entries[idx];
                Target {
                    key: entry.key,
                    durable: entry.durable,
                    sender: entry.sender.clone(),
                }
            })
            .collect()
    }

    fn sender(&self, key: SubscriptionKey) -> Option<mpsc::UnboundedSender<MemoryDelivery>> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.sender.clone())
    }
}

impl MemoryTransport {
    /// A disconnected transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            published: self.inner.published.load(Ordering::SeqCst),
            acked: self.inner.acked.load(Ordering::SeqCst),
            nacked: self.inner.nacked.load(Ordering::SeqCst),
            redelivered: self.inner.redelivered.load(Ordering::SeqCst),
        }
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.routes().entries.len()
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.inner.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn fan_out(&self, subject: &str, payload: &[u8], reply: Option<&ReplySlot>) -> usize {
        let targets = self.inner.routes().targets(subject);
        self.inner.published.fetch_add(1, Ordering::SeqCst);
        let mut delivered = 0;
        for target in targets {
            let delivery = MemoryDelivery {
                subject: subject.to_owned(),
                payload: payload.to_vec(),
                reply: reply.cloned(),
                redelivery: target.durable.then(|| Redelivery {
                    inner: Arc::clone(&self.inner),
                    key: target.key,
                    attempt: 1,
                }),
            };
            if target.sender.send(delivery).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

impl Inner {
    fn routes(&self) -> std::sync::MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryTransport {
    type Delivery = MemoryDelivery;

    fn connect(&self) -> impl Future<Output = Result<(), TransportError>> + Send {
        self.inner.connected.store(true, Ordering::SeqCst);
        ready(Ok(()))
    }

    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.routes().entries.clear();
        ready(Ok(()))
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        let result = self.ensure_connected().map(|()| {
            let delivered = self.fan_out(subject, &payload, None);
            tracing::trace!(subject, delivered, "published");
        });
        ready(result)
    }

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.ensure_connected()?;
        let (sender, receiver) = oneshot::channel();
        let slot: ReplySlot = Arc::new(Mutex::new(Some(sender)));
        if self.fan_out(subject, &payload, Some(&slot)) == 0 {
            return Err(TransportError::NoResponders(subject.to_owned()));
        }
        drop(slot);
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) | Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    fn subscribe(
        &self,
        spec: SubscribeSpec,
    ) -> impl Future<Output = Result<Subscription<MemoryDelivery>, TransportError>> + Send {
        let result = self.ensure_connected().and_then(|()| {
            let pattern = TopicPattern::parse(&spec.subject)
                .map_err(|err| TransportError::Backend(Box::new(err)))?;
            let key = self.inner.next_key.fetch_add(1, Ordering::SeqCst);
            let group = match (&spec.queue, &spec.stream) {
                (Some(queue), _) => Some(queue.clone()),
                (None, Some(stream)) => Some(format!("{}:{}", stream.stream, stream.durable)),
                (None, None) => None,
            }
            .map(|name| (spec.subject.clone(), name));
            let (sender, receiver) = mpsc::unbounded_channel();
            self.inner.routes().entries.push(Entry {
                key,
                pattern,
                group,
                durable: spec.stream.is_some(),
                sender,
            });
            tracing::debug!(subject = %spec.subject, key, "subscribed");
            Ok(Subscription::new(key, receiver))
        });
        ready(result)
    }

    fn unsubscribe(
        &self,
        key: SubscriptionKey,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        let mut routes = self.inner.routes();
        let before = routes.entries.len();
        routes.entries.retain(|entry| entry.key != key);
        let removed = routes.entries.len() < before;
        drop(routes);
        ready(if removed {
            Ok(())
        } else {
            Err(TransportError::Closed(key))
        })
    }
}

// ============================================================================
// Delivery
// ============================================================================

struct Redelivery {
    inner: Arc<Inner>,
    key: SubscriptionKey,
    attempt: u32,
}

/// A message received from a [`MemoryTransport`].
pub struct MemoryDelivery {
    subject: String,
    payload: Vec<u8>,
    reply: Option<ReplySlot>,
    redelivery: Option<Redelivery>,
}

impl MemoryDelivery {
    /// Delivery attempt, starting at 1; always 1 outside durable streams.
    pub fn attempt(&self) -> u32 {
        self.redelivery.as_ref().map_or(1, |redelivery| redelivery.attempt)
    }

    fn not_ackable(&self) -> Ready<Result<(), TransportError>> {
        ready(Err(TransportError::NotAckable(self.subject.clone())))
    }
}

impl Delivery for MemoryDelivery {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn respond(&self, payload: Vec<u8>) -> impl Future<Output = Result<(), TransportError>> + Send {
        let result = match &self.reply {
            None => Err(TransportError::NoReplySubject(self.subject.clone())),
            Some(slot) => {
                let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                // First responder wins; later replies are dropped.
                if let Some(sender) = sender {
                    let _ = sender.send(payload);
                }
                Ok(())
            }
        };
        ready(result)
    }

    fn ack(&self) -> impl Future<Output = Result<(), TransportError>> + Send {
        match &self.redelivery {
            Some(redelivery) => {
                redelivery.inner.acked.fetch_add(1, Ordering::SeqCst);
                ready(Ok(()))
            }
            None => self.not_ackable(),
        }
    }

    fn nak(&self, delay: Duration) -> impl Future<Output = Result<(), TransportError>> + Send {
        let Some(redelivery) = &self.redelivery else {
            return self.not_ackable();
        };
        redelivery.inner.nacked.fetch_add(1, Ordering::SeqCst);

        let inner = Arc::clone(&redelivery.inner);
        let key = redelivery.key;
        let again = MemoryDelivery {
            subject: self.subject.clone(),
            payload: self.payload.clone(),
            reply: None,
            redelivery: Some(Redelivery {
                inner: Arc::clone(&inner),
                key,
                attempt: redelivery.attempt.saturating_add(1),
            }),
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let sender = inner.routes().sender(key);
            if let Some(sender) = sender {
                if sender.send(again).is_ok() {
                    inner.redelivered.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected() -> MemoryTransport {
        let transport = MemoryTransport::new();
        transport.connect().await.unwrap();
        transport
    }

    #[tokio::test]
    async fn requires_a_connection() {
        let transport = MemoryTransport::new();
        let err = transport.publish("a", Vec::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn plain_subscribers_all_receive() {
        let transport = connected().await;
        let mut first = transport.subscribe(SubscribeSpec::new("a.*")).await.unwrap();
        let mut second = transport.subscribe(SubscribeSpec::new("a.>")).await.unwrap();
        transport.publish("a.b", b"hi".to_vec()).await.unwrap();
        assert_eq!(first.next().await.unwrap().payload(), b"hi");
        assert_eq!(second.next().await.unwrap().subject(), "a.b");
    }

    #[tokio::test]
    async fn queue_groups_receive_once() {
        let transport = connected().await;
        let mut first = transport
            .subscribe(SubscribeSpec::new("jobs").queue("workers"))
            .await
            .unwrap();
        let mut second = transport
            .subscribe(SubscribeSpec::new("jobs").queue("workers"))
            .await
            .unwrap();
        transport.publish("jobs", b"1".to_vec()).await.unwrap();
        transport.publish("jobs", b"2".to_vec()).await.unwrap();
        assert_eq!(first.next().await.unwrap().payload(), b"1");
        assert_eq!(second.next().await.unwrap().payload(), b"2");
    }

    #[tokio::test]
    async fn queue_groups_are_scoped_to_their_pattern() {
        let transport = connected().await;
        let mut exact = transport
            .subscribe(SubscribeSpec::new("jobs.run").queue("workers"))
            .await
            .unwrap();
        let mut wide = transport
            .subscribe(SubscribeSpec::new("jobs.>").queue("workers"))
            .await
            .unwrap();
        transport.publish("jobs.run", b"1".to_vec()).await.unwrap();
        transport.publish("jobs.run", b"2".to_vec()).await.unwrap();
        for subscription in [&mut exact, &mut wide] {
            assert_eq!(subscription.next().await.unwrap().payload(), b"1");
            assert_eq!(subscription.next().await.unwrap().payload(), b"2");
        }
    }

    #[tokio::test]
    async fn request_reply_round_trip() {
        let transport = connected().await;
        let mut subscription = transport.subscribe(SubscribeSpec::new("echo")).await.unwrap();
        tokio::spawn(async move {
            while let Some(delivery) = subscription.next().await {
                let payload = delivery.payload().to_vec();
                delivery.respond(payload).await.unwrap();
            }
        });
        let reply = transport
            .request("echo", b"ping".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, b"ping");
    }

    #[tokio::test]
    async fn request_without_responders_fails_fast() {
        let transport = connected().await;
        let err = transport
            .request("nobody", Vec::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NoResponders(subject) if subject == "nobody"));
    }

    #[tokio::test]
    async fn request_times_out() {
        let transport = connected().await;
        let _subscription = transport.subscribe(SubscribeSpec::new("slow")).await.unwrap();
        let err = transport
            .request("slow", Vec::new(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn nak_redelivers_after_delay() {
        let transport = connected().await;
        let mut subscription = transport
            .subscribe(SubscribeSpec::new("orders.created").stream("ORDERS", "billing"))
            .await
            .unwrap();
        transport.publish("orders.created", b"o1".to_vec()).await.unwrap();

        let first = subscription.next().await.unwrap();
        assert_eq!(first.attempt(), 1);
        first.nak(Duration::from_millis(5)).await.unwrap();

        let second = subscription.next().await.unwrap();
        assert_eq!(second.attempt(), 2);
        assert_eq!(second.payload(), b"o1");
        second.ack().await.unwrap();

        let stats = transport.stats();
        assert_eq!((stats.acked, stats.nacked, stats.redelivered), (1, 1, 1));
    }

    #[tokio::test]
    async fn plain_deliveries_cannot_be_acked() {
        let transport = connected().await;
        let mut subscription = transport.subscribe(SubscribeSpec::new("a")).await.unwrap();
        transport.publish("a", Vec::new()).await.unwrap();
        let delivery = subscription.next().await.unwrap();
        assert!(matches!(delivery.ack().await, Err(TransportError::NotAckable(_))));
        assert!(matches!(
            delivery.respond(Vec::new()).await,
            Err(TransportError::NoReplySubject(_))
        ));
    }

    #[tokio::test]
    async fn unsubscribe_ends_the_stream() {
        let transport = connected().await;
        let mut subscription = transport.subscribe(SubscribeSpec::new("a")).await.unwrap();
        transport.unsubscribe(subscription.key()).await.unwrap();
        assert!(subscription.next().await.is_none());
        assert_eq!(transport.subscription_count(), 0);
        assert!(transport.unsubscribe(subscription.key()).await.is_err());
    }
}
