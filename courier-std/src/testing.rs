//! Testing utilities for Courier.
//!
//! - [`RecordingSink`]: a failure sink that keeps every report
//! - [`RecordingNotifier`]: a notifier that keeps every email
//! - [`CallCounter`]: a shared counter to bind and inspect from handlers
//! - [`eventually`]: wait for asynchronous effects of a delivery

use crate::{collab::Notifier, sink::FailureSink};
use async_trait::async_trait;
use courier_core::{Email, Error, Result};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

// ============================================================================
// Recording Sink
// ============================================================================

/// A failure sink that records every report.
///
/// # Example
///
/// ```rust,ignore
/// let sink = RecordingSink::new();
/// let mediator = Mediator::builder(transport).sink(sink.clone()).build();
///
/// // publish something that fails...
///
/// assert_eq!(sink.codes(), vec!["validation_failed"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    reports: Arc<Mutex<Vec<(String, Error)>>>,
}

impl RecordingSink {
    /// Create a new empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subjects and errors reported so far.
    pub fn reports(&self) -> Vec<(String, Error)> {
        self.reports.lock().unwrap().clone()
    }

    /// Error codes reported so far.
    pub fn codes(&self) -> Vec<String> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|(_, error)| error.code().to_owned())
            .collect()
    }

    /// Number of reports.
    pub fn count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }
}

impl FailureSink for RecordingSink {
    fn report(&self, subject: &str, error: &Error) {
        self.reports
            .lock()
            .unwrap()
            .push((subject.to_owned(), error.clone()));
    }
}

// ============================================================================
// Recording Notifier
// ============================================================================

/// An email sent through a [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    /// Recipient.
    pub to: Email,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub html_body: String,
}

/// A notifier that keeps emails instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentEmail>>>,
}

impl RecordingNotifier {
    /// Create a new notifier with an empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emails sent so far.
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_email(&self, to: &Email, subject: &str, html_body: &str) -> Result<()> {
        self.sent.lock().unwrap().push(SentEmail {
            to: to.clone(),
            subject: subject.to_owned(),
            html_body: html_body.to_owned(),
        });
        Ok(())
    }
}

// ============================================================================
// Call Counter
// ============================================================================

/// A counter shared between a test and the handlers it binds it to.
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    count: Arc<AtomicUsize>,
}

impl CallCounter {
    /// Create a new counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter.
    pub fn hit(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Get the current count.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition eventually held.
pub async fn eventually<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
