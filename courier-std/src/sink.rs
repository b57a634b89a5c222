//! Where failures without a requester go.
//!
//! Fire-and-forget and stream subscribers have nobody to answer; their
//! failures are handed to a [`FailureSink`].

use courier_core::{Error, ErrorKind};

/// Receiver of handler failures that cannot be replied.
pub trait FailureSink: Send + Sync + 'static {
    /// Report that the delivery on `subject` failed with `error`.
    fn report(&self, subject: &str, error: &Error);
}

/// Logs failures through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl FailureSink for TracingSink {
    fn report(&self, subject: &str, error: &Error) {
        if error.kind() == ErrorKind::Internal {
            tracing::error!(
                subject,
                code = error.code(),
                debug = %serde_json::Value::Object(error.debug().clone()),
                "delivery failed"
            );
        } else {
            tracing::warn!(
                subject,
                code = error.code(),
                field = error.field(),
                detail = error.detail(),
                "delivery rejected"
            );
        }
    }
}
