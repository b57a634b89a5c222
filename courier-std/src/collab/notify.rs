//! Outbound email port.

use async_trait::async_trait;
use courier_core::{Email, Result};

/// Sends email on behalf of services.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send an HTML email to `to`.
    async fn send_email(&self, to: &Email, subject: &str, html_body: &str) -> Result<()>;
}
