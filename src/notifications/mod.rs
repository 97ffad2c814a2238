//! Outbound notifications.
//!
//! Formatting and transport live behind [`Notifier`]; the server only decides
//! *when* delivery happens (always off the request path, through
//! [`BackgroundTasks`](crate::lifecycle::BackgroundTasks)).

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A message to deliver to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery to {recipient} failed: {reason}")]
    Delivery { recipient: String, reason: String },
}

/// Delivers notifications. Implementations own their transport and any
/// retry policy.
pub trait Notifier: Send + Sync + 'static {
    fn deliver(&self, notification: Notification) -> BoxFuture<'_, Result<(), NotifyError>>;
}

/// Notifier that only records deliveries in the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, notification: Notification) -> BoxFuture<'_, Result<(), NotifyError>> {
        Box::pin(async move {
            tracing::info!(
                recipient = %notification.recipient,
                subject = %notification.subject,
                body_len = notification.body.len(),
                "Notification delivered"
            );
            Ok(())
        })
    }
}
