//! # External notification provider.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::NotifyError;

/// Sends a message to a recipient.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// One delivered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// In-process notifier that records what it sends.
///
/// Recipients added with [`Outbox::reject`] are refused with
/// [`NotifyError::Rejected`].
#[derive(Default)]
pub struct Outbox {
    sent: Mutex<Vec<Mail>>,
    rejected: HashSet<String>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Refuse deliveries to `recipient`.
    pub fn reject(mut self, recipient: impl Into<String>) -> Self {
        self.rejected.insert(recipient.into());
        self
    }

    /// Copies of everything sent so far.
    pub async fn sent(&self) -> Vec<Mail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for Outbox {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        if self.rejected.contains(recipient) {
            return Err(NotifyError::Rejected {
                recipient: recipient.to_string(),
                reason: "recipient blocked".into(),
            });
        }
        debug!(recipient, subject, "notification sent");
        self.sent.lock().await.push(Mail {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
