//! # Mailer handler.
//!
//! Formats a notification for each upload and hands it to a [`Notifier`].
//! The body embeds the event as pretty-printed JSON.
//!
//! Failure modes: malformed event payload, provider rejection.

use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::{Message, ObjectEvent};
use crate::error::{HandlerError, NotifyError};
use crate::external::Notifier;
use crate::handlers::handler::BatchContext;
use crate::handlers::per_message::MessageHandler;

/// Sends one notification per uploaded object.
pub struct Mailer {
    notifier: Arc<dyn Notifier>,
    recipient: String,
}

impl Mailer {
    pub fn new(notifier: Arc<dyn Notifier>, recipient: impl Into<String>) -> Self {
        Self {
            notifier,
            recipient: recipient.into(),
        }
    }

    /// Builds `(subject, body)` for an event.
    pub fn compose(event: &ObjectEvent) -> Result<(String, String), HandlerError> {
        validate(event)?;
        let subject = format!("New object: {}/{}", event.source, event.key);
        let details = serde_json::to_string_pretty(event)
            .map_err(|e| HandlerError::MalformedPayload { reason: e.to_string() })?;
        let body = format!(
            "An object of {} bytes was uploaded to '{}'.\n\n{details}\n",
            event.size, event.source
        );
        Ok((subject, body))
    }
}

fn validate(event: &ObjectEvent) -> Result<(), HandlerError> {
    if event.key.trim().is_empty() {
        return Err(HandlerError::MalformedPayload {
            reason: "empty object key".into(),
        });
    }
    if event.key.chars().any(char::is_control) {
        return Err(HandlerError::MalformedPayload {
            reason: "control characters in object key".into(),
        });
    }
    Ok(())
}

#[async_trait]
impl MessageHandler for Mailer {
    fn name(&self) -> &str {
        "mailer"
    }

    async fn handle_message(
        &self,
        message: &Message,
        _ctx: &BatchContext,
    ) -> Result<(), HandlerError> {
        let (subject, body) = Self::compose(&message.event)?;
        self.notifier
            .send(&self.recipient, &subject, &body)
            .await
            .map_err(|e| match e {
                NotifyError::Rejected { reason, .. } => HandlerError::Rejected { reason },
                other => HandlerError::failed(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::external::Outbox;

    fn ctx() -> BatchContext {
        BatchContext::new(CancellationToken::new(), None)
    }

    #[tokio::test]
    async fn sends_formatted_mail() {
        let outbox = Outbox::arc();
        let h = Mailer::new(outbox.clone(), "ops@example.com");
        let m = Message::new(
            ObjectEvent::new("images", "cat.png", 4).with_content_type("image/png"),
        );

        h.handle_message(&m, &ctx()).await.unwrap();

        let sent = outbox.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "New object: images/cat.png");
        assert!(sent[0].body.contains("\"content_type\": \"image/png\""));
    }

    #[tokio::test]
    async fn malformed_and_rejected_are_distinct() {
        let outbox = Arc::new(Outbox::new().reject("blocked@example.com"));
        let ok_mailer = Mailer::new(outbox.clone(), "ops@example.com");
        let blocked = Mailer::new(outbox.clone(), "blocked@example.com");

        let empty = Message::new(ObjectEvent::new("images", "  ", 0));
        assert!(matches!(
            ok_mailer.handle_message(&empty, &ctx()).await,
            Err(HandlerError::MalformedPayload { .. })
        ));

        let fine = Message::new(ObjectEvent::new("images", "cat.png", 4));
        assert!(matches!(
            blocked.handle_message(&fine, &ctx()).await,
            Err(HandlerError::Rejected { .. })
        ));
        assert!(outbox.sent().await.is_empty());
    }
}
