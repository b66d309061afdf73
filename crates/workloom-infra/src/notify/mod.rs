//! Notification transports for notification steps.
//!
//! The engine formats every textual field before dispatch; transports only
//! deliver. The log transport is the default. Email delivery lives behind
//! the same trait with SMTP credentials read from the environment, but the
//! actual mail transport is wired in by the host application.

use workloom_types::workflow::{NotificationConfig, NotificationKind};

/// Delivery seam for notification steps.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait NotificationTransport: Send + Sync {
    fn send(
        &self,
        config: &NotificationConfig,
    ) -> impl Future<Output = Result<(), String>> + Send;
}

/// Transport that writes notifications to the structured log.
///
/// Email-kind notifications are logged with their recipients so nothing is
/// silently dropped when no mail transport is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl NotificationTransport for LogNotifier {
    async fn send(&self, config: &NotificationConfig) -> Result<(), String> {
        match config.kind {
            NotificationKind::Log => {
                tracing::info!(
                    subject = config.subject.as_deref().unwrap_or(""),
                    message = config.message.as_str(),
                    "notification"
                );
            }
            NotificationKind::Email => {
                tracing::info!(
                    recipients = config.recipients.join(", ").as_str(),
                    subject = config.subject.as_deref().unwrap_or(""),
                    message = config.message.as_str(),
                    "email notification (log transport)"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_accepts_both_kinds() {
        let notifier = LogNotifier::new();

        let log = NotificationConfig {
            kind: NotificationKind::Log,
            message: "done".to_string(),
            subject: None,
            recipients: vec![],
        };
        assert!(notifier.send(&log).await.is_ok());

        let email = NotificationConfig {
            kind: NotificationKind::Email,
            message: "done".to_string(),
            subject: Some("run finished".to_string()),
            recipients: vec!["ops@example.test".to_string()],
        };
        assert!(notifier.send(&email).await.is_ok());
    }
}
