//! Operator Notifier (spec.md §4.13, §5, §7): structured error/success
//! messages posted to a chat webhook, with severity-dependent timeouts.

use serde_json::{json, Value};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Normal,
    Fatal,
}

impl Severity {
    fn emoji(&self) -> &'static str {
        match self {
            Severity::Warning => "\u{26a0}\u{fe0f}",
            Severity::Normal => "\u{2139}\u{fe0f}",
            Severity::Fatal => "\u{1f6a8}",
        }
    }

    /// Fatal notifications get a tighter timeout (5s) than non-fatal ones
    /// (8s) — spec.md §5: these must not stall a request handler.
    fn timeout(&self) -> Duration {
        match self {
            Severity::Fatal => Duration::from_secs(5),
            Severity::Warning | Severity::Normal => Duration::from_secs(8),
        }
    }
}

/// A structured notification. Every field is optional except `message`, so
/// call sites only populate what they have.
#[derive(Clone, Debug, Default)]
pub struct Notification {
    pub severity_context: Option<String>,
    pub contact_id: Option<String>,
    pub phone: Option<String>,
    pub service: Option<String>,
    pub province: Option<String>,
    pub request_id: Option<String>,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub error: Option<String>,
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, severity: Severity, message: &str, ctx: Notification);
}

pub struct ChatNotifier {
    http: reqwest::Client,
    webhook_url: String,
}

impl ChatNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        ChatNotifier {
            http: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
        }
    }

    fn block_kit_payload(severity: Severity, message: &str, ctx: &Notification) -> Value {
        let mut fields = vec![format!("*Timestamp:* {}", chrono::Utc::now().to_rfc3339())];
        if let Some(v) = &ctx.request_id {
            fields.push(format!("*Request id:* {v}"));
        }
        if let Some(v) = &ctx.contact_id {
            fields.push(format!("*Contact:* {v}"));
        }
        if let Some(v) = &ctx.phone {
            fields.push(format!("*Phone:* {v}"));
        }
        if let Some(v) = &ctx.service {
            fields.push(format!("*Service:* {v}"));
        }
        if let Some(v) = &ctx.province {
            fields.push(format!("*Province:* {v}"));
        }
        if let Some(v) = &ctx.source_ip {
            fields.push(format!("*Source IP:* {v}"));
        }
        if let Some(v) = &ctx.user_agent {
            fields.push(format!("*User agent:* {v}"));
        }
        if let Some(v) = &ctx.error {
            fields.push(format!("*Error:* {v}"));
        }

        json!({
            "blocks": [
                {
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": format!("{} {}", severity.emoji(), message) }
                },
                {
                    "type": "section",
                    "text": { "type": "mrkdwn", "text": fields.join("\n") }
                }
            ]
        })
    }
}

#[async_trait::async_trait]
impl Notifier for ChatNotifier {
    async fn notify(&self, severity: Severity, message: &str, ctx: Notification) {
        let payload = Self::block_kit_payload(severity, message, &ctx);
        let result = self
            .http
            .post(&self.webhook_url)
            .timeout(severity.timeout())
            .json(&payload)
            .send()
            .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "failed to deliver operator notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_notifications_use_the_tighter_timeout() {
        assert_eq!(Severity::Fatal.timeout(), Duration::from_secs(5));
        assert_eq!(Severity::Normal.timeout(), Duration::from_secs(8));
        assert_eq!(Severity::Warning.timeout(), Duration::from_secs(8));
    }
}
