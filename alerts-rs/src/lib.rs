// alerts-rs/src/lib.rs
//
// Failure alert dispatch for the keepalive monitoring service.
// Fans a message out to a Slack-compatible webhook and a Resend-style email
// API. Delivery is best-effort: a channel with missing credentials is
// silently skipped, and transport errors are logged and swallowed so that
// alerting can never fail the request that triggered it.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

const EMAIL_API_URL: &str = "https://api.resend.com/emails";
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Alert channel credentials, read once at startup
#[derive(Debug, Clone, Default)]
pub struct AlertConfig {
    pub slack_webhook_url: Option<String>,
    pub resend_api_key: Option<String>,
    pub email_to: Option<String>,
    pub email_from: Option<String>,
}

impl AlertConfig {
    pub fn from_env() -> Self {
        Self {
            slack_webhook_url: config_rs::env_first(&["ALERT_SLACK_WEBHOOK_URL"]),
            resend_api_key: config_rs::env_first(&["RESEND_API_KEY"]),
            email_to: config_rs::env_first(&["ALERT_EMAIL_TO"]),
            email_from: config_rs::env_first(&["ALERT_EMAIL_FROM"]),
        }
    }

    /// True when at least one channel has full credentials
    pub fn any_channel_configured(&self) -> bool {
        self.slack_webhook_url.is_some()
            || (self.resend_api_key.is_some()
                && self.email_to.is_some()
                && self.email_from.is_some())
    }
}

/// Alert dispatch abstraction
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Send a failure alert for a route, with up to a handful of recent
    /// error events as context. Must not fail.
    async fn send_failure_alert(
        &self,
        route: &str,
        reason: &str,
        recent_errors: &[serde_json::Value],
    );
}

#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct EmailPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// Alert sink that fans out to the configured channels
pub struct ChannelAlerter {
    config: AlertConfig,
    client: reqwest::Client,
}

impl ChannelAlerter {
    pub fn new(config: AlertConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { config, client }
    }

    async fn send_slack(&self, message: &str) {
        let url = match &self.config.slack_webhook_url {
            Some(url) => url,
            None => return,
        };

        let payload = SlackPayload { text: message };
        if let Err(err) = self.client.post(url).json(&payload).send().await {
            log::warn!("Slack alert delivery failed: {}", err);
        }
    }

    async fn send_email(&self, subject: &str, text: &str) {
        let (api_key, to, from) = match (
            &self.config.resend_api_key,
            &self.config.email_to,
            &self.config.email_from,
        ) {
            (Some(key), Some(to), Some(from)) => (key, to, from),
            _ => return,
        };

        let payload = EmailPayload {
            from,
            to,
            subject,
            text,
        };
        if let Err(err) = self
            .client
            .post(EMAIL_API_URL)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
        {
            log::warn!("Email alert delivery failed: {}", err);
        }
    }
}

#[async_trait]
impl AlertSink for ChannelAlerter {
    async fn send_failure_alert(
        &self,
        route: &str,
        reason: &str,
        recent_errors: &[serde_json::Value],
    ) {
        let header = format!("Keep-alive failure: {}", reason);
        let context = serde_json::to_string(recent_errors).unwrap_or_else(|_| "[]".to_string());
        let context_pretty =
            serde_json::to_string_pretty(recent_errors).unwrap_or_else(|_| "[]".to_string());
        let body = format!(
            "{}\n\nRoute: {}\n\nLast errors:\n{}",
            header, route, context_pretty
        );

        let slack_message = format!("{}\n\nRoute: {}\n\n{}", header, route, context);
        tokio::join!(
            self.send_slack(&slack_message),
            self.send_email("Keep-alive failure", &body),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_configured() {
        let mut config = AlertConfig::default();
        assert!(!config.any_channel_configured());

        config.slack_webhook_url = Some("https://hooks.example.com/T000".to_string());
        assert!(config.any_channel_configured());

        // Email needs all three credentials
        let mut email_only = AlertConfig {
            resend_api_key: Some("re_key".to_string()),
            email_to: Some("ops@example.org".to_string()),
            ..AlertConfig::default()
        };
        assert!(!email_only.any_channel_configured());
        email_only.email_from = Some("alerts@example.org".to_string());
        assert!(email_only.any_channel_configured());
    }

    #[tokio::test]
    async fn test_unconfigured_alerter_is_noop() {
        // No credentials: dispatch must complete without performing any I/O
        let alerter = ChannelAlerter::new(AlertConfig::default());
        alerter
            .send_failure_alert("/internal/keepalive", "invalid token", &[])
            .await;
    }
}
