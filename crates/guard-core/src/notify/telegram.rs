//! Telegram Bot API alert delivery.
//!
//! Messages use HTML parse mode with link previews disabled. Configuration
//! comes from the environment (`TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`,
//! `TELEGRAM_ENABLED`) or a config file section; env vars win.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Alert, AlertKind, Notifier, NotifyError};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
}

impl TelegramConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: std::env::var("TELEGRAM_ENABLED")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
            bot_token: std::env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
            chat_id: std::env::var("TELEGRAM_CHAT_ID").unwrap_or_default(),
        }
    }

    /// Environment values override file-based ones field by field.
    pub fn merged_with_env(mut self) -> Self {
        let env = Self::from_env();
        if !env.bot_token.is_empty() {
            self.bot_token = env.bot_token;
        }
        if !env.chat_id.is_empty() {
            self.chat_id = env.chat_id;
        }
        if env.enabled {
            self.enabled = true;
        }
        self
    }

    pub fn is_configured(&self) -> bool {
        self.enabled && !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramNotifier {
    client: Client,
    config: TelegramConfig,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig, client: Client) -> Self {
        Self {
            client,
            config,
            api_base: TELEGRAM_API_BASE.to_string(),
        }
    }

    /// Point the notifier at a different API host (tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn config(&self) -> &TelegramConfig {
        &self.config
    }

    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        if !self.config.is_configured() {
            return Err(NotifyError::NotConfigured);
        }

        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_base, self.config.bot_token
        );
        let body = SendMessageRequest {
            chat_id: &self.config.chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        let status = response.status();
        let parsed: SendMessageResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        if !parsed.ok {
            return Err(NotifyError::Rejected(
                parsed
                    .description
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            ));
        }

        debug!("Telegram message delivered");
        Ok(())
    }

    /// Send a test message to verify token and chat id.
    pub async fn test_connection(&self) -> Result<(), NotifyError> {
        self.send_message(
            "\u{1F9EA} UptimeGuard test message\n\nIf you can read this, the notification channel is configured correctly.",
        )
        .await
    }
}

pub fn format_failure_message(alert: &Alert) -> String {
    let ts = alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC");
    let headline = match alert.kind {
        AlertKind::FailureUpdate => "\u{1F6A8} <b>Site still down</b>",
        _ => "\u{1F6A8} <b>Site down</b>",
    };

    let mut message = format!(
        "{headline}\n\n\
         \u{2022} Name: {}\n\
         \u{2022} URL: {}\n\
         \u{2022} Consecutive failures: {}\n\n\
         \u{23F0} Checked at: {ts}",
        alert.site_name, alert.site_url, alert.consecutive_failures,
    );

    if let Some(reason) = &alert.reason {
        message.push_str(&format!("\n\n\u{1F50D} <b>Detail:</b> {}", reason));
    }

    message
}

pub fn format_recovery_message(alert: &Alert) -> String {
    let ts = alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC");
    format!(
        "\u{2705} <b>Site recovered</b>\n\n\
         \u{2022} Name: {}\n\
         \u{2022} URL: {}\n\
         \u{2022} Latency: {} ms\n\n\
         \u{23F0} Recovered at: {ts}",
        alert.site_name, alert.site_url, alert.latency_ms,
    )
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        let message = match alert.kind {
            AlertKind::Failure | AlertKind::FailureUpdate => format_failure_message(alert),
            AlertKind::Recovery => format_recovery_message(alert),
        };
        self.send_message(&message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> TelegramConfig {
        TelegramConfig {
            enabled: true,
            bot_token: "123:abc".into(),
            chat_id: "42".into(),
        }
    }

    fn alert(kind: AlertKind) -> Alert {
        Alert {
            id: "a-1".into(),
            timestamp: Utc::now(),
            kind,
            site_name: "Example".into(),
            site_url: "https://example.com".into(),
            consecutive_failures: 5,
            latency_ms: 230,
            reason: Some("connection failed: refused".into()),
        }
    }

    #[test]
    fn unconfigured_when_fields_missing() {
        assert!(!TelegramConfig::default().is_configured());
        assert!(!TelegramConfig {
            enabled: false,
            ..config()
        }
        .is_configured());
        assert!(config().is_configured());
    }

    #[test]
    fn failure_message_includes_signal() {
        let text = format_failure_message(&alert(AlertKind::Failure));
        assert!(text.contains("Example"));
        assert!(text.contains("https://example.com"));
        assert!(text.contains("Consecutive failures: 5"));
        assert!(text.contains("connection failed: refused"));
    }

    #[test]
    fn update_message_is_distinguishable() {
        let text = format_failure_message(&alert(AlertKind::FailureUpdate));
        assert!(text.contains("still down"));
    }

    #[test]
    fn recovery_message_includes_latency() {
        let text = format_recovery_message(&alert(AlertKind::Recovery));
        assert!(text.contains("230 ms"));
        assert!(text.contains("recovered"));
    }

    #[tokio::test]
    async fn notify_posts_to_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendMessage"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": "42",
                "parse_mode": "HTML",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let notifier =
            TelegramNotifier::new(config(), Client::new()).with_api_base(server.uri());
        notifier.notify(&alert(AlertKind::Failure)).await.unwrap();
    }

    #[tokio::test]
    async fn notify_surfaces_api_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "ok": false,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let notifier =
            TelegramNotifier::new(config(), Client::new()).with_api_base(server.uri());
        let err = notifier.notify(&alert(AlertKind::Failure)).await.unwrap_err();
        assert!(matches!(err, NotifyError::Rejected(ref d) if d.contains("chat not found")));
    }

    #[tokio::test]
    async fn notify_without_configuration_is_an_error() {
        let notifier = TelegramNotifier::new(TelegramConfig::default(), Client::new());
        let err = notifier.notify(&alert(AlertKind::Failure)).await.unwrap_err();
        assert!(matches!(err, NotifyError::NotConfigured));
    }
}
