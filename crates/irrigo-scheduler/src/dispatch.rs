//! Outbound side effects: SMS to farm owners and platform notifications.
//! Both are best effort: callers log failures and carry on.

use async_trait::async_trait;
use irrigo_core::config::{NotificationConfig, SmsConfig};
use irrigo_core::{IrrigationError, Result, ScheduleView};
use std::sync::Arc;

/// Sends a text message to a phone number.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, phone: &str, message: &str) -> Result<()>;
}

/// SMS via an HTTP gateway: POST `{to, from, message}` with a bearer key.
pub struct HttpSmsSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    sender: String,
    timeout: std::time::Duration,
}

impl HttpSmsSender {
    pub fn new(config: &SmsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            sender: config.sender.clone(),
            timeout: std::time::Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl SmsSender for HttpSmsSender {
    async fn send(&self, phone: &str, message: &str) -> Result<()> {
        let mut req = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "to": phone,
                "from": self.sender,
                "message": message,
            }))
            .timeout(self.timeout);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| IrrigationError::Dispatch(format!("SMS send failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!("✅ SMS sent to {}", mask_phone(phone));
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(IrrigationError::Dispatch(format!("SMS gateway error {status}: {body}")))
        }
    }
}

/// Used when SMS is disabled: logs the message and reports success.
pub struct LogSmsSender;

#[async_trait]
impl SmsSender for LogSmsSender {
    async fn send(&self, phone: &str, message: &str) -> Result<()> {
        tracing::info!("📵 SMS disabled, would send to {}: {}", mask_phone(phone), message);
        Ok(())
    }
}

/// Pick the SMS sender for the given config.
pub fn sms_sender_from_config(config: &SmsConfig) -> Arc<dyn SmsSender> {
    if config.enabled && !config.endpoint.is_empty() {
        Arc::new(HttpSmsSender::new(config))
    } else {
        if config.enabled {
            tracing::warn!("⚠️ sms.enabled is set but sms.endpoint is empty; SMS will only be logged");
        }
        Arc::new(LogSmsSender)
    }
}

/// Keep the last 4 digits only.
fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().collect();
    if digits.len() <= 4 {
        return "••••".to_string();
    }
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("••••{tail}")
}

pub fn due_soon_sms(view: &ScheduleView, minutes_until: i64) -> String {
    format!(
        "Irrigation reminder: {} at {} is due in {} minutes ({} min run).",
        view.crop_name, view.farm_name, minutes_until, view.schedule.duration_minutes
    )
}

pub fn overdue_sms(view: &ScheduleView, hours_overdue: i64) -> String {
    format!(
        "Irrigation overdue: {} at {} was due {} hour(s) ago. Please irrigate and mark it complete.",
        view.crop_name, view.farm_name, hours_overdue
    )
}

// ─── Platform notifications ───────────────────────────────

/// Operating-system / browser level notification. Best effort, no delivery guarantee.
pub trait PlatformNotifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Emits platform notifications as structured log events.
pub struct TracingNotifier;

impl PlatformNotifier for TracingNotifier {
    fn notify(&self, title: &str, body: &str) {
        tracing::info!(target: "irrigo::platform", title, body, "🔔 platform notification");
    }
}

/// Drops everything; used when platform notifications are not permitted.
pub struct NoopNotifier;

impl PlatformNotifier for NoopNotifier {
    fn notify(&self, _title: &str, _body: &str) {}
}

pub fn platform_notifier_from_config(config: &NotificationConfig) -> Arc<dyn PlatformNotifier> {
    if config.platform_enabled {
        Arc::new(TracingNotifier)
    } else {
        Arc::new(NoopNotifier)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every send; fails for numbers listed in `fail_for`.
    #[derive(Default)]
    pub(crate) struct RecordingSms {
        pub sent: Mutex<Vec<(String, String)>>,
        pub fail_for: Vec<String>,
    }

    #[async_trait]
    impl SmsSender for RecordingSms {
        async fn send(&self, phone: &str, message: &str) -> Result<()> {
            self.sent.lock().unwrap().push((phone.to_string(), message.to_string()));
            if self.fail_for.iter().any(|p| p == phone) {
                return Err(IrrigationError::Dispatch("gateway down".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+254700123456"), "••••3456");
        assert_eq!(mask_phone("123"), "••••");
    }

    #[test]
    fn test_sender_selection() {
        let mut config = SmsConfig::default();
        // Disabled → log sender; just make sure building it doesn't panic.
        let _ = sms_sender_from_config(&config);
        config.enabled = true;
        config.endpoint = "http://127.0.0.1:9/send".into();
        let _ = sms_sender_from_config(&config);
    }

    #[tokio::test]
    async fn test_log_sender_succeeds() {
        assert!(LogSmsSender.send("+15550001111", "hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_http_sender_reports_connection_failure() {
        let config = SmsConfig {
            enabled: true,
            endpoint: "http://127.0.0.1:9/send".into(),
            timeout_secs: 1,
            ..SmsConfig::default()
        };
        let err = HttpSmsSender::new(&config).send("+15550001111", "hi").await.unwrap_err();
        assert!(matches!(err, IrrigationError::Dispatch(_)));
    }
}
