use crate::config::validation::{ValidationError, ValidationUtils, Validator};
use crate::webhook::recording::ConsumptionPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 支援的傳輸類型字串
pub const SUPPORTED_TRANSPORTS: &[&str] = &["pubsub", "socket", "memory"];

/// 應用程序配置結構
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

impl Validator for ApplicationConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        self.log.validate()?;
        self.webhook.validate()?;

        Ok(())
    }
}

/// 日誌配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Validator for LogConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::one_of(
            &self.level,
            &["trace", "debug", "info", "warn", "error"],
            "log.level",
        )?;
        ValidationUtils::one_of(&self.format, &["pretty", "json"], "log.format")?;

        Ok(())
    }
}

/// Webhook 錄製配置
///
/// 沒有 `transport` 區段時，所有錄製都使用空錄製。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub transport: Option<TransportConfig>,
    #[serde(default)]
    pub matching: MatchingConfig,
    /// `X-Up-Signature` 使用的共享密鑰
    #[serde(default)]
    pub signing_secret: Option<String>,
}

impl WebhookConfig {
    /// 是否設定了投遞通道
    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }
}

impl Validator for WebhookConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(transport) = &self.transport {
            transport.validate()?;
        }
        self.matching.validate()?;

        if let Some(secret) = &self.signing_secret {
            ValidationUtils::not_empty(secret, "webhook.signing_secret")?;
        }

        Ok(())
    }
}

/// 匹配配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default)]
    pub consumption: ConsumptionPolicy,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            consumption: ConsumptionPolicy::default(),
            default_timeout_ms: default_timeout_ms(),
        }
    }
}

impl MatchingConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Validator for MatchingConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::in_range(self.default_timeout_ms, 1, 600_000, "webhook.matching.default_timeout_ms")?;

        Ok(())
    }
}

/// 傳輸配置
///
/// `type` 保留原始字串，不支援的類型在監聽器就緒時才以錯誤呈現。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// pubsub / socket / memory
    #[serde(rename = "type")]
    pub kind: String,
    /// AMQP URL、WebSocket URL 或記憶體通道名稱
    #[serde(default)]
    pub url: String,
    /// 租戶路由鍵前綴，僅拉取式與記憶體傳輸使用
    #[serde(default)]
    pub webhook_id: String,
    #[serde(default)]
    pub queue: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub routing_key: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default)]
    pub auto_ack: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// 傳輸層到監聽器之間的通道容量
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    1024
}

impl TransportConfig {
    fn with_kind(kind: &str, url: &str) -> Self {
        Self {
            kind: kind.to_string(),
            url: url.to_string(),
            webhook_id: String::new(),
            queue: String::new(),
            exchange: String::new(),
            routing_key: String::new(),
            prefetch_count: default_prefetch_count(),
            auto_ack: false,
            connect_timeout_secs: default_connect_timeout_secs(),
            ping_interval_secs: default_ping_interval_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }

    /// 拉取式發佈/訂閱傳輸（RabbitMQ）
    pub fn pubsub(url: &str, queue: &str, webhook_id: &str) -> Self {
        Self {
            queue: queue.to_string(),
            webhook_id: webhook_id.to_string(),
            ..Self::with_kind("pubsub", url)
        }
    }

    /// 推送式 WebSocket 傳輸
    pub fn socket(url: &str) -> Self {
        Self::with_kind("socket", url)
    }

    /// 行程內記憶體傳輸，`channel` 為通道名稱
    pub fn memory(channel: &str, webhook_id: &str) -> Self {
        Self {
            webhook_id: webhook_id.to_string(),
            ..Self::with_kind("memory", channel)
        }
    }

    /// 任意類型字串，主要用於測試不支援的類型
    pub fn custom(kind: &str, url: &str) -> Self {
        Self::with_kind(kind, url)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

impl Validator for TransportConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::not_empty(&self.kind, "webhook.transport.type")?;
        ValidationUtils::one_of(&self.kind, SUPPORTED_TRANSPORTS, "webhook.transport.type")?;
        ValidationUtils::not_empty(&self.url, "webhook.transport.url")?;

        if self.kind.eq_ignore_ascii_case("pubsub") {
            ValidationUtils::not_empty(&self.queue, "webhook.transport.queue")?;
            ValidationUtils::check_dependency(
                !self.routing_key.is_empty(),
                !self.exchange.is_empty(),
                "webhook.transport.routing_key",
                "webhook.transport.exchange",
            )?;
            ValidationUtils::in_range(self.prefetch_count, 1, 1000, "webhook.transport.prefetch_count")?;
        }

        ValidationUtils::in_range(self.connect_timeout_secs, 1, 300, "webhook.transport.connect_timeout_secs")?;
        ValidationUtils::in_range(self.ping_interval_secs, 1, 3600, "webhook.transport.ping_interval_secs")?;
        ValidationUtils::in_range(self.channel_capacity, 1, 100_000, "webhook.transport.channel_capacity")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults_are_valid() {
        let config = ApplicationConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.webhook.is_enabled());
        assert_eq!(config.webhook.matching.consumption, ConsumptionPolicy::Exclusive);
    }

    #[test]
    fn test_pubsub_requires_queue() {
        let mut transport = TransportConfig::pubsub("amqp://localhost:5672/%2f", "", "tenant");
        assert_matches!(transport.validate(), Err(ValidationError::MissingField(field)) if field == "webhook.transport.queue");

        transport.queue = "webhooks".into();
        assert!(transport.validate().is_ok());

        transport.routing_key = "webhook.#".into();
        assert_matches!(transport.validate(), Err(ValidationError::DependencyError { .. }));
    }

    #[test]
    fn test_unsupported_type_fails_validation() {
        let transport = TransportConfig::custom("carrier-pigeon", "coop://roof");
        assert_matches!(transport.validate(), Err(ValidationError::InvalidValue(_)));
    }

    #[test]
    fn test_transport_deserializes_type_field() {
        let transport: TransportConfig = serde_json::from_value(serde_json::json!({
            "type": "socket",
            "url": "ws://localhost:9000/webhooks"
        }))
        .unwrap();

        assert_eq!(transport.kind, "socket");
        assert_eq!(transport.channel_capacity, 1024);
        assert_eq!(transport.ping_interval(), Duration::from_secs(30));
        assert!(transport.validate().is_ok());
    }
}
