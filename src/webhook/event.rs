use crate::webhook::error::{WebhookError, WebhookResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::HashMap;

/// 一次 webhook 投遞
///
/// 建立後不可變。`headers` 的鍵一律轉為小寫，
/// `raw_headers` 保留傳輸層給出的原始大小寫與多值。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WebhookEvent {
    body: Vec<u8>,
    headers: HashMap<String, String>,
    raw_headers: HashMap<String, Vec<String>>,
    metadata: Map<String, Value>,
}

impl WebhookEvent {
    pub fn new(
        body: impl Into<Vec<u8>>,
        headers: HashMap<String, String>,
        raw_headers: HashMap<String, Vec<String>>,
        metadata: Map<String, Value>,
    ) -> Self {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();

        Self {
            body: body.into(),
            headers,
            raw_headers,
            metadata,
        }
    }

    /// 只有內容的事件，主要用於測試
    pub fn from_body(body: impl Into<Vec<u8>>) -> Self {
        Self::new(body, HashMap::new(), HashMap::new(), Map::new())
    }

    /// 附加一個標頭（建構階段使用）
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// 附加一筆傳輸層中繼資料（建構階段使用）
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// 以 UTF-8 解讀內容，無效位元組以替代字元表示
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// 將內容解析為 JSON
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// 不分大小寫查詢標頭
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn raw_headers(&self) -> &HashMap<String, Vec<String>> {
        &self.raw_headers
    }

    /// 不分大小寫查詢原始標頭的所有值
    pub fn raw_header(&self, name: &str) -> Option<&[String]> {
        self.raw_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

/// 推送式傳輸（WebSocket）的信封格式
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketEnvelope {
    #[serde(default)]
    pub body_is_hex: bool,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub raw_headers: HashMap<String, Vec<String>>,
}

impl SocketEnvelope {
    /// 解析 JSON 信封
    pub fn parse(data: &[u8]) -> WebhookResult<Self> {
        serde_json::from_slice(data).map_err(|e| WebhookError::Envelope(e.to_string()))
    }

    /// 解碼內容
    pub fn decode_body(&self) -> WebhookResult<Vec<u8>> {
        if self.body_is_hex {
            hex::decode(&self.body)
                .map_err(|e| WebhookError::Envelope(format!("body is not valid hex: {}", e)))
        } else {
            Ok(self.body.as_bytes().to_vec())
        }
    }

    /// 轉換為事件，附帶傳輸層中繼資料
    pub fn into_event(self, metadata: Map<String, Value>) -> WebhookResult<WebhookEvent> {
        let body = self.decode_body()?;
        Ok(WebhookEvent::new(body, self.headers, self.raw_headers, metadata))
    }
}

/// 拉取式發佈/訂閱傳輸的信封格式
///
/// 比推送式多一個 `webhookId` 路由鍵，用於租戶過濾。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubEnvelope {
    pub webhook_id: String,
    #[serde(flatten)]
    pub payload: SocketEnvelope,
}

impl PubSubEnvelope {
    /// 以十六進位編碼內容建立信封（發送端使用）
    pub fn encode(webhook_id: &str, body: &[u8], headers: HashMap<String, String>) -> Self {
        let raw_headers = headers
            .iter()
            .map(|(name, value)| (name.clone(), vec![value.clone()]))
            .collect();

        Self {
            webhook_id: webhook_id.to_string(),
            payload: SocketEnvelope {
                body_is_hex: true,
                body: hex::encode(body),
                headers,
                raw_headers,
            },
        }
    }

    /// 解析 JSON 信封
    pub fn parse(data: &[u8]) -> WebhookResult<Self> {
        serde_json::from_slice(data).map_err(|e| WebhookError::Envelope(e.to_string()))
    }

    /// 路由鍵是否以設定的前綴開頭
    pub fn matches_webhook_id(&self, prefix: &str) -> bool {
        self.webhook_id.starts_with(prefix)
    }

    pub fn into_event(self, metadata: Map<String, Value>) -> WebhookResult<WebhookEvent> {
        self.payload.into_event(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_headers_are_case_normalized() {
        let mut headers = HashMap::new();
        headers.insert("X-Up-Signature".to_string(), "sha256=00".to_string());
        let mut raw = HashMap::new();
        raw.insert("X-Up-Signature".to_string(), vec!["sha256=00".to_string()]);

        let event = WebhookEvent::new("{}", headers, raw, Map::new());

        assert!(event.headers().contains_key("x-up-signature"));
        assert_eq!(event.header("X-UP-SIGNATURE"), Some("sha256=00"));
        assert_eq!(
            event.raw_header("x-up-signature"),
            Some(&["sha256=00".to_string()][..])
        );
        assert!(event.raw_headers().contains_key("X-Up-Signature"));
    }

    #[test]
    fn test_pubsub_envelope_hex_body() {
        let json = br#"{
            "webhookId": "tenant-a-123",
            "bodyIsHex": true,
            "body": "7b22666f6f223a317d",
            "headers": {"Content-Type": "application/json"},
            "rawHeaders": {"Content-Type": ["application/json"]}
        }"#;

        let envelope = PubSubEnvelope::parse(json).unwrap();
        assert!(envelope.matches_webhook_id("tenant-a"));
        assert!(!envelope.matches_webhook_id("tenant-b"));

        let event = envelope.into_event(Map::new()).unwrap();
        assert_eq!(event.body_text(), r#"{"foo":1}"#);
        assert_eq!(event.header("content-type"), Some("application/json"));

        let value: serde_json::Value = event.body_json().unwrap();
        assert_eq!(value["foo"], 1);
    }

    #[test]
    fn test_socket_envelope_plain_body_and_defaults() {
        let envelope = SocketEnvelope::parse(br#"{"body": "hello"}"#).unwrap();
        assert!(!envelope.body_is_hex);

        let event = envelope
            .into_event(Map::new())
            .unwrap()
            .with_metadata("transport", "socket");
        assert_eq!(event.body(), b"hello");
        assert!(event.headers().is_empty());
        assert_eq!(event.metadata_value("transport"), Some(&Value::from("socket")));
    }

    #[test]
    fn test_invalid_hex_is_envelope_error() {
        let envelope = SocketEnvelope {
            body_is_hex: true,
            body: "zz".into(),
            ..Default::default()
        };
        assert_matches!(envelope.decode_body(), Err(WebhookError::Envelope(_)));
    }

    #[test]
    fn test_pubsub_envelope_requires_webhook_id() {
        assert_matches!(
            PubSubEnvelope::parse(br#"{"body": "x"}"#),
            Err(WebhookError::Envelope(_))
        );
    }
}
