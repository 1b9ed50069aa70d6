use thiserror::Error;

/// Webhook 錄製引擎的錯誤類型
///
/// 所有變體只攜帶字串資訊，因此可以 `Clone`，
/// 讓同一個就緒結果可以被任意數量的等待者觀察。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    /// 不支援或設定錯誤的傳輸類型
    #[error("Unsupported or misconfigured transport type: {0}")]
    TransportInit(String),

    #[error("Transport connection failed: {0}")]
    TransportConnect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// 等待期限內仍有匹配器未被滿足
    #[error("Timed out after {timeout_ms}ms waiting for webhooks: {unsatisfied} of {total} matchers unsatisfied")]
    MatchTimeout {
        timeout_ms: u64,
        unsatisfied: usize,
        total: usize,
    },

    #[error("Invalid webhook envelope: {0}")]
    Envelope(String),

    #[error("Listener has been finalized")]
    ListenerClosed,
}

impl WebhookError {
    /// 是否為可在呼叫端恢復的逾時錯誤
    pub fn is_timeout(&self) -> bool {
        matches!(self, WebhookError::MatchTimeout { .. })
    }
}

/// Webhook 結果類型別名
pub type WebhookResult<T> = Result<T, WebhookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_counts() {
        let err = WebhookError::MatchTimeout {
            timeout_ms: 50,
            unsatisfied: 1,
            total: 2,
        };
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "Timed out after 50ms waiting for webhooks: 1 of 2 matchers unsatisfied"
        );
    }

    #[test]
    fn test_transport_init_names_type() {
        let err = WebhookError::TransportInit("carrier-pigeon".into());
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("carrier-pigeon"));
    }
}
