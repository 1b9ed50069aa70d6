use crate::webhook::error::WebhookError;
use thiserror::Error;

/// 傳輸層錯誤類型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Unsupported transport type: {0}")]
    UnsupportedType(String),

    #[error("Misconfigured {kind} transport: {reason}")]
    Misconfigured { kind: String, reason: String },

    #[error("Lapin error: {0}")]
    Lapin(#[from] lapin::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_lapin::PoolError),

    #[error("Connection pool build error: {0}")]
    PoolBuild(#[from] deadpool::managed::BuildError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection timeout")]
    Timeout,

    #[error("Transport is already connected")]
    AlreadyConnected,
}

impl TransportError {
    pub(crate) fn misconfigured(kind: &str, reason: impl Into<String>) -> Self {
        TransportError::Misconfigured {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}

/// 在監聽器邊界把傳輸錯誤轉為可複製的錄製錯誤
impl From<TransportError> for WebhookError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::UnsupportedType(kind) => WebhookError::TransportInit(kind),
            TransportError::Misconfigured { kind, reason } => {
                WebhookError::TransportInit(format!("{} ({})", kind, reason))
            }
            other @ TransportError::AlreadyConnected => WebhookError::Transport(other.to_string()),
            other => WebhookError::TransportConnect(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_type_maps_to_init_error() {
        let err: WebhookError = TransportError::UnsupportedType("smtp".into()).into();
        assert_eq!(err, WebhookError::TransportInit("smtp".into()));
    }

    #[test]
    fn test_misconfigured_names_kind() {
        let err: WebhookError = TransportError::misconfigured("pubsub", "queue is empty").into();
        assert_eq!(err, WebhookError::TransportInit("pubsub (queue is empty)".into()));
    }

    #[test]
    fn test_timeout_maps_to_connect_error() {
        let err: WebhookError = TransportError::Timeout.into();
        assert_eq!(err, WebhookError::TransportConnect("Connection timeout".into()));
    }
}
