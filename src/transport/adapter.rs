use crate::config::TransportConfig;
use crate::transport::error::TransportError;
use crate::transport::memory::MemoryTransport;
use crate::transport::pubsub::PubSubTransport;
use crate::transport::socket::SocketTransport;
use crate::webhook::event::WebhookEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;

/// 傳輸層把解碼後的事件推入的通道
pub type EventSink = mpsc::Sender<WebhookEvent>;

/// 傳輸類型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// 拉取式發佈/訂閱（RabbitMQ）
    PubSub,
    /// 推送式 WebSocket
    Socket,
    /// 行程內記憶體通道
    Memory,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::PubSub => "pubsub",
            TransportKind::Socket => "socket",
            TransportKind::Memory => "memory",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pubsub" => Ok(TransportKind::PubSub),
            "socket" => Ok(TransportKind::Socket),
            "memory" => Ok(TransportKind::Memory),
            _ => Err(TransportError::UnsupportedType(s.to_string())),
        }
    }
}

/// 連線建立後的句柄資訊
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub kind: TransportKind,
    pub endpoint: String,
    pub connected_at: DateTime<Utc>,
}

impl ConnectionInfo {
    pub fn new(kind: TransportKind, endpoint: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
            connected_at: Utc::now(),
        }
    }
}

/// 外部投遞通道的連接器
///
/// 連線成功後，每一則入站訊息解碼為 [`WebhookEvent`] 並推入 `sink`。
/// `disconnect` 必須是冪等的，且在從未連線或連線失敗後呼叫也安全。
#[async_trait]
pub trait TransportAdapter: Send {
    fn kind(&self) -> TransportKind;

    async fn connect(&mut self, sink: EventSink) -> Result<ConnectionInfo, TransportError>;

    async fn disconnect(&mut self);
}

/// 把事件推入 `sink`，同時等待關閉信號
///
/// 推送成功回傳 `true`；接收端已關閉或收到關閉信號時回傳 `false`，呼叫端應結束迴圈。
pub(crate) async fn forward(sink: &EventSink, event: WebhookEvent, shutdown_rx: &mut mpsc::Receiver<()>) -> bool {
    tokio::select! {
        sent = sink.send(event) => sent.is_ok(),
        _ = shutdown_rx.recv() => false,
    }
}

/// 依配置建立對應的傳輸實作
pub fn create_adapter(config: &TransportConfig) -> Result<Box<dyn TransportAdapter>, TransportError> {
    let kind: TransportKind = config.kind.parse()?;

    let adapter: Box<dyn TransportAdapter> = match kind {
        TransportKind::PubSub => Box::new(PubSubTransport::new(config.clone())?),
        TransportKind::Socket => Box::new(SocketTransport::new(config.clone())?),
        TransportKind::Memory => Box::new(MemoryTransport::new(config.clone())?),
    };

    Ok(adapter)
}
