use crate::config::TransportConfig;
use crate::transport::adapter::{forward, ConnectionInfo, EventSink, TransportAdapter, TransportKind};
use crate::transport::error::TransportError;
use crate::transport::pubsub::decode_pubsub_message;
use crate::webhook::error::{WebhookError, WebhookResult};
use crate::webhook::event::PubSubEnvelope;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 1024;

// 行程內具名通道
static CHANNELS: Lazy<DashMap<String, broadcast::Sender<Vec<u8>>>> = Lazy::new(DashMap::new);

fn named_channel(name: &str) -> broadcast::Sender<Vec<u8>> {
    CHANNELS
        .entry(name.to_string())
        .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
        .clone()
}

/// 向具名記憶體通道發佈拉取式信封
///
/// 沒有訂閱者時訊息直接丟棄，與未綁定佇列的交換機行為一致。
#[derive(Debug, Clone)]
pub struct MemoryPublisher {
    name: String,
    tx: broadcast::Sender<Vec<u8>>,
}

impl MemoryPublisher {
    pub fn new(channel: &str) -> Self {
        Self {
            name: channel.to_string(),
            tx: named_channel(channel),
        }
    }

    pub fn channel(&self) -> &str {
        &self.name
    }

    /// 發佈原始位元組，回傳收到訊息的訂閱者數量
    pub fn publish_raw(&self, data: impl Into<Vec<u8>>) -> usize {
        self.tx.send(data.into()).unwrap_or(0)
    }

    pub fn publish(&self, envelope: &PubSubEnvelope) -> WebhookResult<usize> {
        let data = serde_json::to_vec(envelope).map_err(|e| WebhookError::Envelope(e.to_string()))?;
        Ok(self.publish_raw(data))
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// 行程內記憶體傳輸
///
/// 訂閱 `url` 指定的具名通道，套用與拉取式傳輸相同的信封解碼與租戶過濾。
pub struct MemoryTransport {
    config: TransportConfig,
    reader_task: Option<JoinHandle<()>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl MemoryTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        if config.url.trim().is_empty() {
            return Err(TransportError::misconfigured("memory", "channel name (url) is empty"));
        }

        Ok(Self {
            config,
            reader_task: None,
            shutdown_tx: None,
        })
    }

    async fn relay(
        mut rx: broadcast::Receiver<Vec<u8>>,
        sink: EventSink,
        webhook_id_prefix: String,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut sequence: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,

                received = rx.recv() => {
                    let data = match received {
                        Ok(data) => data,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Memory transport lagged, {} message(s) skipped", skipped);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    };

                    sequence += 1;
                    let mut metadata = Map::new();
                    metadata.insert("messageId".into(), Value::from(sequence.to_string()));
                    metadata.insert("receivedAt".into(), Value::from(Utc::now().to_rfc3339()));

                    match decode_pubsub_message(&data, &webhook_id_prefix, metadata) {
                        Ok(Some(event)) => {
                            if !forward(&sink, event, &mut shutdown_rx).await {
                                debug!("Event sink closed or shutdown requested");
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Failed to decode memory message: {}", e),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl TransportAdapter for MemoryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    async fn connect(&mut self, sink: EventSink) -> Result<ConnectionInfo, TransportError> {
        if self.reader_task.is_some() {
            return Err(TransportError::AlreadyConnected);
        }

        let channel = self.config.url.trim().to_string();
        let rx = named_channel(&channel).subscribe();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let prefix = self.config.webhook_id.clone();

        self.reader_task = Some(tokio::spawn(Self::relay(rx, sink, prefix, shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);

        info!("Subscribed to memory channel {}", channel);
        Ok(ConnectionInfo::new(TransportKind::Memory, format!("memory:{}", channel)))
    }

    async fn disconnect(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(()).await;
        }
        if let Some(task) = self.reader_task.take() {
            let _ = task.await;
            debug!("Memory transport disconnected from {}", self.config.url);
        }
    }
}
