use crate::config::TransportConfig;
use crate::transport::adapter::{forward, ConnectionInfo, EventSink, TransportAdapter, TransportKind};
use crate::transport::error::TransportError;
use crate::webhook::error::WebhookResult;
use crate::webhook::event::{SocketEnvelope, WebhookEvent};
use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// 解碼推送式信封
pub(crate) fn decode_socket_message(data: &[u8]) -> WebhookResult<WebhookEvent> {
    let mut metadata = Map::new();
    metadata.insert("receivedAt".into(), Value::from(Utc::now().to_rfc3339()));

    SocketEnvelope::parse(data)?.into_event(metadata)
}

/// 推送式 WebSocket 傳輸
///
/// 推送式通道沒有租戶路由鍵，不做過濾。
pub struct SocketTransport {
    config: TransportConfig,
    reader_task: Option<JoinHandle<()>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl SocketTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let url = config.url.trim();
        if url.is_empty() {
            return Err(TransportError::misconfigured("socket", "url is empty"));
        }
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(TransportError::misconfigured(
                "socket",
                format!("url must use ws:// or wss://, got {}", url),
            ));
        }

        Ok(Self {
            config,
            reader_task: None,
            shutdown_tx: None,
        })
    }

    /// 讀取迴圈，直到關閉信號、關閉幀或串流結束
    async fn run_session(
        ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        sink: EventSink,
        ping_interval: Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let (mut write, mut read) = ws_stream.split();
        let mut ping_timer = interval(ping_interval);
        // 跳過立即觸發的第一次
        ping_timer.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Socket session: shutdown signal received");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!("Failed to send close frame: {}", e);
                    }
                    break;
                }

                _ = ping_timer.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        warn!("Socket keep-alive ping failed: {}", e);
                        break;
                    }
                }

                msg = read.next() => {
                    let payload = match msg {
                        Some(Ok(Message::Text(text))) => text.into_bytes(),
                        Some(Ok(Message::Binary(data))) => data,
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                warn!("Failed to answer ping: {}", e);
                            }
                            continue;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("Socket closed by server: {:?}", frame);
                            break;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            error!("Socket error: {}", e);
                            break;
                        }
                        None => {
                            debug!("Socket stream ended");
                            break;
                        }
                    };

                    match decode_socket_message(&payload) {
                        Ok(event) => {
                            if !forward(&sink, event, &mut shutdown_rx).await {
                                debug!("Event sink closed or shutdown requested");
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to decode socket message: {}", e),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl TransportAdapter for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn connect(&mut self, sink: EventSink) -> Result<ConnectionInfo, TransportError> {
        if self.reader_task.is_some() {
            return Err(TransportError::AlreadyConnected);
        }

        let url = self.config.url.trim().to_string();
        info!("Connecting to webhook socket at {}", url);

        let (ws_stream, _) = tokio::time::timeout(self.config.connect_timeout(), connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout)??;

        info!("Connected to webhook socket");

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let ping_interval = self.config.ping_interval();

        let task = tokio::spawn(async move {
            Self::run_session(ws_stream, sink, ping_interval, shutdown_rx).await;
            info!("Socket session ended");
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.reader_task = Some(task);

        Ok(ConnectionInfo::new(TransportKind::Socket, url))
    }

    async fn disconnect(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(()).await;
        }

        if let Some(task) = self.reader_task.take() {
            if let Err(e) = task.await {
                error!("Error waiting for socket task: {}", e);
            }
            info!("Socket transport disconnected");
        }
    }
}
