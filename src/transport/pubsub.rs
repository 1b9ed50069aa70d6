use crate::config::TransportConfig;
use crate::transport::adapter::{forward, ConnectionInfo, EventSink, TransportAdapter, TransportKind};
use crate::transport::error::TransportError;
use crate::webhook::error::WebhookResult;
use crate::webhook::event::{PubSubEnvelope, WebhookEvent};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_lapin::{Manager, Pool};
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, ConnectionProperties, Consumer, ExchangeKind,
};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 解碼拉取式信封並套用租戶過濾
///
/// 路由鍵不符合前綴時回傳 `Ok(None)`。
pub(crate) fn decode_pubsub_message(
    data: &[u8],
    webhook_id_prefix: &str,
    metadata: Map<String, Value>,
) -> WebhookResult<Option<WebhookEvent>> {
    let envelope = PubSubEnvelope::parse(data)?;

    if !envelope.matches_webhook_id(webhook_id_prefix) {
        debug!(
            "Dropping message for webhook id {} (expected prefix {})",
            envelope.webhook_id, webhook_id_prefix
        );
        return Ok(None);
    }

    envelope.into_event(metadata).map(Some)
}

/// 拉取式發佈/訂閱傳輸（RabbitMQ）
///
/// 連線時宣告佇列（有交換機時綁定），以唯一的消費者標籤消費訊息。
/// 每一則投遞都會被確認，包括被過濾或格式錯誤的訊息，以避免無限重投。
pub struct PubSubTransport {
    config: TransportConfig,
    pool: Option<Pool>,
    consumer_task: Option<JoinHandle<()>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl PubSubTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        if config.url.trim().is_empty() {
            return Err(TransportError::misconfigured("pubsub", "url is empty"));
        }
        if config.queue.trim().is_empty() {
            return Err(TransportError::misconfigured("pubsub", "queue is empty"));
        }

        Ok(Self {
            config,
            pool: None,
            consumer_task: None,
            shutdown_tx: None,
        })
    }

    /// 創建單一連線的連接池
    fn build_pool(&self) -> Result<Pool, TransportError> {
        info!("Creating RabbitMQ connection pool for queue {}", self.config.queue);

        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current());
        let manager = Manager::new(self.config.url.clone(), properties);

        Ok(Pool::builder(manager).max_size(1).build()?)
    }

    /// 宣告佇列並開始消費
    async fn open_consumer(&self, pool: &Pool) -> Result<(Channel, Consumer), TransportError> {
        let conn = pool.get().await?;
        let channel = conn.create_channel().await?;

        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await?;

        if !self.config.exchange.is_empty() {
            debug!("Declaring exchange: {}", self.config.exchange);

            channel
                .exchange_declare(
                    &self.config.exchange,
                    ExchangeKind::Topic,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..ExchangeDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;
        }

        debug!("Declaring queue: {}", self.config.queue);

        channel
            .queue_declare(
                &self.config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        if !self.config.exchange.is_empty() {
            let routing_key = if self.config.routing_key.is_empty() {
                "#"
            } else {
                self.config.routing_key.as_str()
            };

            debug!(
                "Binding queue {} to exchange {} with routing key {}",
                self.config.queue, self.config.exchange, routing_key
            );

            channel
                .queue_bind(
                    &self.config.queue,
                    &self.config.exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        let consumer_tag = format!("webhook-recorder-{}", Uuid::new_v4());
        debug!("Starting consumer with tag: {}", consumer_tag);

        let consumer = channel
            .basic_consume(
                &self.config.queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: self.config.auto_ack,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok((channel, consumer))
    }

    /// 處理消息消費邏輯
    async fn consume_deliveries(
        mut consumer: Consumer,
        channel: Channel,
        sink: EventSink,
        webhook_id_prefix: String,
        auto_ack: bool,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Received shutdown signal");
                    break;
                }

                delivery_result = consumer.next() => {
                    match delivery_result {
                        Some(Ok(delivery)) => {
                            let delivery_tag = delivery.delivery_tag;
                            debug!("Received message with delivery_tag: {}", delivery_tag);

                            let message_id = delivery
                                .properties
                                .message_id()
                                .as_ref()
                                .map(|id| id.as_str().to_string())
                                .unwrap_or_else(|| delivery_tag.to_string());

                            let mut metadata = Map::new();
                            metadata.insert("messageId".into(), Value::from(message_id));
                            metadata.insert("deliveryTag".into(), Value::from(delivery_tag));
                            metadata.insert("routingKey".into(), Value::from(delivery.routing_key.as_str()));
                            metadata.insert("receivedAt".into(), Value::from(Utc::now().to_rfc3339()));

                            let mut stop = false;
                            match decode_pubsub_message(&delivery.data, &webhook_id_prefix, metadata) {
                                Ok(Some(event)) => {
                                    if !forward(&sink, event, &mut shutdown_rx).await {
                                        debug!("Event sink closed or shutdown requested");
                                        stop = true;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    warn!("Failed to decode message {}: {}", delivery_tag, e);
                                }
                            }

                            // 確認所有訊息，以避免無限重試
                            if !auto_ack {
                                if let Err(e) = channel.basic_ack(delivery_tag, BasicAckOptions::default()).await {
                                    error!("Failed to acknowledge message: {}", e);
                                }
                            }

                            if stop {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            error!("Error receiving message: {}", e);
                        }
                        None => {
                            debug!("Consumer channel closed");
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = channel.close(200, "webhook recorder shutdown").await {
            debug!("Channel close failed: {}", e);
        }
    }
}

#[async_trait]
impl TransportAdapter for PubSubTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::PubSub
    }

    async fn connect(&mut self, sink: EventSink) -> Result<ConnectionInfo, TransportError> {
        if self.consumer_task.is_some() {
            warn!("Consumer is already running");
            return Err(TransportError::AlreadyConnected);
        }

        let pool = self.build_pool()?;
        let (channel, consumer) =
            tokio::time::timeout(self.config.connect_timeout(), self.open_consumer(&pool))
                .await
                .map_err(|_| TransportError::Timeout)??;

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let queue = self.config.queue.clone();
        let webhook_id_prefix = self.config.webhook_id.clone();
        let auto_ack = self.config.auto_ack;

        let task = tokio::spawn(async move {
            info!("Consumer started for queue: {}", queue);

            Self::consume_deliveries(consumer, channel, sink, webhook_id_prefix, auto_ack, shutdown_rx).await;

            info!("Consumer stopped for queue: {}", queue);
        });

        self.pool = Some(pool);
        self.shutdown_tx = Some(shutdown_tx);
        self.consumer_task = Some(task);

        Ok(ConnectionInfo::new(
            TransportKind::PubSub,
            format!("queue:{}", self.config.queue),
        ))
    }

    async fn disconnect(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            debug!("Sending shutdown signal to consumer");
            let _ = shutdown_tx.send(()).await;
        }

        if let Some(task) = self.consumer_task.take() {
            debug!("Waiting for consumer task to complete");
            if let Err(e) = task.await {
                error!("Error waiting for consumer task: {}", e);
            }
        }

        if let Some(pool) = self.pool.take() {
            pool.close();
            info!("RabbitMQ connection closed for queue: {}", self.config.queue);
        }
    }
}
