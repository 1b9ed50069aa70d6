#![allow(dead_code)]

use std::collections::HashMap;
use uuid::Uuid;
use webhook_recorder::config::TransportConfig;
use webhook_recorder::transport::MemoryPublisher;
use webhook_recorder::webhook::{Listener, ListenerOptions, PubSubEnvelope};

/// 每個測試使用獨立的記憶體通道，避免平行測試互相干擾
pub fn unique_channel(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// 建立已連線的記憶體監聽器與對應的發佈端
pub async fn memory_listener(webhook_id: &str, options: ListenerOptions) -> (Listener, MemoryPublisher) {
    let channel = unique_channel("it");
    let listener = Listener::new(TransportConfig::memory(&channel, webhook_id), options);

    listener
        .ready()
        .await
        .expect("Memory transport should connect");

    (listener, MemoryPublisher::new(&channel))
}

/// 發佈一則事件
pub fn publish(publisher: &MemoryPublisher, webhook_id: &str, body: &str, headers: &[(&str, &str)]) {
    let headers: HashMap<String, String> = headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();

    let delivered = publisher
        .publish(&PubSubEnvelope::encode(webhook_id, body.as_bytes(), headers))
        .expect("Envelope should serialize");
    assert_eq!(delivered, 1, "listener should be subscribed");
}

/// 輪詢直到條件成立，最多兩秒
pub async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Condition was not reached in time");
}
