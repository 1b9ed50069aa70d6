use crate::webhook::error::WebhookResult;
use crate::webhook::matcher::{Matcher, MatcherId};
use crate::webhook::recording::EventRecording;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 未設定投遞通道時使用的空錄製
///
/// 接受匹配器但從不評估，`are_all_matched` 一律立即回傳 `true`。
#[derive(Debug, Default)]
pub struct NullRecording {
    next_matcher_id: AtomicU64,
}

impl NullRecording {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventRecording for NullRecording {
    fn add_matcher(&self, _matcher: Arc<dyn Matcher>) -> MatcherId {
        MatcherId(self.next_matcher_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn are_all_matched(&self, _timeout: Duration) -> WebhookResult<bool> {
        Ok(true)
    }

    fn stop(&self) {}
}
