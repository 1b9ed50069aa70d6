use crate::webhook::event::WebhookEvent;
use async_trait::async_trait;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, warn};

/// 匹配器在所屬錄製中的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatcherId(pub(crate) u64);

impl fmt::Display for MatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "matcher#{}", self.0)
    }
}

/// 呼叫端提供的事件斷言
///
/// 所有斷言統一為非同步介面；同步閉包透過 [`from_fn`] 包裝。
/// 回傳 `Err` 或發生 panic 都視為「未滿足」。
#[async_trait]
pub trait Matcher: Send + Sync {
    async fn matches(&self, event: Arc<WebhookEvent>) -> anyhow::Result<bool>;

    /// 診斷訊息中使用的描述
    fn describe(&self) -> String {
        "matcher".to_string()
    }
}

/// 同步閉包匹配器
pub struct FnMatcher<F> {
    name: String,
    predicate: F,
}

#[async_trait]
impl<F> Matcher for FnMatcher<F>
where
    F: Fn(&WebhookEvent) -> bool + Send + Sync,
{
    async fn matches(&self, event: Arc<WebhookEvent>) -> anyhow::Result<bool> {
        Ok((self.predicate)(&event))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// 非同步閉包匹配器
pub struct AsyncFnMatcher<F> {
    name: String,
    predicate: F,
}

#[async_trait]
impl<F, Fut> Matcher for AsyncFnMatcher<F>
where
    F: Fn(Arc<WebhookEvent>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    async fn matches(&self, event: Arc<WebhookEvent>) -> anyhow::Result<bool> {
        (self.predicate)(event).await
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// 包裝同步斷言
pub fn from_fn<F>(predicate: F) -> Arc<dyn Matcher>
where
    F: Fn(&WebhookEvent) -> bool + Send + Sync + 'static,
{
    named_fn("fn matcher", predicate)
}

/// 包裝同步斷言並指定描述
pub fn named_fn<F>(name: impl Into<String>, predicate: F) -> Arc<dyn Matcher>
where
    F: Fn(&WebhookEvent) -> bool + Send + Sync + 'static,
{
    Arc::new(FnMatcher {
        name: name.into(),
        predicate,
    })
}

/// 包裝非同步斷言
pub fn from_async<F, Fut>(predicate: F) -> Arc<dyn Matcher>
where
    F: Fn(Arc<WebhookEvent>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    Arc::new(AsyncFnMatcher {
        name: "async matcher".to_string(),
        predicate,
    })
}

/// 標頭值完全相等（標頭名稱不分大小寫）
pub fn header_equals(name: &str, value: &str) -> Arc<dyn Matcher> {
    let header = name.to_string();
    let expected = value.to_string();
    named_fn(format!("header {} == {:?}", name, value), move |event| {
        event.header(&header) == Some(expected.as_str())
    })
}

/// 內容包含指定文字
pub fn body_contains(needle: &str) -> Arc<dyn Matcher> {
    let text = needle.to_string();
    named_fn(format!("body contains {:?}", needle), move |event| {
        event.body_text().contains(text.as_str())
    })
}

/// 執行一次斷言，把錯誤與 panic 都收斂為 `false`
pub(crate) async fn evaluate(matcher: &Arc<dyn Matcher>, event: Arc<WebhookEvent>) -> bool {
    match AssertUnwindSafe(matcher.matches(event)).catch_unwind().await {
        Ok(Ok(matched)) => matched,
        Ok(Err(e)) => {
            warn!("Matcher '{}' failed, treating as unmatched: {}", matcher.describe(), e);
            false
        }
        Err(_) => {
            error!("Matcher '{}' panicked, treating as unmatched", matcher.describe());
            false
        }
    }
}
