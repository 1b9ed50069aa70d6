use crate::webhook::error::{WebhookError, WebhookResult};
use crate::webhook::event::WebhookEvent;
use crate::webhook::listener::RecordingRegistry;
use crate::webhook::matcher::{evaluate, Matcher, MatcherId};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 錄製會話的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordingId(Uuid);

impl RecordingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 單一事件可以滿足多少個匹配器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumptionPolicy {
    /// 先匹配者得：一個事件在同一錄製中最多滿足一個匹配器
    #[default]
    Exclusive,
    /// 一個事件可以同時滿足所有與它匹配的匹配器
    Shared,
}

/// 匹配器的診斷快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatcherState {
    pub id: MatcherId,
    pub description: String,
    pub satisfied: bool,
    /// 滿足該匹配器的事件在日誌中的位置
    pub satisfied_by: Option<usize>,
}

/// 錄製的共同介面
///
/// 實際錄製與空錄製共用同一個呼叫形狀。
#[async_trait]
pub trait EventRecording: Send + Sync {
    fn add_matcher(&self, matcher: Arc<dyn Matcher>) -> MatcherId;

    /// 等待所有匹配器被滿足；逾時回傳 [`WebhookError::MatchTimeout`]
    async fn are_all_matched(&self, timeout: Duration) -> WebhookResult<bool>;

    fn stop(&self);
}

struct MatcherSlot {
    id: MatcherId,
    matcher: Arc<dyn Matcher>,
    satisfied_by: Option<usize>,
}

impl MatcherSlot {
    fn is_satisfied(&self) -> bool {
        self.satisfied_by.is_some()
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

struct RecordedEvent {
    event: Arc<WebhookEvent>,
    consumed: bool,
}

#[derive(Default)]
struct RecordingState {
    events: Vec<RecordedEvent>,
    matchers: Vec<MatcherSlot>,
    waiters: Vec<oneshot::Sender<()>>,
    next_matcher_id: u64,
    stopped: bool,
}

impl RecordingState {
    fn all_satisfied(&self) -> bool {
        self.matchers.iter().all(MatcherSlot::is_satisfied)
    }

    fn unsatisfied_count(&self) -> usize {
        self.matchers.iter().filter(|m| !m.is_satisfied()).count()
    }
}

pub(crate) struct RecordingInner {
    id: RecordingId,
    policy: ConsumptionPolicy,
    state: Mutex<RecordingState>,
    // 同一錄製的匹配流程依序執行
    pass_lock: tokio::sync::Mutex<()>,
    registry: Option<Weak<RecordingRegistry>>,
}

/// 一個測試場景的錄製會話
///
/// 保存按到達順序排列的事件日誌與一組匹配器，並在全部滿足時
/// 喚醒 [`Recording::are_all_matched`] 的等待者。複製句柄共享同一個會話。
#[derive(Clone)]
pub struct Recording {
    inner: Arc<RecordingInner>,
}

impl fmt::Debug for Recording {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Recording")
            .field("id", &self.inner.id)
            .field("policy", &self.inner.policy)
            .field("events", &state.events.len())
            .field("matchers", &state.matchers.len())
            .field("unsatisfied", &state.unsatisfied_count())
            .field("stopped", &state.stopped)
            .finish()
    }
}

impl Recording {
    /// 建立不屬於任何監聽器的錄製，事件需由呼叫端透過 `add_record` 提供
    pub fn detached(policy: ConsumptionPolicy) -> Self {
        Self::build(policy, None)
    }

    pub(crate) fn attached(policy: ConsumptionPolicy, registry: Weak<RecordingRegistry>) -> Self {
        Self::build(policy, Some(registry))
    }

    fn build(policy: ConsumptionPolicy, registry: Option<Weak<RecordingRegistry>>) -> Self {
        Self {
            inner: Arc::new(RecordingInner {
                id: RecordingId::new(),
                policy,
                state: Mutex::new(RecordingState::default()),
                pass_lock: tokio::sync::Mutex::new(()),
                registry,
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<RecordingInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<RecordingInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> RecordingId {
        self.inner.id
    }

    pub fn policy(&self) -> ConsumptionPolicy {
        self.inner.policy
    }

    /// 註冊匹配器；已到達的事件會在下一次 `are_all_matched` 時重播
    pub fn add_matcher(&self, matcher: Arc<dyn Matcher>) -> MatcherId {
        let mut state = self.inner.state.lock();
        let id = MatcherId(state.next_matcher_id);
        state.next_matcher_id += 1;

        debug!(
            "Recording {} registered {} ({})",
            self.inner.id,
            id,
            matcher.describe()
        );

        state.matchers.push(MatcherSlot {
            id,
            matcher,
            satisfied_by: None,
        });
        id
    }

    /// 追加事件並對它執行一次匹配流程
    pub async fn add_record(&self, event: Arc<WebhookEvent>) {
        let _pass = self.inner.pass_lock.lock().await;

        let index = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return;
            }
            state.events.push(RecordedEvent {
                event,
                consumed: false,
            });
            state.events.len() - 1
        };

        self.match_event(index).await;
        self.notify_if_complete();
    }

    /// 等待所有匹配器被滿足
    ///
    /// 先對既有日誌重播一次匹配流程；若已全部滿足則立即回傳 `true`，
    /// 否則等到後續事件使其滿足或 `timeout` 到期。
    pub async fn are_all_matched(&self, timeout: Duration) -> WebhookResult<bool> {
        let waiter = {
            let _pass = self.inner.pass_lock.lock().await;
            self.replay_backlog().await;
            self.notify_if_complete();

            let mut state = self.inner.state.lock();
            if state.all_satisfied() {
                return Ok(true);
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.retain(|waiter| !waiter.is_closed());
            state.waiters.push(tx);
            rx
        };

        // 逾時後接收端已隨 timeout 一併丟棄
        let outcome = tokio::time::timeout(timeout, waiter).await;
        match outcome {
            Ok(Ok(())) => Ok(true),
            Ok(Err(_)) => Err(WebhookError::ListenerClosed),
            Err(_) => {
                let mut state = self.inner.state.lock();
                state.waiters.retain(|waiter| !waiter.is_closed());
                let err = WebhookError::MatchTimeout {
                    timeout_ms: saturating_millis(timeout),
                    unsatisfied: state.unsatisfied_count(),
                    total: state.matchers.len(),
                };
                warn!("Recording {}: {}", self.inner.id, err);
                Err(err)
            }
        }
    }

    /// 從所屬監聽器取消註冊；之後到達的事件不再記錄
    ///
    /// 已有的日誌與匹配狀態保留供診斷。
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }

        if let Some(registry) = self.inner.registry.as_ref().and_then(Weak::upgrade) {
            registry.deregister(self.inner.id);
        }

        info!("Recording {} stopped", self.inner.id);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }

    /// 按到達順序回傳已記錄的事件
    pub fn events(&self) -> Vec<Arc<WebhookEvent>> {
        self.inner
            .state
            .lock()
            .events
            .iter()
            .map(|recorded| recorded.event.clone())
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.inner.state.lock().events.len()
    }

    #[cfg(test)]
    fn pending_waiters(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    pub fn matcher_states(&self) -> Vec<MatcherState> {
        self.inner
            .state
            .lock()
            .matchers
            .iter()
            .map(|slot| MatcherState {
                id: slot.id,
                description: slot.matcher.describe(),
                satisfied: slot.is_satisfied(),
                satisfied_by: slot.satisfied_by,
            })
            .collect()
    }

    pub fn unsatisfied(&self) -> Vec<MatcherState> {
        self.matcher_states()
            .into_iter()
            .filter(|state| !state.satisfied)
            .collect()
    }

    pub fn is_satisfied(&self, id: MatcherId) -> Option<bool> {
        self.inner
            .state
            .lock()
            .matchers
            .iter()
            .find(|slot| slot.id == id)
            .map(MatcherSlot::is_satisfied)
    }

    pub fn all_matched(&self) -> bool {
        self.inner.state.lock().all_satisfied()
    }

    // 呼叫端必須持有 pass_lock
    async fn replay_backlog(&self) {
        let backlog = self.inner.state.lock().events.len();

        for index in 0..backlog {
            {
                let state = self.inner.state.lock();
                if state.all_satisfied() {
                    return;
                }
                if self.inner.policy == ConsumptionPolicy::Exclusive && state.events[index].consumed {
                    continue;
                }
            }
            self.match_event(index).await;
        }
    }

    // 呼叫端必須持有 pass_lock
    async fn match_event(&self, index: usize) {
        let exclusive = self.inner.policy == ConsumptionPolicy::Exclusive;
        let event = self.inner.state.lock().events[index].event.clone();
        let mut slot = 0;

        loop {
            let candidate = {
                let state = self.inner.state.lock();
                if exclusive && state.events[index].consumed {
                    break;
                }
                match state.matchers.get(slot) {
                    Some(matcher) if matcher.is_satisfied() => None,
                    Some(matcher) => Some(matcher.matcher.clone()),
                    None => break,
                }
            };

            if let Some(matcher) = candidate {
                if evaluate(&matcher, event.clone()).await {
                    let mut state = self.inner.state.lock();
                    let matched = &mut state.matchers[slot];
                    matched.satisfied_by = Some(index);
                    debug!(
                        "Recording {}: event #{} satisfied {}",
                        self.inner.id, index, matched.id
                    );

                    if exclusive {
                        state.events[index].consumed = true;
                        break;
                    }
                }
            }

            slot += 1;
        }
    }

    fn notify_if_complete(&self) {
        let waiters = {
            let mut state = self.inner.state.lock();
            if state.waiters.is_empty() || !state.all_satisfied() {
                return;
            }
            std::mem::take(&mut state.waiters)
        };

        debug!(
            "Recording {}: all matchers satisfied, waking {} waiter(s)",
            self.inner.id,
            waiters.len()
        );

        for waiter in waiters {
            let _ = waiter.send(());
        }
    }
}

#[async_trait]
impl EventRecording for Recording {
    fn add_matcher(&self, matcher: Arc<dyn Matcher>) -> MatcherId {
        Recording::add_matcher(self, matcher)
    }

    async fn are_all_matched(&self, timeout: Duration) -> WebhookResult<bool> {
        Recording::are_all_matched(self, timeout).await
    }

    fn stop(&self) {
        Recording::stop(self)
    }
}
