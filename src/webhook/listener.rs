use crate::config::TransportConfig;
use crate::transport::{create_adapter, ConnectionInfo, TransportAdapter};
use crate::webhook::error::{WebhookError, WebhookResult};
use crate::webhook::event::WebhookEvent;
use crate::webhook::recording::{ConsumptionPolicy, Recording, RecordingId, RecordingInner};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type ReadyState = Option<Result<ConnectionInfo, WebhookError>>;
type Finalizer = Arc<dyn Fn() + Send + Sync>;

/// 活動錄製的註冊表
///
/// 只保存弱引用；錄製的生命週期屬於呼叫端。
#[derive(Default)]
pub(crate) struct RecordingRegistry {
    recordings: DashMap<RecordingId, Weak<RecordingInner>>,
}

impl RecordingRegistry {
    pub(crate) fn register(&self, recording: &Recording) {
        self.recordings.insert(recording.id(), recording.downgrade());
    }

    pub(crate) fn deregister(&self, id: RecordingId) {
        if self.recordings.remove(&id).is_some() {
            debug!("Recording {} deregistered", id);
        }
    }

    /// 仍存活的錄製；已被丟棄的項目順便清除
    pub(crate) fn active(&self) -> Vec<Recording> {
        let mut alive = Vec::with_capacity(self.recordings.len());
        let mut dead = Vec::new();

        for entry in self.recordings.iter() {
            match entry.value().upgrade() {
                Some(inner) => alive.push(Recording::from_inner(inner)),
                None => dead.push(*entry.key()),
            }
        }

        for id in dead {
            debug!("Pruning dropped recording {}", id);
            self.recordings.remove(&id);
        }

        alive
    }

    pub(crate) fn len(&self) -> usize {
        self.recordings.len()
    }
}

/// 監聽器選項
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerOptions {
    /// 新錄製使用的消費策略
    pub consumption: ConsumptionPolicy,
    /// 傳輸層到分發迴圈之間的緩衝大小
    pub channel_capacity: usize,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            consumption: ConsumptionPolicy::default(),
            channel_capacity: 1024,
        }
    }
}

/// 擁有一個傳輸連線，並把每個入站事件分發給所有活動錄製
///
/// 建立後立即在背景連線，不需要額外的啟動呼叫。
/// 必須在 tokio 執行環境內建立。
pub struct Listener {
    options: ListenerOptions,
    registry: Arc<RecordingRegistry>,
    ready_tx: Arc<watch::Sender<ReadyState>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    finalizers: Mutex<Vec<Finalizer>>,
}

impl Listener {
    /// 依傳輸配置建立監聽器
    ///
    /// 不支援或配置錯誤的傳輸類型不會在此失敗，而是讓 [`Listener::ready`] 回傳錯誤。
    pub fn new(config: TransportConfig, options: ListenerOptions) -> Self {
        match create_adapter(&config) {
            Ok(adapter) => Self::with_adapter(adapter, options),
            Err(e) => {
                let err = WebhookError::from(e);
                error!("Failed to create {} transport: {}", config.kind, err);
                Self::build(options, Some(Err(err)))
            }
        }
    }

    /// 使用已建立的傳輸實作
    pub fn with_adapter(adapter: Box<dyn TransportAdapter>, options: ListenerOptions) -> Self {
        let listener = Self::build(options, None);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let driver = tokio::spawn(Self::drive(
            adapter,
            listener.registry.clone(),
            listener.ready_tx.clone(),
            options.channel_capacity.max(1),
            shutdown_rx,
        ));

        *listener.shutdown_tx.lock() = Some(shutdown_tx);
        *listener.driver.lock() = Some(driver);
        listener
    }

    fn build(options: ListenerOptions, initial: ReadyState) -> Self {
        let (ready_tx, _) = watch::channel(initial);

        Self {
            options,
            registry: Arc::new(RecordingRegistry::default()),
            ready_tx: Arc::new(ready_tx),
            shutdown_tx: Mutex::new(None),
            driver: Mutex::new(None),
            finalizers: Mutex::new(Vec::new()),
        }
    }

    /// 連線、回報就緒狀態，然後持續分發事件直到關閉
    async fn drive(
        mut adapter: Box<dyn TransportAdapter>,
        registry: Arc<RecordingRegistry>,
        ready_tx: Arc<watch::Sender<ReadyState>>,
        capacity: usize,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let kind = adapter.kind();
        let (sink, mut events) = mpsc::channel::<WebhookEvent>(capacity);

        let connected = tokio::select! {
            result = adapter.connect(sink) => Some(result),
            _ = &mut shutdown_rx => None,
        };

        match connected {
            Some(Ok(info)) => {
                info!("Listener connected via {} ({})", kind, info.endpoint);
                ready_tx.send_replace(Some(Ok(info)));
            }
            Some(Err(e)) => {
                error!("Listener failed to connect via {}: {}", kind, e);
                ready_tx.send_replace(Some(Err(e.into())));
                adapter.disconnect().await;
                return;
            }
            None => {
                debug!("Listener finalized before {} transport connected", kind);
                ready_tx.send_replace(Some(Err(WebhookError::ListenerClosed)));
                adapter.disconnect().await;
                return;
            }
        }

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("Listener received shutdown signal");
                    break;
                }

                event = events.recv() => match event {
                    Some(event) => Self::fan_out(&registry, Arc::new(event)).await,
                    None => {
                        warn!("{} transport stopped delivering events", kind);
                        break;
                    }
                }
            }
        }

        // 先關閉接收端，傳輸任務中阻塞的推送會立即失敗
        events.close();
        drop(events);

        adapter.disconnect().await;
        info!("Listener disconnected from {} transport", kind);
    }

    // 依序交給每個錄製；錄製之間不共享消費狀態
    async fn fan_out(registry: &RecordingRegistry, event: Arc<WebhookEvent>) {
        let recordings = registry.active();
        debug!("Dispatching event to {} recording(s)", recordings.len());

        for recording in recordings {
            recording.add_record(event.clone()).await;
        }
    }

    /// 等待傳輸連線結果
    pub async fn ready(&self) -> WebhookResult<ConnectionInfo> {
        let mut rx = self.ready_tx.subscribe();
        let state = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| WebhookError::ListenerClosed)?;

        state.clone().unwrap_or(Err(WebhookError::ListenerClosed))
    }

    /// 建立並註冊新的錄製
    ///
    /// 可在就緒前呼叫；連線完成前不會有事件到達。
    pub fn start_recording(&self) -> Recording {
        let recording = Recording::attached(self.options.consumption, Arc::downgrade(&self.registry));
        self.registry.register(&recording);

        info!(
            "Recording {} started ({} active)",
            recording.id(),
            self.registry.len()
        );
        recording
    }

    pub fn active_recordings(&self) -> usize {
        self.registry.active().len()
    }

    pub fn options(&self) -> ListenerOptions {
        self.options
    }

    /// 註冊關閉時執行的回呼，回呼本身應可重複執行
    pub fn add_finalizer<F>(&self, finalizer: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.finalizers.lock().push(Arc::new(finalizer));
    }

    /// 斷開傳輸並執行所有關閉回呼
    ///
    /// 回呼集合不會被清空；重複呼叫安全，傳輸只會斷開一次。
    pub async fn finalize(&self) {
        if let Some(shutdown_tx) = self.shutdown_tx.lock().take() {
            let _ = shutdown_tx.send(());
        }

        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                error!("Listener task failed: {}", e);
            }
        }

        self.ready_tx.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(Err(WebhookError::ListenerClosed));
                true
            } else {
                false
            }
        });

        let finalizers: Vec<Finalizer> = self.finalizers.lock().clone();
        debug!("Running {} finalizer(s)", finalizers.len());
        for finalizer in finalizers {
            finalizer();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_registry_prunes_dropped_recordings() {
        let registry = Arc::new(RecordingRegistry::default());

        let kept = Recording::attached(ConsumptionPolicy::Exclusive, Arc::downgrade(&registry));
        let dropped = Recording::attached(ConsumptionPolicy::Exclusive, Arc::downgrade(&registry));
        registry.register(&kept);
        registry.register(&dropped);
        assert_eq!(registry.len(), 2);

        drop(dropped);
        let active = registry.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id(), kept.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stop_deregisters() {
        let registry = Arc::new(RecordingRegistry::default());
        let recording = Recording::attached(ConsumptionPolicy::Exclusive, Arc::downgrade(&registry));
        registry.register(&recording);

        recording.stop();
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_transport_rejects_ready() {
        let listener = Listener::new(TransportConfig::custom("fax", "tel:"), ListenerOptions::default());

        let err = listener.ready().await.unwrap_err();
        assert_eq!(err, WebhookError::TransportInit("fax".into()));

        // 重複觀察得到同一結果
        assert_eq!(listener.ready().await.unwrap_err(), err);
        listener.finalize().await;
    }

    #[tokio::test]
    async fn test_finalize_runs_finalizers_every_time() {
        let listener = Listener::new(
            TransportConfig::memory("listener-unit-finalize", ""),
            ListenerOptions::default(),
        );
        listener.ready().await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        listener.add_finalizer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listener.finalize().await;
        listener.finalize().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_start_recording_uses_listener_policy() {
        let options = ListenerOptions {
            consumption: ConsumptionPolicy::Shared,
            ..ListenerOptions::default()
        };
        let listener = Listener::new(TransportConfig::memory("listener-unit-policy", ""), options);

        let recording = listener.start_recording();
        assert_eq!(recording.policy(), ConsumptionPolicy::Shared);
        assert_eq!(listener.active_recordings(), 1);

        drop(recording);
        assert_eq!(listener.active_recordings(), 0);
        listener.finalize().await;
    }
}
