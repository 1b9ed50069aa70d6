use crate::config::WebhookConfig;
use crate::webhook::error::WebhookResult;
use crate::webhook::listener::{Listener, ListenerOptions};
use crate::webhook::null_recording::NullRecording;
use crate::webhook::recording::EventRecording;
use std::time::Duration;
use tracing::info;

enum Mode {
    Live(Listener),
    Null,
}

/// 測試程式使用的入口
///
/// 有設定傳輸時建立實際監聽器，否則所有錄製都是空錄製，
/// 讓呼叫端在兩種環境下使用相同的呼叫形狀。
pub struct WebhookHarness {
    mode: Mode,
    default_timeout: Duration,
}

impl WebhookHarness {
    /// 依配置建立；有傳輸時需在 tokio 執行環境內呼叫
    pub fn from_config(config: &WebhookConfig) -> Self {
        let default_timeout = config.matching.default_timeout();

        let mode = match &config.transport {
            Some(transport) => {
                let options = ListenerOptions {
                    consumption: config.matching.consumption,
                    channel_capacity: transport.channel_capacity,
                };
                info!("Webhook verification enabled via {} transport", transport.kind);
                Mode::Live(Listener::new(transport.clone(), options))
            }
            None => {
                info!("No webhook transport configured, recordings are no-ops");
                Mode::Null
            }
        };

        Self { mode, default_timeout }
    }

    pub fn disabled() -> Self {
        Self {
            mode: Mode::Null,
            default_timeout: WebhookConfig::default().matching.default_timeout(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.mode, Mode::Live(_))
    }

    pub fn listener(&self) -> Option<&Listener> {
        match &self.mode {
            Mode::Live(listener) => Some(listener),
            Mode::Null => None,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// 空模式下立即成功
    pub async fn ready(&self) -> WebhookResult<()> {
        match &self.mode {
            Mode::Live(listener) => listener.ready().await.map(|_| ()),
            Mode::Null => Ok(()),
        }
    }

    pub fn start_recording(&self) -> Box<dyn EventRecording> {
        match &self.mode {
            Mode::Live(listener) => Box::new(listener.start_recording()),
            Mode::Null => Box::new(NullRecording::new()),
        }
    }

    pub async fn finalize(&self) {
        if let Mode::Live(listener) = &self.mode {
            listener.finalize().await;
        }
    }
}
