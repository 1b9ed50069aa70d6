use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use webhook_recorder::config::{self, ApplicationConfig};
use webhook_recorder::logging::init_logging;
use webhook_recorder::transport::create_adapter;
use webhook_recorder::webhook::{
    body_contains, header_equals, signature::has_valid_signature, EventRecording, WebhookEvent, WebhookHarness,
};

#[derive(Parser)]
#[command(name = "webhook_recorder", about = "Webhook 錄製與匹配工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 連線並記錄每一個收到的事件，直到 Ctrl-C
    Listen {
        /// 以配置中的 signing_secret 驗證簽章
        #[arg(long)]
        verify: bool,
    },

    /// 等待符合條件的事件到達
    Expect {
        /// 標頭條件，格式為 name=value，可重複
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// 內容需包含的文字，可重複
        #[arg(long = "body-contains")]
        body_contains: Vec<String>,

        /// 等待時間（毫秒），預設取配置的 default_timeout_ms
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn parse_header(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.to_string())),
        _ => Err(format!("標頭條件格式應為 name=value: {}", arg)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行參數
    let cli = Cli::parse();

    // 初始化配置
    let app_config = config::init_config().context("無法加載配置")?;

    // 初始化日誌系統
    init_logging(&app_config.log)?;

    match cli.command {
        Commands::Listen { verify } => listen(app_config, verify).await,
        Commands::Expect {
            headers,
            body_contains,
            timeout_ms,
        } => expect(app_config, headers, body_contains, timeout_ms).await,
    }
}

async fn listen(app_config: &ApplicationConfig, verify: bool) -> Result<()> {
    let transport = app_config
        .webhook
        .transport
        .clone()
        .ok_or_else(|| anyhow!("未設定 webhook.transport，無法監聽"))?;

    let secret = if verify {
        let secret = app_config
            .webhook
            .signing_secret
            .clone()
            .ok_or_else(|| anyhow!("使用 --verify 需要設定 webhook.signing_secret"))?;
        Some(secret)
    } else {
        None
    };

    let mut adapter = create_adapter(&transport).context("無法建立傳輸")?;
    let (sink, mut events) = mpsc::channel(transport.channel_capacity.max(1));
    let connection = adapter.connect(sink).await.context("傳輸連線失敗")?;
    info!("開始監聽 {} ({})", connection.kind, connection.endpoint);

    // 直接消費事件，只保留計數
    let mut received: u64 = 0;
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            signal = &mut shutdown => {
                break match signal {
                    Ok(()) => {
                        info!("接收到關閉信號，正在退出...");
                        Ok(())
                    }
                    Err(err) => {
                        error!("無法監聽關閉信號: {}", err);
                        Err(anyhow!("無法監聽關閉信號: {}", err))
                    }
                };
            }

            event = events.recv() => match event {
                Some(event) => {
                    received += 1;
                    log_event(&event, secret.as_deref());
                }
                None => {
                    warn!("傳輸已停止投遞事件");
                    break Ok(());
                }
            }
        }
    };

    info!("共收到 {} 個事件", received);
    events.close();
    drop(events);
    adapter.disconnect().await;
    result
}

fn signature_status(secret: Option<&str>, event: &WebhookEvent) -> &'static str {
    match secret {
        Some(secret) if has_valid_signature(secret, event) => "valid",
        Some(_) => "INVALID",
        None => "unchecked",
    }
}

fn log_event(event: &WebhookEvent, secret: Option<&str>) {
    info!(
        "Received webhook: {} bytes, {} header(s), signature {}, metadata {}",
        event.body().len(),
        event.headers().len(),
        signature_status(secret, event),
        serde_json::Value::Object(event.metadata().clone())
    );
    info!("Body: {}", event.body_text());
}

async fn expect(
    app_config: &ApplicationConfig,
    headers: Vec<(String, String)>,
    contains: Vec<String>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    if headers.is_empty() && contains.is_empty() {
        bail!("至少需要一個 --header 或 --body-contains 條件");
    }

    let harness = WebhookHarness::from_config(&app_config.webhook);
    if !harness.is_enabled() {
        warn!("未設定 webhook.transport，期望視為已滿足");
    }

    harness.ready().await.context("傳輸連線失敗")?;

    let recording: Box<dyn EventRecording> = harness.start_recording();
    for (name, value) in &headers {
        recording.add_matcher(header_equals(name, value));
    }
    for text in &contains {
        recording.add_matcher(body_contains(text));
    }

    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| harness.default_timeout());
    info!(
        "等待 {} 個條件，最長 {} 毫秒",
        headers.len() + contains.len(),
        timeout.as_millis()
    );

    let outcome = recording.are_all_matched(timeout).await;
    recording.stop();
    harness.finalize().await;

    outcome.context("期望的事件未在時限內到達")?;
    info!("所有條件均已滿足");
    Ok(())
}
