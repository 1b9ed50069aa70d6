use crate::config::LogConfig;
use anyhow::{anyhow, Result};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// 將配置中的等級字串轉為 tracing 等級，無法識別時為 INFO
pub fn parse_level(level: &str) -> Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// 建立過濾器；有 RUST_LOG 時以其為準
pub fn build_filter(log_config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_level(&log_config.level).as_str().to_lowercase()))
}

/// 初始化日誌系統
pub fn init_logging(log_config: &LogConfig) -> Result<()> {
    let filter = build_filter(log_config);

    let result = if log_config.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    };

    result.map_err(|e| anyhow!("設置日誌系統失敗: {}", e))?;

    info!("日誌系統初始化完成");
    Ok(())
}
