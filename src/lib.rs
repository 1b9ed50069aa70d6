// 模組定義
pub mod config;
pub mod logging;
pub mod transport;
pub mod webhook;
