/// 配置管理模組
///
/// 本模組負責加載、驗證和管理錄製器配置。
/// 支持從開發、測試和生產三種環境中加載不同的配置，並允許環境變數覆寫。
pub mod loader;
pub mod manager;
pub mod types;
pub mod validation;

// 重新導出常用組件
pub use loader::{ConfigExt, ConfigLoader, Environment};
pub use manager::{get_config, init_config};
pub use types::*;
pub use validation::{validate_config, ValidationError, ValidationUtils, Validator};

#[cfg(test)]
mod tests {
    #[test]
    fn test_module_exports() {
        let _ = super::Environment::Development;
        let _ = super::ValidationUtils::not_empty("test", "field");

        fn _ensure_config_works(cfg: &super::ApplicationConfig) {
            let _ = &cfg.log;
            let _ = &cfg.webhook.transport;
            let _ = &cfg.webhook.matching;
        }
    }
}
