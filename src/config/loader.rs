use config::{Config, ConfigError, Environment as ConfigEnvironment, File};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// 選擇環境的環境變數
pub const ENV_VAR: &str = "RECORDER_ENV";
/// 覆寫配置用的環境變數前綴
pub const ENV_PREFIX: &str = "RECORDER";

/// 環境類型枚舉
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    /// 從環境變數取得當前環境設定
    pub fn from_env() -> Self {
        match env::var(ENV_VAR)
            .unwrap_or_else(|_| "development".into())
            .to_lowercase()
            .as_str()
        {
            "production" => Environment::Production,
            "test" => Environment::Test,
            _ => Environment::Development,
        }
    }

    /// 轉換為配置文件名
    pub fn as_filename(&self) -> &'static str {
        match self {
            Environment::Development => "development.toml",
            Environment::Test => "test.toml",
            Environment::Production => "production.toml",
        }
    }
}

/// 配置加載器，負責根據環境加載適當的配置
pub struct ConfigLoader;

impl ConfigLoader {
    /// 配置目錄，`CONFIG_DIR` 未設定時為 `config`
    pub fn config_dir() -> PathBuf {
        PathBuf::from(env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into()))
    }

    /// 載入指定環境的配置
    pub fn load(env: Environment) -> Result<Config, ConfigError> {
        Self::load_from(&Self::config_dir(), env)
    }

    /// 從指定目錄載入指定環境的配置
    ///
    /// 環境文件不存在時只使用環境變數。
    pub fn load_from(dir: &Path, env: Environment) -> Result<Config, ConfigError> {
        let config_path = dir.join(env.as_filename());

        Config::builder()
            .add_source(File::from(config_path).required(false))
            // 環境變數優先級高於文件配置
            .add_source(
                ConfigEnvironment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
    }

    /// 載入當前環境的配置
    pub fn load_current() -> Result<Config, ConfigError> {
        Self::load(Environment::from_env())
    }
}

/// 配置獲取輔助特性
pub trait ConfigExt {
    /// 從配置中獲取並反序列化指定部分
    fn get_section<'a, T: Deserialize<'a>>(&'a self, section: &str) -> Result<T, ConfigError>;
}

impl ConfigExt for Config {
    fn get_section<'a, T: Deserialize<'a>>(&'a self, section: &str) -> Result<T, ConfigError> {
        self.get(section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::LogConfig;
    use serial_test::serial;
    use std::fs;

    #[test]
    #[serial]
    fn test_environment_from_env() {
        env::remove_var(ENV_VAR);
        assert_eq!(Environment::from_env(), Environment::Development);

        env::set_var(ENV_VAR, "production");
        assert_eq!(Environment::from_env(), Environment::Production);

        env::set_var(ENV_VAR, "TEST");
        assert_eq!(Environment::from_env(), Environment::Test);

        env::remove_var(ENV_VAR);
    }

    #[test]
    fn test_environment_as_filename() {
        assert_eq!(Environment::Development.as_filename(), "development.toml");
        assert_eq!(Environment::Test.as_filename(), "test.toml");
        assert_eq!(Environment::Production.as_filename(), "production.toml");
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("test.toml"),
            "[log]\nlevel = \"info\"\nformat = \"pretty\"\n",
        )
        .unwrap();

        env::set_var("RECORDER__LOG__LEVEL", "debug");
        let config = ConfigLoader::load_from(dir.path(), Environment::Test).unwrap();
        env::remove_var("RECORDER__LOG__LEVEL");

        let log: LogConfig = config.get_section("log").unwrap();
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, "pretty");
    }
}
