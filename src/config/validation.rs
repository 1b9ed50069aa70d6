use thiserror::Error;

/// 配置驗證錯誤
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("缺少必要配置項: {0}")]
    MissingField(String),

    #[error("無效的配置值: {0}")]
    InvalidValue(String),

    #[error("配置範圍錯誤: {field} 的值 {value} 不在範圍 {min}..{max} 內")]
    RangeError {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("依賴錯誤: {dependent} 依賴於 {dependency} 的配置")]
    DependencyError {
        dependent: String,
        dependency: String,
    },
}

/// 配置驗證器trait
pub trait Validator {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// 驗證配置區段
pub fn validate_config<T: Validator>(config: &T) -> Result<(), ValidationError> {
    config.validate()
}

/// 驗證工具函數
pub struct ValidationUtils;

impl ValidationUtils {
    /// 驗證配置值是否在指定範圍內（含邊界）
    pub fn in_range<T>(value: T, min: T, max: T, field_name: &str) -> Result<(), ValidationError>
    where
        T: PartialOrd + ToString,
    {
        if value < min || value > max {
            return Err(ValidationError::RangeError {
                field: field_name.to_string(),
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(())
    }

    /// 驗證字串（不分大小寫）是否為允許值之一
    pub fn one_of(value: &str, options: &[&str], field_name: &str) -> Result<(), ValidationError> {
        if !options.iter().any(|option| option.eq_ignore_ascii_case(value)) {
            return Err(ValidationError::InvalidValue(format!(
                "{} 的值 {} 不是有效選項: {:?}",
                field_name, value, options
            )));
        }
        Ok(())
    }

    /// 檢查必要的字串欄位是否有值
    pub fn not_empty(value: &str, field_name: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField(field_name.to_string()));
        }
        Ok(())
    }

    /// 檢查兩個欄位的依賴關係
    pub fn check_dependency(
        has_dependent: bool,
        has_dependency: bool,
        dependent_name: &str,
        dependency_name: &str,
    ) -> Result<(), ValidationError> {
        if has_dependent && !has_dependency {
            return Err(ValidationError::DependencyError {
                dependent: dependent_name.to_string(),
                dependency: dependency_name.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_in_range() {
        assert!(ValidationUtils::in_range(5u64, 1, 10, "matching.default_timeout_ms").is_ok());

        let err = ValidationUtils::in_range(15u64, 1, 10, "matching.default_timeout_ms").unwrap_err();
        assert_eq!(
            err,
            ValidationError::RangeError {
                field: "matching.default_timeout_ms".into(),
                value: "15".into(),
                min: "1".into(),
                max: "10".into(),
            }
        );
    }

    #[test]
    fn test_one_of_ignores_case() {
        assert!(ValidationUtils::one_of("PubSub", &["pubsub", "socket"], "transport.type").is_ok());
        assert_matches!(
            ValidationUtils::one_of("smtp", &["pubsub", "socket"], "transport.type"),
            Err(ValidationError::InvalidValue(_))
        );
    }

    #[test]
    fn test_not_empty() {
        assert!(ValidationUtils::not_empty("amqp://localhost", "transport.url").is_ok());
        assert!(ValidationUtils::not_empty("", "transport.url").is_err());
        assert!(ValidationUtils::not_empty("   ", "transport.url").is_err());
    }

    #[test]
    fn test_check_dependency() {
        assert!(ValidationUtils::check_dependency(true, true, "transport.routing_key", "transport.exchange").is_ok());
        assert!(ValidationUtils::check_dependency(false, false, "transport.routing_key", "transport.exchange").is_ok());
        assert_matches!(
            ValidationUtils::check_dependency(true, false, "transport.routing_key", "transport.exchange"),
            Err(ValidationError::DependencyError { .. })
        );
    }
}
