//! 编解码配置模块
//!
//! 定义 BSON 编解码器的可配置项:
//! - 编码配置(键校验、undefined 处理、内部缓冲区大小)
//! - 解码配置(数值提升、正则处理、UTF-8 校验、文档大小上限)
//!
//! 支持从 TOML 文件加载配置,大小类字段支持 KB/MB/GB 后缀。

use crate::error::{MikuError, MikuResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// 编解码主配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// 编码配置
    #[serde(default)]
    pub encode: EncodeConfig,

    /// 解码配置
    #[serde(default)]
    pub decode: DecodeConfig,
}

/// 编码配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeConfig {
    /// 是否校验键名(禁止 `$` 开头和包含 `.`)
    #[serde(default)]
    pub check_keys: bool,

    /// 是否忽略 undefined 值(否则编码为 null)
    #[serde(default)]
    pub ignore_undefined: bool,

    /// 超出 int32 的安全整数是否编码为 int64(否则为 double)
    #[serde(default)]
    pub use_int64_for_safe_integers: bool,

    /// 内部缓冲区的最小预分配大小 (默认: 16KB)
    #[serde(default = "default_min_internal_buffer_size")]
    pub min_internal_buffer_size: String,
}

fn default_min_internal_buffer_size() -> String { "16KB".to_string() }

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            check_keys: false,
            ignore_undefined: false,
            use_int64_for_safe_integers: false,
            min_internal_buffer_size: default_min_internal_buffer_size(),
        }
    }
}

/// UTF-8 校验配置
///
/// 既可以是全局开关,也可以按顶层字段名单独指定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Utf8ValidationConfig {
    /// 全局开关
    All(bool),
    /// 按顶层字段开关,取值必须全部为 true 或全部为 false
    Fields(BTreeMap<String, bool>),
}

impl Default for Utf8ValidationConfig {
    fn default() -> Self {
        Self::All(true)
    }
}

/// 解码配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// int32/double 是否解码为宿主数值
    #[serde(default)]
    pub promote_values: bool,

    /// 安全范围内的 int64 是否解码为宿主数值 (默认: true)
    #[serde(default = "default_true")]
    pub promote_longs: bool,

    /// int64 总是保留为 Int64
    #[serde(default)]
    pub use_big_int64: bool,

    /// 正则保留为 BSON 正则包装 (默认: true)
    #[serde(default = "default_true")]
    pub bson_regexp: bool,

    /// 以原始字节返回的顶层字段
    #[serde(default)]
    pub fields_as_raw: Vec<String>,

    /// UTF-8 校验
    #[serde(default)]
    pub utf8_validation: Utf8ValidationConfig,

    /// 允许缓冲区在文档之后还有剩余字节
    #[serde(default)]
    pub allow_object_smaller_than_buffer_size: bool,

    /// 解码前允许的最大文档大小,"0" 表示不限制 (默认: 16MB)
    #[serde(default = "default_max_document_size")]
    pub max_document_size: String,
}

fn default_true() -> bool { true }
fn default_max_document_size() -> String { "16MB".to_string() }

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            promote_values: false,
            promote_longs: true,
            use_big_int64: false,
            bson_regexp: true,
            fields_as_raw: Vec::new(),
            utf8_validation: Utf8ValidationConfig::default(),
            allow_object_smaller_than_buffer_size: false,
            max_document_size: default_max_document_size(),
        }
    }
}

impl CodecConfig {
    /// # Brief
    /// 从 TOML 文件加载配置
    ///
    /// # Arguments
    /// * `path` - 配置文件路径
    ///
    /// # Returns
    /// 解析并校验后的配置实例
    pub fn from_file(path: &Path) -> MikuResult<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded codec config");
        Ok(config)
    }

    /// # Brief
    /// 从 TOML 字符串解析配置
    pub fn from_toml_str(content: &str) -> MikuResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| MikuError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// # Brief
    /// 将配置序列化为 TOML 字符串
    pub fn to_toml(&self) -> MikuResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| MikuError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// # Brief
    /// 校验配置取值
    ///
    /// 检查大小字段能否解析,以及按字段的 UTF-8 配置非空且不混用 true/false。
    pub fn validate(&self) -> MikuResult<()> {
        self.encode.min_internal_buffer_size()?;
        self.decode.max_document_size()?;
        if let Utf8ValidationConfig::Fields(fields) = &self.decode.utf8_validation {
            if fields.is_empty() {
                return Err(MikuError::Validation(
                    "utf8 validation field map cannot be empty".to_string(),
                ));
            }
            let enabled = fields.values().filter(|v| **v).count();
            if enabled != 0 && enabled != fields.len() {
                return Err(MikuError::Validation(
                    "utf8 validation fields must be all true or all false".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl EncodeConfig {
    pub fn min_internal_buffer_size(&self) -> MikuResult<usize> {
        parse_size(&self.min_internal_buffer_size)
    }
}

impl DecodeConfig {
    /// `None` 表示不限制
    pub fn max_document_size(&self) -> MikuResult<Option<usize>> {
        let size = parse_size(&self.max_document_size)?;
        Ok(if size == 0 { None } else { Some(size) })
    }
}

/// # Brief
/// 解析大小字符串
///
/// 支持 GB/MB/KB 后缀,例如 "16MB", "512KB";无后缀按字节处理。
///
/// # Returns
/// 字节数,无法解析时返回 `MikuError::Config`
pub fn parse_size(s: &str) -> MikuResult<usize> {
    let upper = s.trim().to_uppercase();
    let (num, mult) = if upper.ends_with("GB") {
        (upper.trim_end_matches("GB").trim(), 1024 * 1024 * 1024)
    } else if upper.ends_with("MB") {
        (upper.trim_end_matches("MB").trim(), 1024 * 1024)
    } else if upper.ends_with("KB") {
        (upper.trim_end_matches("KB").trim(), 1024)
    } else {
        (upper.as_str(), 1)
    };
    num.parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(mult))
        .ok_or_else(|| MikuError::Config(format!("Invalid size: {:?}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("16KB").unwrap(), 16 * 1024);
        assert_eq!(parse_size("16mb").unwrap(), 16 * 1024 * 1024);
        assert_eq!(parse_size("1GB").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = CodecConfig::default();
        assert!(!config.encode.check_keys);
        assert!(config.decode.promote_longs);
        assert!(config.decode.bson_regexp);
        assert_eq!(config.decode.max_document_size().unwrap(), Some(16 * 1024 * 1024));
        assert_eq!(config.encode.min_internal_buffer_size().unwrap(), 16 * 1024);
    }

    #[test]
    fn test_from_toml() {
        let config = CodecConfig::from_toml_str(
            r#"
            [encode]
            check_keys = true

            [decode]
            promote_values = true
            fields_as_raw = ["payload"]
            max_document_size = "0"
            utf8_validation = { name = false }
            "#,
        )
        .unwrap();
        assert!(config.encode.check_keys);
        assert!(config.decode.promote_values);
        assert_eq!(config.decode.fields_as_raw, vec!["payload".to_string()]);
        assert_eq!(config.decode.max_document_size().unwrap(), None);
        assert!(matches!(
            config.decode.utf8_validation,
            Utf8ValidationConfig::Fields(ref f) if f.get("name") == Some(&false)
        ));
    }

    #[test]
    fn test_mixed_utf8_fields_rejected() {
        let result = CodecConfig::from_toml_str(
            r#"
            [decode]
            utf8_validation = { a = true, b = false }
            "#,
        );
        assert!(matches!(result, Err(MikuError::Validation(_))));
    }

    #[test]
    fn test_empty_utf8_fields_rejected() {
        let result = CodecConfig::from_toml_str(
            r#"
            [decode]
            utf8_validation = {}
            "#,
        );
        assert!(matches!(result, Err(MikuError::Validation(_))));

        let mut config = CodecConfig::default();
        config.decode.utf8_validation = Utf8ValidationConfig::Fields(BTreeMap::new());
        assert!(matches!(config.validate(), Err(MikuError::Validation(_))));
    }

    #[test]
    fn test_from_file_roundtrip() {
        let mut config = CodecConfig::default();
        config.encode.ignore_undefined = true;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();
        let loaded = CodecConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
