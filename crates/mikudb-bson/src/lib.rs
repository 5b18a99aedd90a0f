//! # mikudb-bson - BSON 编解码器
//!
//! MikuDB 的 BSON 线格式实现,保证逐位一致的往返编解码:
//!
//! - **元素扫描器**:零拷贝地把字节缓冲区索引成元素描述符,不为值分配对象
//! - **结构物化器**:用显式工作栈驱动扫描器,按类型调用 reviver 构建对象图
//! - **编码器**:深度优先写出文档树,回填文档/数组长度前缀
//! - **数值分类**:int32 / int64 / double 的选择规则
//! - **Decimal128**:十进制字符串与 IEEE 754-2008 BID 位域之间的转换
//! - **Serde 桥接**:`to_vec` / `from_slice` 直接在 Rust 结构体与 BSON 字节之间转换
//!
//! ## 快速开始
//!
//! ```rust,ignore
//! use mikudb_bson::{decode, encode, Document, DecodeOptions, EncodeOptions};
//!
//! let mut doc = Document::new();
//! doc.insert("name", "MikuDB");
//! doc.insert("version", 1);
//!
//! let bytes = encode(&doc, &EncodeOptions::default()).unwrap();
//! let restored = decode(&bytes, &DecodeOptions::default()).unwrap();
//! assert_eq!(doc, restored);
//! ```

pub mod buffer;
pub mod de;
pub mod decimal128;
pub mod decoder;
pub mod document;
pub mod encoder;
pub mod materializer;
pub mod numeric;
pub mod reviver;
pub mod scanner;
pub mod ser;
pub mod spec;
pub mod value;

pub use buffer::{global_pool, BufferPool, PooledBuffer};
pub use de::{from_bson, from_slice};
pub use decimal128::Decimal128;
pub use decoder::{decode, decode_field, decode_stream, DecodeOptions, TreeContainer, TreeReviver, Utf8Validation};
pub use document::Document;
pub use encoder::{calculate_object_size, encode, encode_into, encode_value, to_vec, EncodeOptions};
pub use materializer::materialize;
pub use numeric::{classify_number, NumberKind};
pub use reviver::{Reviver, ReviverTable};
pub use scanner::{parse_to_elements, read_document_size, ElementDescriptor};
pub use ser::to_bson;
pub use spec::ElementType;
pub use value::{Binary, Bson, CodeWithScope, DateTime, DbPointer, Regex, Timestamp};

pub use mikudb_common::ObjectId;

use thiserror::Error;

/// BSON 编解码的错误类型
///
/// 结构性错误总是携带出错的字节偏移,便于定位损坏位置。
#[derive(Error, Debug)]
pub enum BsonError {
    /// 长度前缀、终止符、键或值长度与文档边界不一致
    #[error("{message} (at byte offset {offset})")]
    Structural { offset: usize, message: String },

    /// 非法键名
    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// 无法编码的输入
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// 字符串不是有效的 UTF-8 编码
    #[error("Invalid UTF-8 string in BSON document (at byte offset {offset})")]
    InvalidUtf8 { offset: usize },

    /// 没有为该元素类型注册 reviver
    #[error("No reviver registered for element type 0x{0:02x}")]
    MissingReviver(u8),

    /// Decimal128 字符串无法解析
    #[error("Invalid Decimal128 string: {0:?}")]
    InvalidDecimal128(String),

    /// 正则表达式无法编译
    #[error("Invalid regular expression: {0}")]
    InvalidRegex(String),

    /// 文档体积超出限制
    #[error("Document too large: {size} bytes exceeds limit of {max} bytes")]
    DocumentTooLarge { size: usize, max: usize },

    /// 配置错误
    #[error("Config error: {0}")]
    Config(String),

    /// Serde 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Serde 反序列化错误
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl BsonError {
    pub(crate) fn structural(offset: usize, message: impl Into<String>) -> Self {
        BsonError::Structural {
            offset,
            message: message.into(),
        }
    }

    /// 结构性错误的字节偏移
    pub fn offset(&self) -> Option<usize> {
        match self {
            BsonError::Structural { offset, .. } | BsonError::InvalidUtf8 { offset } => {
                Some(*offset)
            }
            _ => None,
        }
    }
}

impl From<mikudb_common::MikuError> for BsonError {
    fn from(e: mikudb_common::MikuError) -> Self {
        BsonError::Config(e.to_string())
    }
}

/// BSON 操作的 Result 类型别名
pub type BsonResult<T> = Result<T, BsonError>;
