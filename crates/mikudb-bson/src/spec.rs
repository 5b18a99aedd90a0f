use std::fmt;

/// 默认的解码文档大小上限
pub const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;
/// 最小合法文档: 4 字节长度 + 1 字节终止符
pub const MIN_DOCUMENT_SIZE: usize = 5;
/// 编码器内部缓冲区的默认最小容量
pub const DEFAULT_MIN_INTERNAL_BUFFER_SIZE: usize = 16 * 1024;

pub const BINARY_SUBTYPE_GENERIC: u8 = 0x00;
pub const BINARY_SUBTYPE_FUNCTION: u8 = 0x01;
pub const BINARY_SUBTYPE_BINARY_OLD: u8 = 0x02;
pub const BINARY_SUBTYPE_UUID_OLD: u8 = 0x03;
pub const BINARY_SUBTYPE_UUID: u8 = 0x04;
pub const BINARY_SUBTYPE_MD5: u8 = 0x05;
pub const BINARY_SUBTYPE_ENCRYPTED: u8 = 0x06;
pub const BINARY_SUBTYPE_COLUMN: u8 = 0x07;
pub const BINARY_SUBTYPE_USER_DEFINED: u8 = 0x80;

/// DBRef 线格式使用的保留键,即使开启键校验也允许
pub const REFERENCE_KEYS: [&str; 3] = ["$ref", "$id", "$db"];

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Double = 0x01,
    String = 0x02,
    Document = 0x03,
    Array = 0x04,
    Binary = 0x05,
    Undefined = 0x06,
    ObjectId = 0x07,
    Boolean = 0x08,
    DateTime = 0x09,
    Null = 0x0A,
    RegularExpression = 0x0B,
    DbPointer = 0x0C,
    JavaScriptCode = 0x0D,
    Symbol = 0x0E,
    JavaScriptCodeWithScope = 0x0F,
    Int32 = 0x10,
    Timestamp = 0x11,
    Int64 = 0x12,
    Decimal128 = 0x13,
    MaxKey = 0x7F,
    MinKey = 0xFF,
}

impl ElementType {
    pub const ALL: [ElementType; 21] = [
        ElementType::Double,
        ElementType::String,
        ElementType::Document,
        ElementType::Array,
        ElementType::Binary,
        ElementType::Undefined,
        ElementType::ObjectId,
        ElementType::Boolean,
        ElementType::DateTime,
        ElementType::Null,
        ElementType::RegularExpression,
        ElementType::DbPointer,
        ElementType::JavaScriptCode,
        ElementType::Symbol,
        ElementType::JavaScriptCodeWithScope,
        ElementType::Int32,
        ElementType::Timestamp,
        ElementType::Int64,
        ElementType::Decimal128,
        ElementType::MaxKey,
        ElementType::MinKey,
    ];

    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Double),
            0x02 => Some(Self::String),
            0x03 => Some(Self::Document),
            0x04 => Some(Self::Array),
            0x05 => Some(Self::Binary),
            0x06 => Some(Self::Undefined),
            0x07 => Some(Self::ObjectId),
            0x08 => Some(Self::Boolean),
            0x09 => Some(Self::DateTime),
            0x0A => Some(Self::Null),
            0x0B => Some(Self::RegularExpression),
            0x0C => Some(Self::DbPointer),
            0x0D => Some(Self::JavaScriptCode),
            0x0E => Some(Self::Symbol),
            0x0F => Some(Self::JavaScriptCodeWithScope),
            0x10 => Some(Self::Int32),
            0x11 => Some(Self::Timestamp),
            0x12 => Some(Self::Int64),
            0x13 => Some(Self::Decimal128),
            0x7F => Some(Self::MaxKey),
            0xFF => Some(Self::MinKey),
            _ => None,
        }
    }

    /// 定长类型的值宽度,变长类型返回 `None`
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Double | Self::DateTime | Self::Timestamp | Self::Int64 => Some(8),
            Self::Int32 => Some(4),
            Self::ObjectId => Some(12),
            Self::Decimal128 => Some(16),
            Self::Boolean => Some(1),
            Self::Undefined | Self::Null | Self::MinKey | Self::MaxKey => Some(0),
            _ => None,
        }
    }

    /// 值中嵌有需要继续扫描的文档
    pub fn is_embedded(self) -> bool {
        matches!(
            self,
            Self::Document | Self::Array | Self::JavaScriptCodeWithScope
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::String => "string",
            Self::Document => "document",
            Self::Array => "array",
            Self::Binary => "binary",
            Self::Undefined => "undefined",
            Self::ObjectId => "objectId",
            Self::Boolean => "boolean",
            Self::DateTime => "dateTime",
            Self::Null => "null",
            Self::RegularExpression => "regex",
            Self::DbPointer => "dbPointer",
            Self::JavaScriptCode => "javascript",
            Self::Symbol => "symbol",
            Self::JavaScriptCodeWithScope => "javascriptWithScope",
            Self::Int32 => "int32",
            Self::Timestamp => "timestamp",
            Self::Int64 => "int64",
            Self::Decimal128 => "decimal128",
            Self::MaxKey => "maxKey",
            Self::MinKey => "minKey",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.name(), *self as u8)
    }
}
