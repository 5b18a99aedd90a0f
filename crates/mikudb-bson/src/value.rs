//! BSON 值类型定义模块
//!
//! 每种线格式类型对应 `Bson` 的一个变体,另有 `Number` 表示未定型的宿主数值,
//! 其线类型在编码时由数值分类规则决定。
//! 使用 `CompactString` 优化短字符串的内存占用。

use crate::decimal128::Decimal128;
use crate::document::Document;
use crate::numeric::number_wire_type;
use crate::spec::{ElementType, BINARY_SUBTYPE_GENERIC, BINARY_SUBTYPE_UUID, BINARY_SUBTYPE_UUID_OLD};
use compact_str::CompactString;
use mikudb_common::ObjectId;
use std::fmt;
use uuid::Uuid;

/// BSON 值的枚举类型
///
/// # 示例
///
/// ```rust,ignore
/// use mikudb_bson::Bson;
///
/// let value = Bson::from("hello");
/// assert_eq!(value.type_name(), "string");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Bson {
    /// 64 位浮点数
    Double(f64),
    /// UTF-8 字符串
    String(CompactString),
    /// 嵌套文档
    Document(Document),
    /// 数组
    Array(Vec<Bson>),
    /// 二进制数据
    Binary(Binary),
    /// 已废弃的 undefined,编码时写成 null 或被忽略
    Undefined,
    /// 12 字节对象标识符
    ObjectId(ObjectId),
    /// 布尔值
    Boolean(bool),
    /// UTC 毫秒时间戳
    DateTime(DateTime),
    /// 空值
    Null,
    /// 正则表达式
    RegularExpression(Regex),
    /// 已废弃的 DBPointer
    DbPointer(DbPointer),
    /// JavaScript 代码
    JavaScriptCode(CompactString),
    /// 已废弃的 Symbol
    Symbol(CompactString),
    /// 带作用域的 JavaScript 代码
    JavaScriptCodeWithScope(CodeWithScope),
    /// 32 位有符号整数
    Int32(i32),
    /// 内部复制用时间戳
    Timestamp(Timestamp),
    /// 64 位有符号整数
    Int64(i64),
    /// 128 位十进制浮点数
    Decimal128(Decimal128),
    /// 小于一切值的特殊键
    MinKey,
    /// 大于一切值的特殊键
    MaxKey,
    /// 宿主数值,编码时选择 int32 / int64 / double
    Number(f64),
}

/// 二进制数据
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binary {
    pub subtype: u8,
    pub bytes: Vec<u8>,
}

impl Binary {
    pub fn new(subtype: u8, bytes: Vec<u8>) -> Self {
        Self { subtype, bytes }
    }

    pub fn generic(bytes: Vec<u8>) -> Self {
        Self::new(BINARY_SUBTYPE_GENERIC, bytes)
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self::new(BINARY_SUBTYPE_UUID, uuid.as_bytes().to_vec())
    }

    /// 子类型为 UUID (0x03 / 0x04) 且长度为 16 字节时返回 UUID
    pub fn to_uuid(&self) -> Option<Uuid> {
        if self.subtype != BINARY_SUBTYPE_UUID && self.subtype != BINARY_SUBTYPE_UUID_OLD {
            return None;
        }
        Uuid::from_slice(&self.bytes).ok()
    }
}

/// 正则表达式
///
/// 选项字符按字母序保存,与线格式要求一致。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Regex {
    pub pattern: CompactString,
    pub options: CompactString,
}

impl Regex {
    pub fn new(pattern: impl Into<CompactString>, options: &str) -> Self {
        Self {
            pattern: pattern.into(),
            options: sort_options(options),
        }
    }
}

pub(crate) fn sort_options(options: &str) -> CompactString {
    let mut chars: Vec<char> = options.chars().collect();
    chars.sort_unstable();
    chars.into_iter().collect()
}

/// 已废弃的 DBPointer: 集合名 + ObjectId
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DbPointer {
    pub namespace: CompactString,
    pub id: ObjectId,
}

/// 带作用域的 JavaScript 代码
#[derive(Debug, Clone, PartialEq)]
pub struct CodeWithScope {
    pub code: CompactString,
    pub scope: Document,
}

/// 复制时间戳: 低 32 位为自增序号,高 32 位为秒级时间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    pub time: u32,
    pub increment: u32,
}

impl Timestamp {
    pub fn from_u64(value: u64) -> Self {
        Self {
            time: (value >> 32) as u32,
            increment: value as u32,
        }
    }

    pub fn to_u64(self) -> u64 {
        ((self.time as u64) << 32) | self.increment as u64
    }
}

/// 自 Unix 纪元起的毫秒数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateTime(i64);

impl DateTime {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub const fn timestamp_millis(self) -> i64 {
        self.0
    }

    /// 超出 chrono 可表示范围时返回 `None`
    pub fn to_chrono(self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp_millis(self.0)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DateTime {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_chrono() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            None => write!(f, "{}", self.0),
        }
    }
}

impl Bson {
    /// # Brief
    /// 该值编码时使用的线类型
    ///
    /// `Number` 按默认规则分类(不启用 int64),`Undefined` 仍报告自身类型。
    pub fn element_type(&self) -> ElementType {
        match self {
            Bson::Double(_) => ElementType::Double,
            Bson::String(_) => ElementType::String,
            Bson::Document(_) => ElementType::Document,
            Bson::Array(_) => ElementType::Array,
            Bson::Binary(_) => ElementType::Binary,
            Bson::Undefined => ElementType::Undefined,
            Bson::ObjectId(_) => ElementType::ObjectId,
            Bson::Boolean(_) => ElementType::Boolean,
            Bson::DateTime(_) => ElementType::DateTime,
            Bson::Null => ElementType::Null,
            Bson::RegularExpression(_) => ElementType::RegularExpression,
            Bson::DbPointer(_) => ElementType::DbPointer,
            Bson::JavaScriptCode(_) => ElementType::JavaScriptCode,
            Bson::Symbol(_) => ElementType::Symbol,
            Bson::JavaScriptCodeWithScope(_) => ElementType::JavaScriptCodeWithScope,
            Bson::Int32(_) => ElementType::Int32,
            Bson::Timestamp(_) => ElementType::Timestamp,
            Bson::Int64(_) => ElementType::Int64,
            Bson::Decimal128(_) => ElementType::Decimal128,
            Bson::MinKey => ElementType::MinKey,
            Bson::MaxKey => ElementType::MaxKey,
            Bson::Number(n) => number_wire_type(*n, false),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Bson::Number(_) => "number",
            other => other.element_type().name(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Bson::Null)
    }

    /// 是否为包含子值的容器
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Bson::Document(_) | Bson::Array(_) | Bson::JavaScriptCodeWithScope(_)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Bson::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Bson::Int32(n) => Some(*n),
            _ => None,
        }
    }

    /// # Brief
    /// 整数类型(Int32、Int64 以及整数值的 Number)返回 i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Bson::Int32(n) => Some(*n as i64),
            Bson::Int64(n) => Some(*n),
            Bson::Number(n) if n.fract() == 0.0 && n.abs() <= (1u64 << 53) as f64 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Bson::Double(n) | Bson::Number(n) => Some(*n),
            Bson::Int32(n) => Some(*n as f64),
            Bson::Int64(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Bson::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Bson>> {
        match self {
            Bson::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Bson::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<&ObjectId> {
        match self {
            Bson::ObjectId(id) => Some(id),
            _ => None,
        }
    }

    /// # Brief
    /// 从文档中按键取值,或从数组中按索引取值
    ///
    /// # Arguments
    /// * `key` - 键名(文档)或索引字符串(数组)
    pub fn get(&self, key: &str) -> Option<&Bson> {
        match self {
            Bson::Document(doc) => doc.get(key),
            Bson::Array(arr) => key.parse::<usize>().ok().and_then(|i| arr.get(i)),
            _ => None,
        }
    }

    /// # Brief
    /// 按点分隔路径获取嵌套值,如 "user.tags.0"
    pub fn get_path(&self, path: &str) -> Option<&Bson> {
        let mut current = self;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// 把直接子值移入 `out`,容器本身变为空
    pub(crate) fn take_children(&mut self, out: &mut Vec<Bson>) {
        match self {
            Bson::Document(doc) => doc.drain_values_into(out),
            Bson::Array(arr) => out.append(arr),
            Bson::JavaScriptCodeWithScope(cws) => cws.scope.drain_values_into(out),
            _ => {}
        }
    }
}

impl Default for Bson {
    fn default() -> Self {
        Bson::Null
    }
}

impl fmt::Display for Bson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bson::Double(n) | Bson::Number(n) => write!(f, "{}", n),
            Bson::String(s) => write!(f, "\"{}\"", s),
            Bson::Document(doc) => write!(f, "{}", doc),
            Bson::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Bson::Binary(b) => write!(f, "Binary(0x{:02x}, {} bytes)", b.subtype, b.bytes.len()),
            Bson::Undefined => write!(f, "undefined"),
            Bson::ObjectId(id) => write!(f, "ObjectId(\"{}\")", id),
            Bson::Boolean(b) => write!(f, "{}", b),
            Bson::DateTime(dt) => write!(f, "DateTime(\"{}\")", dt),
            Bson::Null => write!(f, "null"),
            Bson::RegularExpression(r) => write!(f, "/{}/{}", r.pattern, r.options),
            Bson::DbPointer(p) => write!(f, "DBPointer(\"{}\", {})", p.namespace, p.id),
            Bson::JavaScriptCode(code) => write!(f, "Code({})", code),
            Bson::Symbol(s) => write!(f, "Symbol(\"{}\")", s),
            Bson::JavaScriptCodeWithScope(cws) => write!(f, "Code({}, {})", cws.code, cws.scope),
            Bson::Int32(n) => write!(f, "{}", n),
            Bson::Timestamp(ts) => write!(f, "Timestamp({}, {})", ts.time, ts.increment),
            Bson::Int64(n) => write!(f, "NumberLong({})", n),
            Bson::Decimal128(d) => write!(f, "NumberDecimal(\"{}\")", d),
            Bson::MinKey => write!(f, "MinKey"),
            Bson::MaxKey => write!(f, "MaxKey"),
        }
    }
}

// ============================================================================
// From 特征实现
// ============================================================================

impl From<bool> for Bson {
    fn from(v: bool) -> Self {
        Bson::Boolean(v)
    }
}

impl From<i32> for Bson {
    fn from(v: i32) -> Self {
        Bson::Int32(v)
    }
}

impl From<i64> for Bson {
    fn from(v: i64) -> Self {
        Bson::Int64(v)
    }
}

impl From<f64> for Bson {
    fn from(v: f64) -> Self {
        Bson::Double(v)
    }
}

impl From<&str> for Bson {
    fn from(v: &str) -> Self {
        Bson::String(CompactString::from(v))
    }
}

impl From<String> for Bson {
    fn from(v: String) -> Self {
        Bson::String(CompactString::from(v))
    }
}

impl From<CompactString> for Bson {
    fn from(v: CompactString) -> Self {
        Bson::String(v)
    }
}

impl From<Document> for Bson {
    fn from(v: Document) -> Self {
        Bson::Document(v)
    }
}

impl From<Binary> for Bson {
    fn from(v: Binary) -> Self {
        Bson::Binary(v)
    }
}

impl From<ObjectId> for Bson {
    fn from(v: ObjectId) -> Self {
        Bson::ObjectId(v)
    }
}

impl From<Regex> for Bson {
    fn from(v: Regex) -> Self {
        Bson::RegularExpression(v)
    }
}

impl From<DateTime> for Bson {
    fn from(v: DateTime) -> Self {
        Bson::DateTime(v)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Bson {
    fn from(v: chrono::DateTime<chrono::Utc>) -> Self {
        Bson::DateTime(v.into())
    }
}

impl From<Timestamp> for Bson {
    fn from(v: Timestamp) -> Self {
        Bson::Timestamp(v)
    }
}

impl From<Decimal128> for Bson {
    fn from(v: Decimal128) -> Self {
        Bson::Decimal128(v)
    }
}

impl From<rust_decimal::Decimal> for Bson {
    fn from(v: rust_decimal::Decimal) -> Self {
        Bson::Decimal128(v.into())
    }
}

impl From<Uuid> for Bson {
    fn from(v: Uuid) -> Self {
        Bson::Binary(Binary::from_uuid(v))
    }
}

impl From<CodeWithScope> for Bson {
    fn from(v: CodeWithScope) -> Self {
        Bson::JavaScriptCodeWithScope(v)
    }
}

impl From<DbPointer> for Bson {
    fn from(v: DbPointer) -> Self {
        Bson::DbPointer(v)
    }
}

impl<T: Into<Bson>> From<Vec<T>> for Bson {
    fn from(v: Vec<T>) -> Self {
        Bson::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Bson>> From<Option<T>> for Bson {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Bson::Null)
    }
}

/// 构造 Bson 值的便捷宏
///
/// # 示例
///
/// ```rust,ignore
/// use mikudb_bson::bson;
///
/// let doc = bson!({ "name": "test", "tags": ["a", "b"], "count": 3 });
/// ```
#[macro_export]
macro_rules! bson {
    (null) => {
        $crate::Bson::Null
    };
    ([ $($elem:tt),* $(,)? ]) => {
        $crate::Bson::Array(vec![ $($crate::bson!($elem)),* ])
    };
    ({ $($key:tt : $value:tt),* $(,)? }) => {
        {
            #[allow(unused_mut)]
            let mut doc = $crate::Document::new();
            $(
                doc.insert($key, $crate::bson!($value));
            )*
            $crate::Bson::Document(doc)
        }
    };
    ($e:expr) => {
        $crate::Bson::from($e)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_type_of_numbers() {
        assert_eq!(Bson::Number(1.0).element_type(), ElementType::Int32);
        assert_eq!(Bson::Number(1.5).element_type(), ElementType::Double);
        assert_eq!(Bson::Number(4294967296.0).element_type(), ElementType::Double);
        assert_eq!(Bson::Number(2.0).type_name(), "number");
        assert_eq!(Bson::Int64(2).type_name(), "int64");
    }

    #[test]
    fn test_regex_options_sorted() {
        let re = Regex::new("^a", "xmi");
        assert_eq!(re.options, "imx");
    }

    #[test]
    fn test_uuid_binary() {
        let id = Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0);
        let bin = Binary::from_uuid(id);
        assert_eq!(bin.subtype, BINARY_SUBTYPE_UUID);
        assert_eq!(bin.to_uuid(), Some(id));
        assert_eq!(Binary::generic(vec![1, 2]).to_uuid(), None);
    }

    #[test]
    fn test_timestamp_split() {
        let ts = Timestamp::from_u64(0x0000_0002_0000_0001);
        assert_eq!(ts.time, 2);
        assert_eq!(ts.increment, 1);
        assert_eq!(ts.to_u64(), 0x0000_0002_0000_0001);
    }

    #[test]
    fn test_datetime_chrono() {
        let dt = DateTime::from_millis(1_700_000_000_123);
        let chrono_dt = dt.to_chrono().unwrap();
        assert_eq!(DateTime::from(chrono_dt), dt);
        assert_eq!(dt.to_string(), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn test_bson_macro_and_path() {
        let value = bson!({
            "name": "miku",
            "tags": ["a", "b"],
            "nested": { "level": 2 },
            "missing": null
        });
        assert_eq!(value.get_path("name").and_then(Bson::as_str), Some("miku"));
        assert_eq!(value.get_path("tags.1").and_then(Bson::as_str), Some("b"));
        assert_eq!(value.get_path("nested.level").and_then(Bson::as_i32), Some(2));
        assert!(value.get_path("missing").unwrap().is_null());
        assert!(value.get_path("nested.nope").is_none());
    }

    #[test]
    fn test_as_i64_accepts_integral_numbers() {
        assert_eq!(Bson::Number(42.0).as_i64(), Some(42));
        assert_eq!(Bson::Number(4.5).as_i64(), None);
        assert_eq!(Bson::Int32(-3).as_i64(), Some(-3));
    }
}
