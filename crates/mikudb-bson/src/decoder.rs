//! 文档解码模块
//!
//! `TreeReviver` 把物化器产出的元素转换为 `Document` / `Bson` 树,
//! 解码选项决定数值提升、正则处理、UTF-8 校验和原始字段。
//!
//! 入口:
//! - [`decode`]: 解码整个缓冲区
//! - [`decode_field`]: 只解码一个顶层字段
//! - [`decode_stream`]: 依次解码缓冲区中首尾相接的多个文档

use crate::decimal128::Decimal128;
use crate::document::Document;
use crate::materializer::{materialize, materialize_elements};
use crate::numeric::is_safe_integer;
use crate::reviver::Reviver;
use crate::scanner::{parse_to_elements, read_document_size, read_i32, ElementDescriptor};
use crate::spec::{ElementType, BINARY_SUBTYPE_BINARY_OLD, BINARY_SUBTYPE_GENERIC, MAX_DOCUMENT_SIZE};
use crate::value::{sort_options, Binary, Bson, CodeWithScope, DateTime, DbPointer, Regex, Timestamp};
use crate::{BsonError, BsonResult};
use compact_str::CompactString;
use mikudb_common::{DecodeConfig, ObjectId, Utf8ValidationConfig};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

/// UTF-8 校验模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Utf8Validation {
    /// 全部校验或全部不校验
    All(bool),
    /// 按顶层字段指定,子树继承所属顶层字段的设置
    ///
    /// 取值必须全部相同:全为 true 时只校验列出的字段,
    /// 全为 false 时列出的字段不校验、其余字段校验。
    Fields(HashMap<String, bool>),
}

impl Default for Utf8Validation {
    fn default() -> Self {
        Utf8Validation::All(true)
    }
}

impl Utf8Validation {
    fn validate(&self) -> BsonResult<()> {
        if let Utf8Validation::Fields(fields) = self {
            let enabled = fields.values().filter(|v| **v).count();
            if fields.is_empty() {
                return Err(BsonError::Config("utf8 validation field map cannot be empty".to_string()));
            }
            if enabled != 0 && enabled != fields.len() {
                return Err(BsonError::Config(
                    "utf8 validation fields must be all true or all false".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// 顶层字段 `name` 的校验开关
    fn for_field(&self, name: &[u8]) -> bool {
        match self {
            Utf8Validation::All(enabled) => *enabled,
            Utf8Validation::Fields(fields) => {
                let listed = std::str::from_utf8(name).ok().and_then(|n| fields.get(n));
                match listed {
                    Some(enabled) => *enabled,
                    None => !fields.values().any(|v| *v),
                }
            }
        }
    }
}

/// 解码选项
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// int32 / double 解码为 `Bson::Number`
    pub promote_values: bool,
    /// 与 `promote_values` 同时开启时,安全范围内的 int64 解码为 `Bson::Number`
    pub promote_longs: bool,
    /// int64 总是解码为 `Bson::Int64`,优先于 `promote_longs`
    pub use_big_int64: bool,
    /// false 时正则选项被规范化为 `regex` crate 支持的子集,且模式必须能编译
    pub bson_regexp: bool,
    /// 以原始字节 (generic Binary) 返回的顶层 document / array 字段
    pub fields_as_raw: HashSet<String>,
    pub utf8_validation: Utf8Validation,
    /// 允许缓冲区在文档之后还有剩余字节
    pub allow_object_smaller_than_buffer_size: bool,
    /// 扫描前检查的文档大小上限,`None` 表示不限制
    pub max_document_size: Option<usize>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            promote_values: false,
            promote_longs: true,
            use_big_int64: false,
            bson_regexp: true,
            fields_as_raw: HashSet::new(),
            utf8_validation: Utf8Validation::default(),
            allow_object_smaller_than_buffer_size: false,
            max_document_size: Some(MAX_DOCUMENT_SIZE),
        }
    }
}

impl DecodeOptions {
    pub fn validate(&self) -> BsonResult<()> {
        self.utf8_validation.validate()
    }

    fn check_size(&self, size: usize) -> BsonResult<()> {
        match self.max_document_size {
            Some(max) if size > max => Err(BsonError::DocumentTooLarge { size, max }),
            _ => Ok(()),
        }
    }
}

impl TryFrom<&DecodeConfig> for DecodeOptions {
    type Error = BsonError;

    fn try_from(config: &DecodeConfig) -> BsonResult<Self> {
        let utf8_validation = match &config.utf8_validation {
            Utf8ValidationConfig::All(enabled) => Utf8Validation::All(*enabled),
            Utf8ValidationConfig::Fields(fields) => {
                Utf8Validation::Fields(fields.iter().map(|(k, v)| (k.clone(), *v)).collect())
            }
        };
        let options = Self {
            promote_values: config.promote_values,
            promote_longs: config.promote_longs,
            use_big_int64: config.use_big_int64,
            bson_regexp: config.bson_regexp,
            fields_as_raw: config.fields_as_raw.iter().cloned().collect(),
            utf8_validation,
            allow_object_smaller_than_buffer_size: config.allow_object_smaller_than_buffer_size,
            max_document_size: config.max_document_size()?,
        };
        options.validate()?;
        Ok(options)
    }
}

enum Node {
    Document(Document),
    Array(Vec<Bson>),
    Scope { code: CompactString, scope: Document },
}

/// `TreeReviver` 使用的容器
///
/// 除了正在构建的文档/数组,还记录所属键、深度和继承的 UTF-8 开关。
pub struct TreeContainer {
    node: Node,
    key: CompactString,
    depth: usize,
    validate_utf8: bool,
}

impl TreeContainer {
    pub fn root() -> Self {
        Self {
            node: Node::Document(Document::new()),
            key: CompactString::default(),
            depth: 0,
            validate_utf8: true,
        }
    }

    fn child(node: Node, key: CompactString, depth: usize, validate_utf8: bool) -> Self {
        Self {
            node,
            key,
            depth,
            validate_utf8,
        }
    }

    fn push(&mut self, key: CompactString, value: Bson) {
        match &mut self.node {
            Node::Document(doc) | Node::Scope { scope: doc, .. } => {
                doc.insert(key, value);
            }
            Node::Array(items) => items.push(value),
        }
    }

    fn into_bson(self) -> Bson {
        match self.node {
            Node::Document(doc) => Bson::Document(doc),
            Node::Array(items) => Bson::Array(items),
            Node::Scope { code, scope } => Bson::JavaScriptCodeWithScope(CodeWithScope { code, scope }),
        }
    }

    pub fn into_document(self) -> BsonResult<Document> {
        match self.node {
            Node::Document(doc) => Ok(doc),
            _ => Err(BsonError::structural(0, "root container is not a document")),
        }
    }
}

/// 构建完整 `Bson` 树的 reviver
pub struct TreeReviver<'a> {
    options: &'a DecodeOptions,
}

impl<'a> TreeReviver<'a> {
    pub fn new(options: &'a DecodeOptions) -> Self {
        Self { options }
    }

    fn read_regex(&self, bytes: &[u8], element: &ElementDescriptor, validate: bool) -> BsonResult<Bson> {
        let value = element.value(bytes);
        let split = value.iter().position(|&b| b == 0).unwrap_or(value.len());
        let pattern = utf8(&value[..split], element.value_offset, validate)?;
        let options_bytes = &value[(split + 1).min(value.len())..value.len().saturating_sub(1)];
        let options = utf8(options_bytes, element.value_offset + split + 1, validate)?;

        if self.options.bson_regexp {
            return Ok(Bson::RegularExpression(Regex {
                pattern: pattern.into(),
                options: sort_options(&options),
            }));
        }

        let normalized: String = options.chars().filter(|c| matches!(c, 'i' | 'm' | 's' | 'x' | 'u')).collect();
        regex::RegexBuilder::new(&pattern)
            .case_insensitive(normalized.contains('i'))
            .multi_line(normalized.contains('m'))
            .dot_matches_new_line(normalized.contains('s'))
            .ignore_whitespace(normalized.contains('x'))
            .build()
            .map_err(|e| BsonError::InvalidRegex(e.to_string()))?;
        Ok(Bson::RegularExpression(Regex::new(pattern, &normalized)))
    }
}

impl<'a> Reviver<TreeContainer> for TreeReviver<'a> {
    fn revive(
        &mut self,
        bytes: &[u8],
        container: &mut TreeContainer,
        element: &ElementDescriptor,
    ) -> BsonResult<Option<TreeContainer>> {
        let validate = if container.depth == 0 {
            self.options.utf8_validation.for_field(element.name(bytes))
        } else {
            container.validate_utf8
        };
        let key: CompactString = utf8(element.name(bytes), element.name_offset, validate)?.into();
        let kind = element
            .kind()
            .ok_or_else(|| BsonError::structural(element.name_offset - 1, "unknown element type"))?;
        let offset = element.value_offset;
        let value = element.value(bytes);

        let bson = match kind {
            ElementType::Double => {
                let n = f64::from_le_bytes(fixed(value));
                if self.options.promote_values {
                    Bson::Number(n)
                } else {
                    Bson::Double(n)
                }
            }
            ElementType::String => Bson::String(read_string(bytes, offset, validate)?.into()),
            ElementType::JavaScriptCode => Bson::JavaScriptCode(read_string(bytes, offset, validate)?.into()),
            ElementType::Symbol => Bson::Symbol(read_string(bytes, offset, validate)?.into()),
            ElementType::Document | ElementType::Array => {
                if container.depth == 0 && self.options.fields_as_raw.contains(key.as_str()) {
                    Bson::Binary(Binary::generic(value.to_vec()))
                } else {
                    let node = if kind == ElementType::Document {
                        Node::Document(Document::new())
                    } else {
                        Node::Array(Vec::new())
                    };
                    return Ok(Some(TreeContainer::child(node, key, container.depth + 1, validate)));
                }
            }
            ElementType::Binary => Bson::Binary(read_binary(value, offset)?),
            ElementType::Undefined => Bson::Undefined,
            ElementType::ObjectId => Bson::ObjectId(ObjectId::from_bytes(fixed(value))),
            ElementType::Boolean => match value[0] {
                0 => Bson::Boolean(false),
                1 => Bson::Boolean(true),
                other => {
                    return Err(BsonError::structural(offset, format!("illegal boolean type value 0x{:02x}", other)));
                }
            },
            ElementType::DateTime => Bson::DateTime(DateTime::from_millis(i64::from_le_bytes(fixed(value)))),
            ElementType::Null => Bson::Null,
            ElementType::RegularExpression => self.read_regex(bytes, element, validate)?,
            ElementType::DbPointer => {
                let namespace = read_string(bytes, offset, validate)?;
                let id = ObjectId::from_bytes(fixed(&value[value.len() - 12..]));
                Bson::DbPointer(DbPointer {
                    namespace: namespace.into(),
                    id,
                })
            }
            ElementType::JavaScriptCodeWithScope => {
                let code = read_code_with_scope_header(bytes, element, validate)?;
                let node = Node::Scope {
                    code,
                    scope: Document::new(),
                };
                return Ok(Some(TreeContainer::child(node, key, container.depth + 1, validate)));
            }
            ElementType::Int32 => {
                let n = i32::from_le_bytes(fixed(value));
                if self.options.promote_values {
                    Bson::Number(n as f64)
                } else {
                    Bson::Int32(n)
                }
            }
            ElementType::Timestamp => Bson::Timestamp(Timestamp::from_u64(u64::from_le_bytes(fixed(value)))),
            ElementType::Int64 => {
                let n = i64::from_le_bytes(fixed(value));
                let promote = !self.options.use_big_int64
                    && self.options.promote_values
                    && self.options.promote_longs
                    && is_safe_integer(n);
                if promote {
                    Bson::Number(n as f64)
                } else {
                    Bson::Int64(n)
                }
            }
            ElementType::Decimal128 => Bson::Decimal128(Decimal128::from_bytes(fixed(value))),
            ElementType::MinKey => Bson::MinKey,
            ElementType::MaxKey => Bson::MaxKey,
        };

        container.push(key, bson);
        Ok(None)
    }

    fn complete(
        &mut self,
        _bytes: &[u8],
        parent: &mut TreeContainer,
        _element: &ElementDescriptor,
        child: TreeContainer,
    ) -> BsonResult<()> {
        let key = child.key.clone();
        parent.push(key, child.into_bson());
        Ok(())
    }
}

/// 定长值的字节数组;扫描器已保证长度
fn fixed<const N: usize>(value: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&value[..N]);
    out
}

fn utf8(raw: &[u8], offset: usize, validate: bool) -> BsonResult<String> {
    if validate {
        return std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|e| BsonError::InvalidUtf8 {
                offset: offset + e.valid_up_to(),
            });
    }
    let text = String::from_utf8_lossy(raw);
    if let Cow::Owned(_) = text {
        tracing::warn!(offset, "invalid UTF-8 replaced with U+FFFD");
    }
    Ok(text.into_owned())
}

/// 读取 `offset` 处的 int32 长度前缀字符串: 长度至少为 1 且最后一个字节为 0
fn read_string(bytes: &[u8], offset: usize, validate: bool) -> BsonResult<String> {
    let len = read_i32(bytes, offset)?;
    let start = offset + 4;
    if len < 1 || start + len as usize > bytes.len() {
        return Err(BsonError::structural(offset, format!("bad string length in bson: {}", len)));
    }
    let end = start + len as usize - 1;
    if bytes[end] != 0 {
        return Err(BsonError::structural(end, "invalid string: not null terminated"));
    }
    utf8(&bytes[start..end], start, validate)
}

fn read_binary(value: &[u8], offset: usize) -> BsonResult<Binary> {
    let len = read_i32(value, 0)? as usize;
    let subtype = value[4];
    let data = &value[5..];
    if subtype == BINARY_SUBTYPE_BINARY_OLD {
        let inner = read_i32(value, 5)
            .map_err(|_| BsonError::structural(offset + 5, "binary subtype 0x02 is missing its inner length"))?;
        if inner < 0 || inner as usize + 4 != len {
            return Err(BsonError::structural(
                offset + 5,
                format!("binary subtype 0x02 inner length {} does not match outer length {}", inner, len),
            ));
        }
        return Ok(Binary::new(subtype, data[4..].to_vec()));
    }
    Ok(Binary::new(subtype, data.to_vec()))
}

/// 校验 code-with-scope 的长度关系并读取代码字符串
fn read_code_with_scope_header(bytes: &[u8], element: &ElementDescriptor, validate: bool) -> BsonResult<CompactString> {
    let offset = element.value_offset;
    let total = element.value_len;
    if total < 4 + 4 + 1 + 5 {
        return Err(BsonError::structural(offset, "code_w_scope total size is too small"));
    }
    let code_len = read_i32(bytes, offset + 4)?;
    if code_len < 1 || 8 + code_len as usize + 5 > total {
        return Err(BsonError::structural(offset + 4, "code_w_scope string length exceeds the element"));
    }
    let scope_size = read_i32(bytes, offset + 8 + code_len as usize)?;
    if scope_size < 5 || 8 + code_len as usize + scope_size as usize != total {
        return Err(BsonError::structural(
            offset,
            "code_w_scope total size does not match the code and scope it contains",
        ));
    }
    let code = read_string(bytes, offset + 4, validate)?;
    Ok(code.into())
}

/// # Brief
/// 解码一个完整的 BSON 文档
///
/// # Arguments
/// * `bytes` - 文档字节;除非允许,长度必须与文档长度前缀一致
/// * `options` - 解码选项
///
/// # Returns
/// 解码后的文档;结构错误携带出错的字节偏移
pub fn decode(bytes: &[u8], options: &DecodeOptions) -> BsonResult<Document> {
    options.validate()?;
    let size = read_document_size(bytes, 0)?;
    options.check_size(size)?;
    if !options.allow_object_smaller_than_buffer_size && size != bytes.len() {
        return Err(BsonError::structural(
            0,
            format!("buffer length {} must equal the document size {}", bytes.len(), size),
        ));
    }
    decode_at(bytes, 0, options)
}

fn decode_at(bytes: &[u8], offset: usize, options: &DecodeOptions) -> BsonResult<Document> {
    let mut reviver = TreeReviver::new(options);
    materialize(bytes, offset, TreeContainer::root(), &mut reviver)
        .and_then(TreeContainer::into_document)
        .map_err(|e| {
            tracing::debug!(error = %e, offset, "failed to decode document");
            e
        })
}

/// # Brief
/// 只解码一个顶层字段
///
/// 其余字段只被扫描,不会被解码。
///
/// # Returns
/// 字段不存在时返回 `Ok(None)`
pub fn decode_field(bytes: &[u8], name: &str, options: &DecodeOptions) -> BsonResult<Option<Bson>> {
    options.validate()?;
    let size = read_document_size(bytes, 0)?;
    options.check_size(size)?;
    let element = parse_to_elements(bytes, 0)?
        .into_iter()
        .find(|e| e.name(bytes) == name.as_bytes());
    let element = match element {
        Some(element) => element,
        None => return Ok(None),
    };
    let mut reviver = TreeReviver::new(options);
    let mut doc = materialize_elements(bytes, vec![element], TreeContainer::root(), &mut reviver)?.into_document()?;
    Ok(doc.remove(name))
}

/// # Brief
/// 从 `start_offset` 开始依次解码 `count` 个首尾相接的文档
///
/// # Returns
/// 解码出的文档,以及最后一个文档之后的偏移
pub fn decode_stream(
    bytes: &[u8],
    start_offset: usize,
    count: usize,
    options: &DecodeOptions,
) -> BsonResult<(Vec<Document>, usize)> {
    options.validate()?;
    let mut documents = Vec::with_capacity(count);
    let mut offset = start_offset;
    for _ in 0..count {
        let size = read_document_size(bytes, offset)?;
        options.check_size(size)?;
        documents.push(decode_at(bytes, offset, options)?);
        offset += size;
    }
    Ok((documents, offset))
}

impl Binary {
    /// 把 `fields_as_raw` 返回的原始字段按文档解码
    pub fn decode_raw_document(&self, options: &DecodeOptions) -> BsonResult<Document> {
        if self.subtype != BINARY_SUBTYPE_GENERIC {
            return Err(BsonError::Config(format!("binary subtype 0x{:02x} does not hold a raw document", self.subtype)));
        }
        decode(&self.bytes, options)
    }
}
