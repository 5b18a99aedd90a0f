//! 文档编码模块
//!
//! 深度优先写出文档树:进入文档/数组时预留 4 字节长度,写完终止符后回填。
//! 遍历使用显式栈,和物化器一样不受调用栈深度限制。
//!
//! 写入目标抽象为 `Sink`:`BytesMut` 实际写字节,`SizeCounter` 只累计长度,
//! 因此 `calculate_object_size` 与编码共享同一套规则。

use crate::buffer::global_pool;
use crate::document::Document;
use crate::numeric::number_wire_type;
use crate::spec::{ElementType, BINARY_SUBTYPE_BINARY_OLD, DEFAULT_MIN_INTERNAL_BUFFER_SIZE, REFERENCE_KEYS};
use crate::value::{sort_options, Bson};
use crate::{BsonError, BsonResult};
use bytes::{BufMut, BytesMut};
use compact_str::CompactString;
use mikudb_common::EncodeConfig;
use serde::Serialize;
use std::fmt::Write;

/// 编码选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    /// 拒绝以 `$` 开头或包含 `.` 的键(`$ref`、`$id`、`$db` 除外)
    pub check_keys: bool,
    /// 文档中的 `Undefined` 字段被跳过,否则写成 null
    pub ignore_undefined: bool,
    /// 超出 int32 的安全整数写成 int64,否则写成 double
    pub use_int64_for_safe_integers: bool,
    /// 内部缓冲区的最小预分配容量
    pub min_internal_buffer_size: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            check_keys: false,
            ignore_undefined: false,
            use_int64_for_safe_integers: false,
            min_internal_buffer_size: DEFAULT_MIN_INTERNAL_BUFFER_SIZE,
        }
    }
}

impl TryFrom<&EncodeConfig> for EncodeOptions {
    type Error = BsonError;

    fn try_from(config: &EncodeConfig) -> BsonResult<Self> {
        Ok(Self {
            check_keys: config.check_keys,
            ignore_undefined: config.ignore_undefined,
            use_int64_for_safe_integers: config.use_int64_for_safe_integers,
            min_internal_buffer_size: config.min_internal_buffer_size()?,
        })
    }
}

trait Sink {
    fn position(&self) -> usize;
    fn put_u8(&mut self, v: u8);
    fn put_slice(&mut self, v: &[u8]);
    fn patch_i32(&mut self, at: usize, v: i32);
}

impl Sink for BytesMut {
    fn position(&self) -> usize {
        self.len()
    }

    fn put_u8(&mut self, v: u8) {
        BufMut::put_u8(self, v);
    }

    fn put_slice(&mut self, v: &[u8]) {
        BufMut::put_slice(self, v);
    }

    fn patch_i32(&mut self, at: usize, v: i32) {
        self[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }
}

#[derive(Default)]
struct SizeCounter(usize);

impl Sink for SizeCounter {
    fn position(&self) -> usize {
        self.0
    }

    fn put_u8(&mut self, _: u8) {
        self.0 += 1;
    }

    fn put_slice(&mut self, v: &[u8]) {
        self.0 += v.len();
    }

    fn patch_i32(&mut self, _: usize, _: i32) {}
}

fn length_i32(len: usize) -> BsonResult<i32> {
    i32::try_from(len).map_err(|_| BsonError::DocumentTooLarge {
        size: len,
        max: i32::MAX as usize,
    })
}

/// 预留长度前缀,返回其位置
fn begin_length<S: Sink>(sink: &mut S) -> usize {
    let start = sink.position();
    sink.put_slice(&[0; 4]);
    start
}

fn end_length<S: Sink>(sink: &mut S, start: usize) -> BsonResult<()> {
    let len = length_i32(sink.position() - start)?;
    sink.patch_i32(start, len);
    Ok(())
}

fn write_string<S: Sink>(sink: &mut S, s: &str) -> BsonResult<()> {
    sink.put_slice(&length_i32(s.len() + 1)?.to_le_bytes());
    sink.put_slice(s.as_bytes());
    sink.put_u8(0);
    Ok(())
}

fn write_cstring<S: Sink>(sink: &mut S, s: &str, what: &str) -> BsonResult<()> {
    if s.as_bytes().contains(&0) {
        return Err(BsonError::Encoding(format!("{} must not contain null bytes: {:?}", what, s)));
    }
    sink.put_slice(s.as_bytes());
    sink.put_u8(0);
    Ok(())
}

fn check_key(key: &str, options: &EncodeOptions) -> BsonResult<()> {
    let invalid = |reason| {
        Err(BsonError::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };
    if key.as_bytes().contains(&0) {
        return invalid("key must not contain null bytes");
    }
    if options.check_keys && !REFERENCE_KEYS.contains(&key) {
        if key.starts_with('$') {
            return invalid("key must not start with '$'");
        }
        if key.contains('.') {
            return invalid("key must not contain '.'");
        }
    }
    Ok(())
}

enum Entries<'a> {
    Document(indexmap::map::Iter<'a, CompactString, Bson>),
    Array(std::iter::Enumerate<std::slice::Iter<'a, Bson>>),
}

struct Frame<'a> {
    entries: Entries<'a>,
    start: usize,
    /// 作用域文档所属 code-with-scope 的长度前缀位置
    code_start: Option<usize>,
}

impl<'a> Frame<'a> {
    fn document<S: Sink>(sink: &mut S, doc: &'a Document) -> Self {
        Self {
            entries: Entries::Document(doc.iter()),
            start: begin_length(sink),
            code_start: None,
        }
    }
}

fn write_document<S: Sink>(sink: &mut S, doc: &Document, options: &EncodeOptions) -> BsonResult<()> {
    let mut stack = vec![Frame::document(sink, doc)];
    let mut index_key = String::new();

    while let Some(frame) = stack.last_mut() {
        let next = match &mut frame.entries {
            Entries::Document(iter) => iter.next().map(|(k, v)| (Some(k.as_str()), v)),
            Entries::Array(iter) => iter.next().map(|(i, v)| {
                index_key.clear();
                let _ = write!(index_key, "{}", i);
                (None, v)
            }),
        };

        let (field, value) = match next {
            Some(entry) => entry,
            None => {
                let (start, code_start) = (frame.start, frame.code_start);
                stack.pop();
                sink.put_u8(0);
                end_length(sink, start)?;
                if let Some(code_start) = code_start {
                    end_length(sink, code_start)?;
                }
                continue;
            }
        };

        let child = match field {
            Some(key) => {
                check_key(key, options)?;
                if matches!(value, Bson::Undefined) && options.ignore_undefined {
                    continue;
                }
                write_element(sink, key, value, options)?
            }
            None => write_element(sink, &index_key, value, options)?,
        };
        if let Some(child) = child {
            stack.push(child);
        }
    }
    Ok(())
}

/// 写出一个元素;嵌套文档只写到其长度前缀,返回待展开的新帧
fn write_element<'a, S: Sink>(
    sink: &mut S,
    key: &str,
    value: &'a Bson,
    options: &EncodeOptions,
) -> BsonResult<Option<Frame<'a>>> {
    let element_type = match value {
        Bson::Undefined => ElementType::Null,
        Bson::Number(n) => number_wire_type(*n, options.use_int64_for_safe_integers),
        other => other.element_type(),
    };
    sink.put_u8(element_type as u8);
    sink.put_slice(key.as_bytes());
    sink.put_u8(0);

    match value {
        Bson::Double(n) => sink.put_slice(&n.to_le_bytes()),
        Bson::Number(n) => match element_type {
            ElementType::Int32 => sink.put_slice(&(*n as i32).to_le_bytes()),
            ElementType::Int64 => sink.put_slice(&(*n as i64).to_le_bytes()),
            _ => sink.put_slice(&n.to_le_bytes()),
        },
        Bson::String(s) | Bson::JavaScriptCode(s) | Bson::Symbol(s) => write_string(sink, s)?,
        Bson::Document(doc) => return Ok(Some(Frame::document(sink, doc))),
        Bson::Array(items) => {
            return Ok(Some(Frame {
                entries: Entries::Array(items.iter().enumerate()),
                start: begin_length(sink),
                code_start: None,
            }));
        }
        Bson::Binary(bin) => {
            let len = length_i32(bin.bytes.len())?;
            if bin.subtype == BINARY_SUBTYPE_BINARY_OLD {
                sink.put_slice(&length_i32(bin.bytes.len() + 4)?.to_le_bytes());
                sink.put_u8(bin.subtype);
                sink.put_slice(&len.to_le_bytes());
            } else {
                sink.put_slice(&len.to_le_bytes());
                sink.put_u8(bin.subtype);
            }
            sink.put_slice(&bin.bytes);
        }
        Bson::Undefined | Bson::Null | Bson::MinKey | Bson::MaxKey => {}
        Bson::ObjectId(id) => sink.put_slice(id.as_bytes()),
        Bson::Boolean(b) => sink.put_u8(*b as u8),
        Bson::DateTime(dt) => sink.put_slice(&dt.timestamp_millis().to_le_bytes()),
        Bson::RegularExpression(re) => {
            write_cstring(sink, &re.pattern, "regex pattern")?;
            write_cstring(sink, &sort_options(&re.options), "regex options")?;
        }
        Bson::DbPointer(pointer) => {
            write_string(sink, &pointer.namespace)?;
            sink.put_slice(pointer.id.as_bytes());
        }
        Bson::JavaScriptCodeWithScope(cws) => {
            let code_start = begin_length(sink);
            write_string(sink, &cws.code)?;
            let mut frame = Frame::document(sink, &cws.scope);
            frame.code_start = Some(code_start);
            return Ok(Some(frame));
        }
        Bson::Int32(n) => sink.put_slice(&n.to_le_bytes()),
        Bson::Timestamp(ts) => sink.put_slice(&ts.to_u64().to_le_bytes()),
        Bson::Int64(n) => sink.put_slice(&n.to_le_bytes()),
        Bson::Decimal128(d) => sink.put_slice(&d.bytes()),
    }
    Ok(None)
}

/// # Brief
/// 把文档编码为 BSON 字节
///
/// 内部使用缓冲区池中的缓冲区,返回的 `Vec` 恰好等于文档长度。
///
/// # Arguments
/// * `doc` - 要编码的文档
/// * `options` - 编码选项
pub fn encode(doc: &Document, options: &EncodeOptions) -> BsonResult<Vec<u8>> {
    let mut buf = global_pool().acquire(options.min_internal_buffer_size);
    write_document(&mut *buf, doc, options)?;
    Ok(buf.to_vec())
}

/// # Brief
/// 在 `buf` 末尾追加编码后的文档
///
/// 出错时 `buf` 被截回调用前的长度。
///
/// # Returns
/// 写入的字节数
pub fn encode_into(doc: &Document, buf: &mut BytesMut, options: &EncodeOptions) -> BsonResult<usize> {
    let start = buf.len();
    match write_document(buf, doc, options) {
        Ok(()) => Ok(buf.len() - start),
        Err(e) => {
            buf.truncate(start);
            Err(e)
        }
    }
}

/// 顶层值必须是文档
pub fn encode_value(value: &Bson, options: &EncodeOptions) -> BsonResult<Vec<u8>> {
    match value {
        Bson::Document(doc) => encode(doc, options),
        other => Err(BsonError::Encoding(format!(
            "top-level value must be a document, got {}",
            other.type_name()
        ))),
    }
}

/// # Brief
/// 通过 serde 把任意可序列化值编码为 BSON
///
/// 值必须序列化为文档(结构体或映射),否则立即返回 `BsonError::Encoding`。
pub fn to_vec<T: Serialize + ?Sized>(value: &T, options: &EncodeOptions) -> BsonResult<Vec<u8>> {
    let bson = crate::ser::to_bson(value)?;
    encode_value(&bson, options)
}

/// # Brief
/// 计算文档编码后的字节数,不分配缓冲区
pub fn calculate_object_size(doc: &Document, options: &EncodeOptions) -> BsonResult<usize> {
    let mut counter = SizeCounter::default();
    write_document(&mut counter, doc, options)?;
    Ok(counter.0)
}
