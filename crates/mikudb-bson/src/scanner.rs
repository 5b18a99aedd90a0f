//! 元素扫描器
//!
//! 把一层文档的字节索引成元素描述符序列。扫描不复制也不解释值,
//! 只校验每个元素的类型、键和值长度都落在文档边界之内。
//! 嵌套文档由调用方按需再次扫描。

use crate::spec::{ElementType, MIN_DOCUMENT_SIZE};
use crate::{BsonError, BsonResult};

/// 单个元素在缓冲区中的位置
///
/// 不持有数据,`name` 与 `value` 需要传入原缓冲区取切片。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementDescriptor {
    pub element_type: u8,
    pub name_offset: usize,
    pub name_len: usize,
    pub value_offset: usize,
    pub value_len: usize,
}

impl ElementDescriptor {
    pub fn kind(&self) -> Option<ElementType> {
        ElementType::from_u8(self.element_type)
    }

    /// 键名的原始字节(不含终止符)
    pub fn name<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[self.name_offset..self.name_offset + self.name_len]
    }

    pub fn value<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[self.value_offset..self.value_end()]
    }

    pub fn value_end(&self) -> usize {
        self.value_offset + self.value_len
    }
}

pub(crate) fn read_i32(bytes: &[u8], offset: usize) -> BsonResult<i32> {
    offset
        .checked_add(4)
        .and_then(|end| bytes.get(offset..end))
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| BsonError::structural(offset, "unexpected end of buffer reading int32"))
}

/// # Brief
/// 读取 `offset` 处文档的长度前缀并做基本校验
///
/// # Returns
/// 文档总字节数;缓冲区不足 5 字节、长度小于 5 或超出剩余缓冲区时报错
pub fn read_document_size(bytes: &[u8], offset: usize) -> BsonResult<usize> {
    let remaining = bytes.len().saturating_sub(offset);
    if remaining < MIN_DOCUMENT_SIZE {
        return Err(BsonError::structural(
            offset,
            format!("input must be a BSON document of at least {} bytes, got {}", MIN_DOCUMENT_SIZE, remaining),
        ));
    }
    let size = read_i32(bytes, offset)?;
    if size < MIN_DOCUMENT_SIZE as i32 {
        return Err(BsonError::structural(offset, format!("invalid document size {}", size)));
    }
    let size = size as usize;
    if size > remaining {
        return Err(BsonError::structural(
            offset,
            format!("document size {} is larger than the remaining buffer ({} bytes)", size, remaining),
        ));
    }
    Ok(size)
}

/// # Brief
/// 扫描 `start_offset` 处的一层文档
///
/// # Arguments
/// * `bytes` - 完整缓冲区
/// * `start_offset` - 文档长度前缀所在位置
///
/// # Returns
/// 按出现顺序排列的元素描述符;任何越界或格式错误都以带偏移的结构性错误返回
pub fn parse_to_elements(bytes: &[u8], start_offset: usize) -> BsonResult<Vec<ElementDescriptor>> {
    let size = read_document_size(bytes, start_offset)?;
    let end = start_offset + size;
    let terminator = end - 1;
    if bytes[terminator] != 0 {
        return Err(BsonError::structural(terminator, "document must end with a null terminator"));
    }

    let mut elements = Vec::new();
    let mut offset = start_offset + 4;
    loop {
        // 每个元素的值都止于终止符之前,因此 offset <= terminator
        let element_type = bytes[offset];
        offset += 1;
        if element_type == 0 {
            if offset != end {
                return Err(BsonError::structural(offset - 1, "invalid 0x00 type byte before document end"));
            }
            break;
        }

        let name_offset = offset;
        let name_len = bytes[name_offset..terminator]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| BsonError::structural(name_offset, "null terminator not found for element name"))?;
        let value_offset = name_offset + name_len + 1;

        let kind = ElementType::from_u8(element_type).ok_or_else(|| {
            BsonError::structural(
                name_offset - 1,
                format!(
                    "detected unknown BSON type 0x{:02x} for fieldname \"{}\"",
                    element_type,
                    String::from_utf8_lossy(&bytes[name_offset..name_offset + name_len])
                ),
            )
        })?;
        let value_len = match kind.fixed_size() {
            Some(len) => len,
            None => variable_length(bytes, kind, value_offset, terminator)?,
        };

        match value_offset.checked_add(value_len) {
            Some(value_end) if value_end <= terminator => offset = value_end,
            _ => {
                return Err(BsonError::structural(value_offset, "value reports length larger than document"));
            }
        }

        elements.push(ElementDescriptor {
            element_type,
            name_offset,
            name_len,
            value_offset,
            value_len,
        });
    }

    tracing::trace!(offset = start_offset, size, elements = elements.len(), "scanned document");
    Ok(elements)
}

/// 变长类型的值宽度;长度前缀必须落在文档体内
fn variable_length(bytes: &[u8], kind: ElementType, value_offset: usize, terminator: usize) -> BsonResult<usize> {
    if kind == ElementType::RegularExpression {
        let body = &bytes[value_offset..terminator];
        let pattern_len = body
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| BsonError::structural(value_offset, "regex pattern is not null terminated"))?;
        let options_len = body[pattern_len + 1..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| BsonError::structural(value_offset + pattern_len + 1, "regex options are not null terminated"))?;
        return Ok(pattern_len + 1 + options_len + 1);
    }

    if value_offset + 4 > terminator {
        return Err(BsonError::structural(value_offset, "value reports length larger than document"));
    }
    let prefix = read_i32(bytes, value_offset)?;
    if prefix < 0 {
        return Err(BsonError::structural(value_offset, format!("negative {} length {}", kind.name(), prefix)));
    }
    let prefix = prefix as usize;
    Ok(match kind {
        ElementType::String | ElementType::JavaScriptCode | ElementType::Symbol => prefix + 4,
        ElementType::Binary => prefix + 4 + 1,
        ElementType::DbPointer => prefix + 4 + 12,
        // document / array / code-with-scope: 前缀即为总长度
        _ => prefix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// {"a": "hello"}
    fn hello_doc() -> Vec<u8> {
        let mut buf = vec![0u8; 4];
        buf.push(0x02);
        buf.extend_from_slice(b"a\0");
        buf.extend_from_slice(&6i32.to_le_bytes());
        buf.extend_from_slice(b"hello\0");
        buf.push(0);
        let len = buf.len() as i32;
        buf[..4].copy_from_slice(&len.to_le_bytes());
        buf
    }

    #[test]
    fn test_scan_string_element() {
        let bytes = hello_doc();
        let elements = parse_to_elements(&bytes, 0).unwrap();
        assert_eq!(elements.len(), 1);
        let e = elements[0];
        assert_eq!((e.element_type, e.value_len), (2, 10));
        assert_eq!(e.name(&bytes), b"a");
        assert_eq!(&e.value(&bytes)[4..], b"hello\0");
    }

    #[test]
    fn test_empty_document() {
        let bytes = [5, 0, 0, 0, 0];
        assert!(parse_to_elements(&bytes, 0).unwrap().is_empty());
    }

    #[test]
    fn test_scan_at_offset() {
        let mut bytes = vec![0xAA, 0xBB];
        bytes.extend_from_slice(&hello_doc());
        let elements = parse_to_elements(&bytes, 2).unwrap();
        assert_eq!(elements[0].name_offset, 7);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let err = parse_to_elements(&[4, 0, 0, 0], 0).unwrap_err();
        assert_eq!(err.offset(), Some(0));
    }

    #[test]
    fn test_size_too_small_or_too_large() {
        assert!(parse_to_elements(&[4, 0, 0, 0, 0], 0).is_err());
        assert!(parse_to_elements(&[0xff, 0xff, 0xff, 0xff, 0], 0).is_err());
        assert!(parse_to_elements(&[6, 0, 0, 0, 0], 0).is_err());
    }

    #[test]
    fn test_missing_terminator() {
        let mut bytes = hello_doc();
        let last = bytes.len() - 1;
        bytes[last] = 1;
        let err = parse_to_elements(&bytes, 0).unwrap_err();
        assert_eq!(err.offset(), Some(last));
    }

    #[test]
    fn test_value_overrun_rejected() {
        let mut bytes = hello_doc();
        bytes[7..11].copy_from_slice(&100i32.to_le_bytes());
        let err = parse_to_elements(&bytes, 0).unwrap_err();
        assert!(err.to_string().contains("value reports length larger than document"));
        assert_eq!(err.offset(), Some(7));
    }

    #[test]
    fn test_value_running_into_terminator_rejected() {
        // int32 值的最后一个字节占用了文档终止符
        let bytes = [11, 0, 0, 0, 0x10, b'a', 0, 1, 0, 0, 0];
        assert!(parse_to_elements(&bytes, 0).is_err());
    }

    #[test]
    fn test_negative_string_length() {
        let mut bytes = hello_doc();
        bytes[7..11].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(parse_to_elements(&bytes, 0).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut bytes = hello_doc();
        bytes[4] = 0x42;
        let err = parse_to_elements(&bytes, 0).unwrap_err();
        assert!(err.to_string().contains("0x42"));
        assert_eq!(err.offset(), Some(4));
    }

    #[test]
    fn test_early_zero_type_byte() {
        let bytes = [7, 0, 0, 0, 0, 0, 0];
        let err = parse_to_elements(&bytes, 0).unwrap_err();
        assert!(err.to_string().contains("invalid 0x00 type byte"));
    }

    #[test]
    fn test_unterminated_key() {
        let bytes = [8, 0, 0, 0, 0x0A, b'a', b'b', 0];
        let err = parse_to_elements(&bytes, 0).unwrap_err();
        assert!(err.to_string().contains("null terminator not found"));
    }

    #[test]
    fn test_regex_and_fixed_lengths() {
        // {"r": /ab/i, "n": null, "b": true}
        let mut buf = vec![0u8; 4];
        buf.extend_from_slice(&[0x0B, b'r', 0, b'a', b'b', 0, b'i', 0]);
        buf.extend_from_slice(&[0x0A, b'n', 0]);
        buf.extend_from_slice(&[0x08, b'b', 0, 1]);
        buf.push(0);
        let len = buf.len() as i32;
        buf[..4].copy_from_slice(&len.to_le_bytes());

        let elements = parse_to_elements(&buf, 0).unwrap();
        let lens: Vec<(u8, usize)> = elements.iter().map(|e| (e.element_type, e.value_len)).collect();
        assert_eq!(lens, vec![(0x0B, 5), (0x0A, 0), (0x08, 1)]);
    }

    #[test]
    fn test_unterminated_regex() {
        let mut buf = vec![0u8; 4];
        buf.extend_from_slice(&[0x0B, b'r', 0, b'a', b'b']);
        buf.push(0);
        let len = buf.len() as i32;
        buf[..4].copy_from_slice(&len.to_le_bytes());
        assert!(parse_to_elements(&buf, 0).is_err());
    }
}
