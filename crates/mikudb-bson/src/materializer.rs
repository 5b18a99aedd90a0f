//! 结构物化器
//!
//! 用显式工作栈驱动扫描器:每一帧保存一层文档的元素描述符、游标和容器。
//! reviver 返回子容器时压入新帧,帧耗尽后弹出并通过 `Reviver::complete`
//! 交还给父容器。嵌套深度只受堆内存限制。

use crate::reviver::Reviver;
use crate::scanner::{parse_to_elements, read_i32, ElementDescriptor};
use crate::spec::ElementType;
use crate::{BsonError, BsonResult};

struct Frame<C> {
    elements: Vec<ElementDescriptor>,
    cursor: usize,
    container: C,
    opened_by: Option<ElementDescriptor>,
}

/// # Brief
/// 从 `start_offset` 处的文档构建对象图
///
/// # Arguments
/// * `bytes` - 完整缓冲区
/// * `start_offset` - 根文档的起始偏移
/// * `root` - 根容器
/// * `reviver` - 元素处理器
///
/// # Returns
/// 填充完毕的根容器
pub fn materialize<C, R: Reviver<C>>(bytes: &[u8], start_offset: usize, root: C, reviver: &mut R) -> BsonResult<C> {
    let elements = parse_to_elements(bytes, start_offset)?;
    materialize_elements(bytes, elements, root, reviver)
}

/// 以给定的描述符序列作为根帧进行物化,用于只处理部分顶层元素
pub(crate) fn materialize_elements<C, R: Reviver<C>>(
    bytes: &[u8],
    elements: Vec<ElementDescriptor>,
    root: C,
    reviver: &mut R,
) -> BsonResult<C> {
    let mut stack = vec![Frame {
        elements,
        cursor: 0,
        container: root,
        opened_by: None,
    }];

    loop {
        let top = stack.len() - 1;
        let frame = &mut stack[top];
        if let Some(element) = frame.elements.get(frame.cursor).copied() {
            frame.cursor += 1;
            let child = match reviver.revive(bytes, &mut frame.container, &element)? {
                Some(child) => child,
                None => continue,
            };
            if let Some(child_offset) = embedded_document_offset(bytes, &element)? {
                stack.push(Frame {
                    elements: parse_to_elements(bytes, child_offset)?,
                    cursor: 0,
                    container: child,
                    opened_by: Some(element),
                });
            }
            continue;
        }

        let finished = stack.pop();
        match (finished, stack.last_mut()) {
            (Some(Frame { container, opened_by: Some(element), .. }), Some(parent)) => {
                reviver.complete(bytes, &mut parent.container, &element, container)?;
            }
            (Some(Frame { container, .. }), _) => return Ok(container),
            (None, _) => return Err(BsonError::structural(0, "materializer stack underflow")),
        }
    }
}

/// 嵌套文档的起始偏移;非嵌套类型返回 `None`
///
/// 嵌套文档必须恰好占满所属元素的剩余部分。
/// code-with-scope 布局: 总长度 int32, 代码字符串 (int32 长度 + 字节), 作用域文档。
fn embedded_document_offset(bytes: &[u8], element: &ElementDescriptor) -> BsonResult<Option<usize>> {
    let offset = match element.kind() {
        Some(ElementType::Document) | Some(ElementType::Array) => element.value_offset,
        Some(ElementType::JavaScriptCodeWithScope) => {
            let code_len = read_i32(bytes, element.value_offset + 4)?;
            let scope_offset = (code_len >= 0)
                .then(|| element.value_offset + 8 + code_len as usize)
                .filter(|offset| offset + 4 <= element.value_end());
            match scope_offset {
                Some(offset) => offset,
                None => {
                    return Err(BsonError::structural(
                        element.value_offset + 4,
                        "code_w_scope string length exceeds the element",
                    ))
                }
            }
        }
        _ => return Ok(None),
    };
    let size = read_i32(bytes, offset)?;
    if size < 0 || offset + size as usize != element.value_end() {
        return Err(BsonError::structural(
            offset,
            format!("embedded document size {} does not match its element", size),
        ));
    }
    Ok(Some(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reviver::ReviverTable;

    /// 只记录键名路径的容器
    #[derive(Debug, Default)]
    struct Names {
        prefix: String,
        seen: Vec<String>,
    }

    fn record(bytes: &[u8], c: &mut Names, e: &ElementDescriptor) -> BsonResult<Option<Names>> {
        c.seen.push(format!("{}{}", c.prefix, String::from_utf8_lossy(e.name(bytes))));
        Ok(None)
    }

    fn descend(bytes: &[u8], c: &mut Names, e: &ElementDescriptor) -> BsonResult<Option<Names>> {
        let name = String::from_utf8_lossy(e.name(bytes)).into_owned();
        c.seen.push(format!("{}{}", c.prefix, name));
        Ok(Some(Names {
            prefix: format!("{}{}.", c.prefix, name),
            seen: Vec::new(),
        }))
    }

    fn merge(_: &[u8], parent: &mut Names, _: &ElementDescriptor, child: Names) -> BsonResult<()> {
        parent.seen.extend(child.seen);
        Ok(())
    }

    /// {"a": 1, "b": {"c": "x", "d": [true]}}
    fn nested_doc() -> Vec<u8> {
        let mut d_array = vec![0u8; 4];
        d_array.extend_from_slice(&[0x08, b'0', 0, 1, 0]);
        let len = d_array.len() as i32;
        d_array[..4].copy_from_slice(&len.to_le_bytes());

        let mut b_doc = vec![0u8; 4];
        b_doc.extend_from_slice(&[0x02, b'c', 0]);
        b_doc.extend_from_slice(&2i32.to_le_bytes());
        b_doc.extend_from_slice(b"x\0");
        b_doc.extend_from_slice(&[0x04, b'd', 0]);
        b_doc.extend_from_slice(&d_array);
        b_doc.push(0);
        let len = b_doc.len() as i32;
        b_doc[..4].copy_from_slice(&len.to_le_bytes());

        let mut root = vec![0u8; 4];
        root.extend_from_slice(&[0x10, b'a', 0, 1, 0, 0, 0]);
        root.extend_from_slice(&[0x03, b'b', 0]);
        root.extend_from_slice(&b_doc);
        root.push(0);
        let len = root.len() as i32;
        root[..4].copy_from_slice(&len.to_le_bytes());
        root
    }

    fn full_table() -> ReviverTable<Names> {
        let mut table = ReviverTable::new();
        table
            .register(ElementType::Int32, record)
            .register(ElementType::String, record)
            .register(ElementType::Boolean, record)
            .register(ElementType::Document, descend)
            .register(ElementType::Array, descend)
            .on_complete(merge);
        table
    }

    #[test]
    fn test_walks_nested_structure_in_order() {
        let bytes = nested_doc();
        let mut table = full_table();
        let names = materialize(&bytes, 0, Names::default(), &mut table).unwrap();
        assert_eq!(names.seen, vec!["a", "b", "b.c", "b.d", "b.d.0"]);
    }

    #[test]
    fn test_no_descent_when_reviver_returns_none() {
        let bytes = nested_doc();
        let mut table = full_table();
        table.register(ElementType::Document, record);
        let names = materialize(&bytes, 0, Names::default(), &mut table).unwrap();
        assert_eq!(names.seen, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_reviver() {
        let bytes = nested_doc();
        let mut partial: ReviverTable<Names> = ReviverTable::new();
        partial.register(ElementType::Int32, record);
        let err = materialize(&bytes, 0, Names::default(), &mut partial).unwrap_err();
        assert!(matches!(err, BsonError::MissingReviver(0x03)));
    }

    #[test]
    fn test_corrupt_child_is_reported() {
        let mut bytes = nested_doc();
        // 破坏 b 子文档的终止符
        let b_end = bytes.len() - 2;
        bytes[b_end] = 7;
        let mut table = full_table();
        assert!(materialize(&bytes, 0, Names::default(), &mut table).is_err());
    }

    #[test]
    fn test_deep_nesting_uses_heap_stack() {
        let depth = 10_000;
        // {"a": {"a": ... {} }}: 第 k 层 (自内向外) 文档长度为 5 + 8k
        let mut doc = Vec::with_capacity(5 + 8 * depth);
        for level in (1..=depth).rev() {
            doc.extend_from_slice(&((5 + 8 * level) as i32).to_le_bytes());
            doc.extend_from_slice(&[0x03, b'a', 0]);
        }
        doc.extend_from_slice(&[5, 0, 0, 0, 0]);
        doc.resize(doc.len() + depth, 0);

        fn count(_: &[u8], c: &mut usize, _: &ElementDescriptor) -> BsonResult<Option<usize>> {
            *c += 1;
            Ok(Some(0))
        }
        fn add(_: &[u8], parent: &mut usize, _: &ElementDescriptor, child: usize) -> BsonResult<()> {
            *parent += child;
            Ok(())
        }
        let mut table = ReviverTable::new();
        table.register(ElementType::Document, count).on_complete(add);
        assert_eq!(materialize(&doc, 0, 0usize, &mut table).unwrap(), depth);
    }

    #[test]
    fn test_scope_overrunning_its_element_is_rejected() {
        // {"c": code_w_scope(total=14, "x", scope 声明 12 字节), "z": 1}
        let mut root = vec![0u8; 4];
        root.extend_from_slice(&[0x0F, b'c', 0]);
        root.extend_from_slice(&14i32.to_le_bytes());
        root.extend_from_slice(&2i32.to_le_bytes());
        root.extend_from_slice(b"x\0");
        root.extend_from_slice(&12i32.to_le_bytes());
        root.extend_from_slice(&[0x10, b'z', 0, 1, 0, 0, 0]);
        root.push(0);
        let len = root.len() as i32;
        root[..4].copy_from_slice(&len.to_le_bytes());

        let mut table = full_table();
        table.register(ElementType::JavaScriptCodeWithScope, descend);
        let err = materialize(&root, 0, Names::default(), &mut table).unwrap_err();
        assert!(matches!(err, BsonError::Structural { offset: 17, .. }));
    }
}
