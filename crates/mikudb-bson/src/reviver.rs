//! Reviver 接口
//!
//! 物化器对每个元素调用 reviver,由 reviver 决定如何把元素写入当前容器,
//! 以及是否为嵌套文档创建子容器。

use crate::scanner::ElementDescriptor;
use crate::spec::ElementType;
use crate::{BsonError, BsonResult};
use std::collections::HashMap;

/// 元素到对象图的转换器
///
/// `C` 是调用方定义的容器类型。
pub trait Reviver<C> {
    /// # Brief
    /// 处理当前容器中的一个元素
    ///
    /// # Arguments
    /// * `bytes` - 完整缓冲区
    /// * `container` - 元素所属的容器
    /// * `element` - 元素描述符
    ///
    /// # Returns
    /// `Some(child)` 表示需要下降到该元素的嵌套文档(仅对 document、array、
    /// code-with-scope 生效),`None` 表示不下降
    fn revive(&mut self, bytes: &[u8], container: &mut C, element: &ElementDescriptor) -> BsonResult<Option<C>>;

    /// # Brief
    /// 子容器的全部元素处理完毕后,把它交还给父容器
    fn complete(&mut self, bytes: &[u8], parent: &mut C, element: &ElementDescriptor, child: C) -> BsonResult<()>;
}

pub type ReviveFn<C> = fn(&[u8], &mut C, &ElementDescriptor) -> BsonResult<Option<C>>;
pub type CompleteFn<C> = fn(&[u8], &mut C, &ElementDescriptor, C) -> BsonResult<()>;

/// 按元素类型注册函数的 reviver
///
/// 遇到未注册的类型时返回 `BsonError::MissingReviver`。
/// 未设置 `on_complete` 时子容器在完成后被丢弃。
pub struct ReviverTable<C> {
    revivers: HashMap<u8, ReviveFn<C>>,
    on_complete: Option<CompleteFn<C>>,
}

impl<C> ReviverTable<C> {
    pub fn new() -> Self {
        Self {
            revivers: HashMap::new(),
            on_complete: None,
        }
    }

    pub fn register(&mut self, element_type: ElementType, reviver: ReviveFn<C>) -> &mut Self {
        self.revivers.insert(element_type as u8, reviver);
        self
    }

    pub fn on_complete(&mut self, complete: CompleteFn<C>) -> &mut Self {
        self.on_complete = Some(complete);
        self
    }

    pub fn contains(&self, element_type: ElementType) -> bool {
        self.revivers.contains_key(&(element_type as u8))
    }
}

impl<C> Default for ReviverTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Reviver<C> for ReviverTable<C> {
    fn revive(&mut self, bytes: &[u8], container: &mut C, element: &ElementDescriptor) -> BsonResult<Option<C>> {
        let reviver = self
            .revivers
            .get(&element.element_type)
            .ok_or(BsonError::MissingReviver(element.element_type))?;
        reviver(bytes, container, element)
    }

    fn complete(&mut self, bytes: &[u8], parent: &mut C, element: &ElementDescriptor, child: C) -> BsonResult<()> {
        match self.on_complete {
            Some(complete) => complete(bytes, parent, element, child),
            None => Ok(()),
        }
    }
}
