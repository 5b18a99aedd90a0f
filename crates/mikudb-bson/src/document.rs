//! BSON 文档结构模块
//!
//! 有序键值对集合,对应线格式上的 document。字段按插入顺序编码。

use crate::value::Bson;
use compact_str::CompactString;
use indexmap::IndexMap;
use mikudb_common::ObjectId;
use std::fmt;

/// BSON 文档
///
/// 使用 `IndexMap` 保持字段插入顺序。释放时以显式栈拆解嵌套结构,
/// 任意深度的文档都不会在析构时耗尽调用栈。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    fields: IndexMap<CompactString, Bson>,
}

impl Document {
    pub fn new() -> Self {
        Self {
            fields: IndexMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: IndexMap::with_capacity(capacity),
        }
    }

    /// # Brief
    /// 插入或替换字段
    ///
    /// 已存在的键保持原有位置,只替换值。
    ///
    /// # Arguments
    /// * `key` - 字段名
    /// * `value` - 字段值
    ///
    /// # Returns
    /// 被替换的旧值
    pub fn insert(&mut self, key: impl Into<CompactString>, value: impl Into<Bson>) -> Option<Bson> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Bson> {
        self.fields.get_mut(key)
    }

    /// 移除字段并保持其余字段的顺序
    pub fn remove(&mut self, key: &str) -> Option<Bson> {
        self.fields.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Bson> {
        self.fields.values()
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, CompactString, Bson> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.fields.get(key).and_then(|v| v.as_i32())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_object_id(&self, key: &str) -> Option<&ObjectId> {
        self.fields.get(key).and_then(|v| v.as_object_id())
    }

    pub fn get_array(&self, key: &str) -> Option<&Vec<Bson>> {
        self.fields.get(key).and_then(|v| v.as_array())
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.fields.get(key).and_then(|v| v.as_document())
    }

    /// # Brief
    /// 按点分隔的路径访问嵌套值
    ///
    /// # Arguments
    /// * `path` - 如 "user.address.city",数组段使用下标
    ///
    /// # Returns
    /// `Some(&Bson)` 如果路径存在,否则 `None`
    pub fn get_path(&self, path: &str) -> Option<&Bson> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// 合并另一个文档,同名字段以 `other` 为准
    pub fn merge(&mut self, mut other: Document) {
        for (k, v) in other.fields.drain(..) {
            self.fields.insert(k, v);
        }
    }

    pub(crate) fn drain_values_into(&mut self, out: &mut Vec<Bson>) {
        out.extend(self.fields.drain(..).map(|(_, v)| v));
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        if !self.fields.values().any(Bson::is_container) {
            return;
        }
        let mut pending = Vec::with_capacity(self.fields.len());
        self.drain_values_into(&mut pending);
        while let Some(mut value) = pending.pop() {
            value.take_children(&mut pending);
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "\"{}\": {}", k, v)?;
        }
        write!(f, "}}")
    }
}

impl<K: Into<CompactString>, V: Into<Bson>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut doc = Document::new();
        doc.extend(iter);
        doc
    }
}

impl<K: Into<CompactString>, V: Into<Bson>> Extend<(K, V)> for Document {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl IntoIterator for Document {
    type Item = (CompactString, Bson);
    type IntoIter = indexmap::map::IntoIter<CompactString, Bson>;

    fn into_iter(mut self) -> Self::IntoIter {
        std::mem::take(&mut self.fields).into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a CompactString, &'a Bson);
    type IntoIter = indexmap::map::Iter<'a, CompactString, Bson>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// 构造 Document 的便捷宏
///
/// # 示例
///
/// ```rust,ignore
/// use mikudb_bson::doc;
///
/// let empty = doc!();
/// let doc = doc! {
///     "name": "test",
///     "value": 123
/// };
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };
    ($($key:tt : $value:tt),* $(,)?) => {
        {
            let mut doc = $crate::Document::new();
            $(
                doc.insert($key, $crate::bson!($value));
            )*
            doc
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_insertion_order_preserved() {
        let mut doc = Document::new();
        doc.insert("z", 1);
        doc.insert("a", 2);
        doc.insert("m", 3);
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["z", "a", "m"]);

        doc.insert("a", 20);
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["z", "a", "m"]);
        assert_eq!(doc.get_i32("a"), Some(20));

        doc.remove("z");
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["a", "m"]);
    }

    #[test]
    fn test_doc_macro() {
        let doc = doc! {
            "name": "miku",
            "age": 16,
            "tags": ["vocaloid", "cv01"],
            "meta": { "active": true }
        };
        assert_eq!(doc.get_str("name"), Some("miku"));
        assert_eq!(doc.get_i32("age"), Some(16));
        assert_eq!(doc.get_array("tags").map(Vec::len), Some(2));
        assert_eq!(doc.get_path("meta.active").and_then(Bson::as_bool), Some(true));
        assert_eq!(doc.get_path("tags.0").and_then(Bson::as_str), Some("vocaloid"));
    }

    #[test]
    fn test_merge_and_iter() {
        let mut a = doc! { "x": 1, "y": 2 };
        a.merge(doc! { "y": 3, "z": 4 });
        let pairs: Vec<(String, i32)> = a
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.as_i32().unwrap()))
            .collect();
        assert_eq!(
            pairs,
            vec![("x".to_string(), 1), ("y".to_string(), 3), ("z".to_string(), 4)]
        );
    }

    #[test]
    fn test_deep_nesting_drops_without_recursion() {
        let mut doc = Document::new();
        for i in 0..200_000 {
            let mut outer = Document::new();
            if i % 2 == 0 {
                outer.insert("a", doc);
            } else {
                outer.insert("a", Bson::Array(vec![Bson::Document(doc)]));
            }
            doc = outer;
        }
        drop(doc);
    }
}
