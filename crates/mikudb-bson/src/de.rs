//! Serde 反序列化模块
//!
//! 实现 Serde Deserializer trait,把 `Bson` 树反序列化为 Rust 数据结构。
//!
//! - 整数字段接受 Int32、Int64 以及整数值的 Double/Number
//! - String、Symbol、JavaScriptCode 都可以作为字符串读取,并支持借用
//! - Null 和 Undefined 都视为 `None` / `()`

use crate::decoder::{decode, DecodeOptions};
use crate::value::Bson;
use crate::{BsonError, BsonResult};
use compact_str::CompactString;
use serde::de::{self, DeserializeOwned, DeserializeSeed, IntoDeserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::fmt;

pub struct Deserializer<'de> {
    input: &'de Bson,
}

impl<'de> Deserializer<'de> {
    pub fn from_bson(input: &'de Bson) -> Self {
        Deserializer { input }
    }

    fn unexpected(&self, expected: &str) -> BsonError {
        BsonError::Deserialization(format!("Expected {}, got {}", expected, self.input.type_name()))
    }

    fn integer(&self) -> Option<i64> {
        match self.input {
            Bson::Int32(n) => Some(*n as i64),
            Bson::Int64(n) => Some(*n),
            Bson::Double(n) | Bson::Number(n)
                if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n < i64::MAX as f64 =>
            {
                Some(*n as i64)
            }
            _ => None,
        }
    }
}

/// # Brief
/// 把 `Bson` 值反序列化为 `T`
pub fn from_bson<'a, T: Deserialize<'a>>(value: &'a Bson) -> BsonResult<T> {
    T::deserialize(Deserializer::from_bson(value))
}

/// # Brief
/// 解码 BSON 字节并反序列化为 `T`
///
/// # Arguments
/// * `bytes` - 一个完整的 BSON 文档
/// * `options` - 解码选项
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8], options: &DecodeOptions) -> BsonResult<T> {
    let value = Bson::Document(decode(bytes, options)?);
    from_bson(&value)
}

impl de::Error for BsonError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        BsonError::Deserialization(msg.to_string())
    }
}

impl<'de> de::Deserializer<'de> for Deserializer<'de> {
    type Error = BsonError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Null | Bson::Undefined => visitor.visit_unit(),
            Bson::Boolean(b) => visitor.visit_bool(*b),
            Bson::Int32(n) => visitor.visit_i32(*n),
            Bson::Int64(n) => visitor.visit_i64(*n),
            Bson::Double(n) => visitor.visit_f64(*n),
            Bson::Number(n) => match self.integer() {
                Some(i) if !(*n == 0.0 && n.is_sign_negative()) => visitor.visit_i64(i),
                _ => visitor.visit_f64(*n),
            },
            Bson::String(s) | Bson::Symbol(s) | Bson::JavaScriptCode(s) => visitor.visit_borrowed_str(s.as_str()),
            Bson::Binary(b) => visitor.visit_borrowed_bytes(&b.bytes),
            Bson::Array(arr) => visitor.visit_seq(SeqDeserializer::new(arr.iter())),
            Bson::Document(doc) => visitor.visit_map(MapDeserializer::new(doc.iter())),
            Bson::ObjectId(id) => visitor.visit_string(id.to_hex()),
            Bson::DateTime(dt) => visitor.visit_i64(dt.timestamp_millis()),
            Bson::Timestamp(ts) => visitor.visit_u64(ts.to_u64()),
            Bson::Decimal128(d) => visitor.visit_string(d.to_string()),
            _ => Err(BsonError::Deserialization(format!(
                "Cannot deserialize {} as any",
                self.input.type_name()
            ))),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Boolean(b) => visitor.visit_bool(*b),
            _ => Err(self.unexpected("boolean")),
        }
    }

    fn deserialize_i8<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_i16<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_i32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_i64(visitor)
    }

    fn deserialize_i64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.integer() {
            Some(n) => visitor.visit_i64(n),
            None => Err(self.unexpected("integer")),
        }
    }

    fn deserialize_i128<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.integer() {
            Some(n) => visitor.visit_i128(n as i128),
            None => Err(self.unexpected("integer")),
        }
    }

    fn deserialize_u8<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_u64(visitor)
    }

    fn deserialize_u16<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_u64(visitor)
    }

    fn deserialize_u32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_u64(visitor)
    }

    fn deserialize_u64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.integer() {
            Some(n) if n >= 0 => visitor.visit_u64(n as u64),
            _ => Err(self.unexpected("unsigned integer")),
        }
    }

    fn deserialize_u128<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.integer() {
            Some(n) if n >= 0 => visitor.visit_u128(n as u128),
            _ => Err(self.unexpected("unsigned integer")),
        }
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_f64(visitor)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input.as_f64() {
            Some(n) => visitor.visit_f64(n),
            None => Err(self.unexpected("float")),
        }
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if let Bson::String(s) = self.input {
            let mut chars = s.chars();
            if let (Some(c), None) = (chars.next(), chars.next()) {
                return visitor.visit_char(c);
            }
        }
        Err(self.unexpected("char"))
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::String(s) | Bson::Symbol(s) | Bson::JavaScriptCode(s) => visitor.visit_borrowed_str(s.as_str()),
            _ => Err(self.unexpected("string")),
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Binary(b) => visitor.visit_borrowed_bytes(&b.bytes),
            _ => Err(self.unexpected("binary")),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Null | Bson::Undefined => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Null | Bson::Undefined => visitor.visit_unit(),
            _ => Err(self.unexpected("null")),
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Array(arr) => visitor.visit_seq(SeqDeserializer::new(arr.iter())),
            _ => Err(self.unexpected("array")),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::Document(doc) => visitor.visit_map(MapDeserializer::new(doc.iter())),
            _ => Err(self.unexpected("document")),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        match self.input {
            Bson::String(s) => visitor.visit_enum(s.as_str().into_deserializer()),
            Bson::Document(doc) => match (doc.len(), doc.iter().next()) {
                (1, Some((key, value))) => visitor.visit_enum(EnumDeserializer {
                    variant: key.as_str(),
                    value,
                }),
                _ => Err(BsonError::Deserialization(format!(
                    "Expected single-key document for enum, got {} keys",
                    doc.len()
                ))),
            },
            _ => Err(self.unexpected("string or document for enum")),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }
}

struct SeqDeserializer<I> {
    iter: I,
}

impl<'de, I: Iterator<Item = &'de Bson>> SeqDeserializer<I> {
    fn new(iter: I) -> Self {
        Self { iter }
    }
}

impl<'de, I: Iterator<Item = &'de Bson>> SeqAccess<'de> for SeqDeserializer<I> {
    type Error = BsonError;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>, Self::Error> {
        match self.iter.next() {
            Some(value) => seed.deserialize(Deserializer::from_bson(value)).map(Some),
            None => Ok(None),
        }
    }
}

struct MapDeserializer<'de, I> {
    iter: I,
    value: Option<&'de Bson>,
}

impl<'de, I: Iterator<Item = (&'de CompactString, &'de Bson)>> MapDeserializer<'de, I> {
    fn new(iter: I) -> Self {
        Self { iter, value: None }
    }
}

impl<'de, I: Iterator<Item = (&'de CompactString, &'de Bson)>> MapAccess<'de> for MapDeserializer<'de, I> {
    type Error = BsonError;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>, Self::Error> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                let key: de::value::BorrowedStrDeserializer<'de, BsonError> =
                    de::value::BorrowedStrDeserializer::new(key.as_str());
                seed.deserialize(key).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, Self::Error> {
        let value = self
            .value
            .take()
            .ok_or_else(|| BsonError::Deserialization("map value requested before key".to_string()))?;
        seed.deserialize(Deserializer::from_bson(value))
    }
}

struct EnumDeserializer<'de> {
    variant: &'de str,
    value: &'de Bson,
}

impl<'de> de::EnumAccess<'de> for EnumDeserializer<'de> {
    type Error = BsonError;
    type Variant = VariantDeserializer<'de>;

    fn variant_seed<V: DeserializeSeed<'de>>(self, seed: V) -> Result<(V::Value, Self::Variant), Self::Error> {
        let deserializer: de::value::BorrowedStrDeserializer<'de, BsonError> =
            de::value::BorrowedStrDeserializer::new(self.variant);
        let variant = seed.deserialize(deserializer)?;
        Ok((variant, VariantDeserializer { value: self.value }))
    }
}

struct VariantDeserializer<'de> {
    value: &'de Bson,
}

impl<'de> de::VariantAccess<'de> for VariantDeserializer<'de> {
    type Error = BsonError;

    fn unit_variant(self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value, Self::Error> {
        seed.deserialize(Deserializer::from_bson(self.value))
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, Self::Error> {
        de::Deserializer::deserialize_seq(Deserializer::from_bson(self.value), visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        de::Deserializer::deserialize_map(Deserializer::from_bson(self.value), visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{to_vec, EncodeOptions};
    use crate::{doc, Document};
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
        age: u32,
        score: f64,
        active: bool,
        nickname: Option<String>,
        tags: Vec<String>,
        attrs: HashMap<String, i64>,
        role: Role,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Role {
        Guest,
        Member(u16),
        Admin { level: u8 },
    }

    #[test]
    fn test_roundtrip_struct_through_bytes() {
        let mut attrs = HashMap::new();
        attrs.insert("logins".to_string(), 12);
        let original = User {
            name: "miku".to_string(),
            age: 16,
            score: 99.5,
            active: true,
            nickname: None,
            tags: vec!["a".to_string(), "b".to_string()],
            attrs,
            role: Role::Admin { level: 3 },
        };

        let bytes = to_vec(&original, &EncodeOptions::default()).unwrap();
        let restored: User = from_slice(&bytes, &DecodeOptions::default()).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_enum_forms() {
        assert_eq!(from_bson::<Role>(&Bson::from("Guest")).unwrap(), Role::Guest);
        let member = Bson::Document(doc! { "Member": 7 });
        assert_eq!(from_bson::<Role>(&member).unwrap(), Role::Member(7));
        let two_keys = Bson::Document(doc! { "Member": 7, "Guest": null });
        assert!(from_bson::<Role>(&two_keys).is_err());
    }

    #[test]
    fn test_integers_from_numbers_and_doubles() {
        assert_eq!(from_bson::<i64>(&Bson::Number(1e15)).unwrap(), 1_000_000_000_000_000);
        assert_eq!(from_bson::<u8>(&Bson::Double(200.0)).unwrap(), 200);
        assert!(from_bson::<u8>(&Bson::Int32(300)).is_err());
        assert!(from_bson::<u32>(&Bson::Int32(-1)).is_err());
        assert!(from_bson::<i32>(&Bson::Double(1.5)).is_err());
        assert_eq!(from_bson::<f64>(&Bson::Int64(3)).unwrap(), 3.0);
    }

    #[test]
    fn test_borrowed_strings() {
        #[derive(Deserialize)]
        struct View<'a> {
            #[serde(borrow)]
            name: &'a str,
        }
        let value = Bson::Document(doc! { "name": "borrowed" });
        let view: View<'_> = from_bson(&value).unwrap();
        assert_eq!(view.name, "borrowed");
    }

    #[test]
    fn test_null_and_undefined_as_none() {
        let mut doc = Document::new();
        doc.insert("a", Bson::Null);
        doc.insert("b", Bson::Undefined);
        let value = Bson::Document(doc);
        let map: HashMap<String, Option<i32>> = from_bson(&value).unwrap();
        assert_eq!(map.get("a"), Some(&None));
        assert_eq!(map.get("b"), Some(&None));
    }

    #[test]
    fn test_type_mismatch_message() {
        let err = from_bson::<bool>(&Bson::Int32(1)).unwrap_err();
        assert!(err.to_string().contains("Expected boolean, got int"));
    }
}
