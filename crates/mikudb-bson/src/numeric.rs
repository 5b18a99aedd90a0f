//! 数值分类模块
//!
//! 决定一个宿主数值 (`f64`) 在线格式上使用 int32 / int64 / double 中的哪一种。
//! 编码器和 `Bson::Number` 的转换共用同一套规则。

use crate::spec::ElementType;

pub const BSON_INT32_MAX: i32 = i32::MAX;
pub const BSON_INT32_MIN: i32 = i32::MIN;
pub const BSON_INT64_MAX: i64 = i64::MAX;
pub const BSON_INT64_MIN: i64 = i64::MIN;

/// 2^53, `f64` 能精确表示所有整数的上界
pub const JS_INT_MAX: i64 = 1 << 53;
pub const JS_INT_MIN: i64 = -(1 << 53);

pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;
pub const MIN_SAFE_INTEGER: i64 = -((1 << 53) - 1);

/// 数值分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    Int32,
    Int64,
    Double,
}

/// # Brief
/// 对宿主数值做分类
///
/// - 非整数、NaN、无穷或绝对值超过 2^53 → `Double`
/// - `-0.0` → `Double`(int32 没有负零)
/// - 整数且在 int32 范围内 → `Int32`
/// - 其余可精确表示的整数 → `Int64`
pub fn classify_number(value: f64) -> NumberKind {
    if !value.is_finite() || value.fract() != 0.0 {
        return NumberKind::Double;
    }
    if value == 0.0 && value.is_sign_negative() {
        return NumberKind::Double;
    }
    if value < JS_INT_MIN as f64 || value > JS_INT_MAX as f64 {
        return NumberKind::Double;
    }
    if value >= BSON_INT32_MIN as f64 && value <= BSON_INT32_MAX as f64 {
        NumberKind::Int32
    } else {
        NumberKind::Int64
    }
}

/// # Brief
/// 编码器为宿主数值选择的线类型
///
/// `Int64` 分类只有在 `use_int64` 打开时才写成 int64,否则写成 double,
/// 这样解码后得到的宿主数值与原值一致。
pub fn number_wire_type(value: f64, use_int64: bool) -> ElementType {
    match classify_number(value) {
        NumberKind::Int32 => ElementType::Int32,
        NumberKind::Int64 if use_int64 => ElementType::Int64,
        NumberKind::Int64 | NumberKind::Double => ElementType::Double,
    }
}

/// 宿主数值编码后的值宽度(字节)
pub fn calculate_number_size(value: f64, use_int64: bool) -> usize {
    match number_wire_type(value, use_int64) {
        ElementType::Int32 => 4,
        _ => 8,
    }
}

/// 该 int64 能否无损转换为 `f64`
pub fn is_safe_integer(value: i64) -> bool {
    (MIN_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{decode, DecodeOptions};
    use crate::encoder::{encode, EncodeOptions};
    use crate::{Bson, Document};
    use proptest::prelude::*;

    #[test]
    fn test_boundary_table() {
        assert_eq!(number_wire_type(0.0, false), ElementType::Int32);
        assert_eq!(number_wire_type(-0.0, false), ElementType::Double);
        assert_eq!(number_wire_type(0x7FFF_FFFF as f64, false), ElementType::Int32);
        assert_eq!(number_wire_type(-0x8000_0000_i64 as f64, false), ElementType::Int32);
        assert_eq!(number_wire_type(0x7FFF_FFFF as f64 + 1.0, false), ElementType::Double);
        assert_eq!(number_wire_type(MAX_SAFE_INTEGER as f64, false), ElementType::Double);
        assert_eq!(number_wire_type(1.2 + 0.8, false), ElementType::Int32);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify_number(0.5), NumberKind::Double);
        assert_eq!(classify_number(f64::NAN), NumberKind::Double);
        assert_eq!(classify_number(f64::INFINITY), NumberKind::Double);
        assert_eq!(classify_number(f64::NEG_INFINITY), NumberKind::Double);
        assert_eq!(classify_number(-0.0), NumberKind::Double);
        assert_eq!(classify_number(2147483648.0), NumberKind::Int64);
        assert_eq!(classify_number(-2147483649.0), NumberKind::Int64);
        assert_eq!(classify_number(MAX_SAFE_INTEGER as f64), NumberKind::Int64);
        assert_eq!(classify_number(JS_INT_MAX as f64), NumberKind::Int64);
        assert_eq!(classify_number(JS_INT_MAX as f64 * 2.0), NumberKind::Double);
        assert_eq!(classify_number(1e300), NumberKind::Double);
    }

    #[test]
    fn test_int64_opt_in() {
        assert_eq!(number_wire_type(4294967296.0, true), ElementType::Int64);
        assert_eq!(number_wire_type(4294967296.0, false), ElementType::Double);
        assert_eq!(number_wire_type(1e20, true), ElementType::Double);
        assert_eq!(calculate_number_size(7.0, false), 4);
        assert_eq!(calculate_number_size(7.5, false), 8);
    }

    #[test]
    fn test_safe_integer() {
        assert!(is_safe_integer(MAX_SAFE_INTEGER));
        assert!(is_safe_integer(MIN_SAFE_INTEGER));
        assert!(!is_safe_integer(MAX_SAFE_INTEGER + 1));
        assert!(!is_safe_integer(i64::MIN));
    }

    proptest! {
        #[test]
        fn prop_int32_values_classify_as_int32(n in any::<i32>()) {
            prop_assert_eq!(classify_number(n as f64), NumberKind::Int32);
        }

        #[test]
        fn prop_wire_type_survives_roundtrip(v in any::<f64>(), use_int64 in any::<bool>()) {
            let encode_options = EncodeOptions {
                use_int64_for_safe_integers: use_int64,
                ..Default::default()
            };
            let decode_options = DecodeOptions {
                promote_values: true,
                ..Default::default()
            };
            let mut doc = Document::new();
            doc.insert("n", Bson::Number(v));

            let bytes = encode(&doc, &encode_options).unwrap();
            prop_assert_eq!(bytes[4], number_wire_type(v, use_int64) as u8);

            let decoded = decode(&bytes, &decode_options).unwrap();
            prop_assert!(matches!(decoded.get("n"), Some(Bson::Number(_))));
            let back = decoded.get("n").and_then(Bson::as_f64).unwrap();
            prop_assert_eq!(classify_number(back), classify_number(v));

            let again = encode(&decoded, &encode_options).unwrap();
            prop_assert_eq!(again[4], bytes[4]);
        }
    }
}
