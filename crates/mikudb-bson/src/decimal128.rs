//! Decimal128 编解码模块
//!
//! 实现 IEEE 754-2008 128 位十进制浮点数 (BID 编码) 与十进制字符串之间的转换。
//!
//! 位布局(高位字):
//! - bit 63: 符号位
//! - 常规形式: bit 62..49 为偏置指数,bit 48..0 与低位字组成 113 位系数
//! - `11` 组合形式: bit 62..61 为 `11`,bit 60..47 为偏置指数,系数带隐含前缀 `100`
//! - 组合字段 `11110` 为无穷,`11111` 为 NaN

use crate::{BsonError, BsonResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const EXPONENT_MAX: i64 = 6111;
pub const EXPONENT_MIN: i64 = -6176;
pub const EXPONENT_BIAS: i64 = 6176;
pub const MAX_DIGITS: usize = 34;

/// 10^34 - 1, 规范系数的最大值
const MAX_SIGNIFICAND: u128 = 9_999_999_999_999_999_999_999_999_999_999_999;
/// 系数按 17 位十进制拆分为高低两半
const HALF_DIGITS: usize = 17;
const TEN_POW_17: u128 = 100_000_000_000_000_000;
/// 解析指数时的饱和上限,防止溢出
const EXPONENT_SATURATION: i64 = 1 << 40;

const SIGN_BIT: u64 = 1 << 63;
const NAN_HIGH: u64 = 0x7C00_0000_0000_0000;
const INFINITY_HIGH: u64 = 0x7800_0000_0000_0000;
const EXPONENT_MASK: u64 = 0x3fff;
const COMBINATION_MASK: u64 = 0x1f;
const COMBINATION_INFINITY: u64 = 0b11110;
const COMBINATION_NAN: u64 = 0b11111;

/// 128 位十进制浮点数,以小端字节序保存线格式的 16 字节
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decimal128 {
    bytes: [u8; 16],
}

impl Decimal128 {
    pub const NAN: Self = Self::from_words(NAN_HIGH, 0);
    pub const INFINITY: Self = Self::from_words(INFINITY_HIGH, 0);
    pub const NEG_INFINITY: Self = Self::from_words(INFINITY_HIGH | SIGN_BIT, 0);

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    pub const fn bytes(&self) -> [u8; 16] {
        self.bytes
    }

    const fn from_words(high: u64, low: u64) -> Self {
        let value = ((high as u128) << 64) | low as u128;
        Self {
            bytes: value.to_le_bytes(),
        }
    }

    fn words(&self) -> (u64, u64) {
        let value = u128::from_le_bytes(self.bytes);
        ((value >> 64) as u64, value as u64)
    }

    /// # Brief
    /// 从十进制字符串解析 Decimal128
    ///
    /// 格式错误的输入返回 NaN 位模式而不是报错;超出 34 位的有效数字
    /// 以及低于最小指数的部分按四舍六入五取偶舍入。
    ///
    /// # Arguments
    /// * `s` - 十进制字符串,如 "-1.23E+4"、"Infinity"、"NaN"
    pub fn from_string(s: &str) -> Self {
        match parse(s) {
            Some(parsed) => parsed.pack(),
            None => Self::NAN,
        }
    }

    pub fn is_nan(&self) -> bool {
        let (high, _) = self.words();
        (high >> 58) & COMBINATION_MASK == COMBINATION_NAN
    }

    pub fn is_infinite(&self) -> bool {
        let (high, _) = self.words();
        (high >> 58) & COMBINATION_MASK == COMBINATION_INFINITY
    }

    pub fn is_negative(&self) -> bool {
        let (high, _) = self.words();
        high & SIGN_BIT != 0
    }

    /// # Brief
    /// 拆出有限值的 (系数, 指数)
    ///
    /// 非规范系数(超过 10^34 - 1 或 `11` 组合形式)按 IEEE 754 规定视为零。
    /// NaN 与无穷返回 `None`。
    pub fn to_parts(&self) -> Option<(u128, i64)> {
        let (high, low) = self.words();
        let combination = (high >> 58) & COMBINATION_MASK;
        let (biased, significand) = if combination >> 3 == 0b11 {
            if combination == COMBINATION_INFINITY || combination == COMBINATION_NAN {
                return None;
            }
            ((high >> 47) & EXPONENT_MASK, 0)
        } else {
            let high_bits = high & 0x1_ffff_ffff_ffff;
            ((high >> 49) & EXPONENT_MASK, ((high_bits as u128) << 64) | low as u128)
        };
        let significand = if significand > MAX_SIGNIFICAND {
            0
        } else {
            significand
        };
        Some((significand, biased as i64 - EXPONENT_BIAS))
    }
}

impl FromStr for Decimal128 {
    type Err = BsonError;

    /// 严格解析:格式错误返回 `BsonError::InvalidDecimal128`
    fn from_str(s: &str) -> BsonResult<Self> {
        parse(s)
            .map(Parsed::pack)
            .ok_or_else(|| BsonError::InvalidDecimal128(s.to_string()))
    }
}

impl fmt::Display for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nan() {
            return f.write_str("NaN");
        }
        let sign = if self.is_negative() { "-" } else { "" };
        let (significand, exponent) = match self.to_parts() {
            Some(parts) => parts,
            None => return write!(f, "{}Infinity", sign),
        };

        let digits = significand.to_string();
        let significand_digits = digits.len() as i64;
        let scientific_exponent = significand_digits - 1 + exponent;

        f.write_str(sign)?;
        if scientific_exponent >= MAX_DIGITS as i64 || scientific_exponent <= -7 || exponent > 0 {
            f.write_str(&digits[..1])?;
            if digits.len() > 1 {
                write!(f, ".{}", &digits[1..])?;
            }
            if scientific_exponent > 0 {
                write!(f, "E+{}", scientific_exponent)
            } else {
                write!(f, "E{}", scientific_exponent)
            }
        } else if exponent == 0 {
            f.write_str(&digits)
        } else {
            let radix_position = significand_digits + exponent;
            if radix_position > 0 {
                let (int_part, frac_part) = digits.split_at(radix_position as usize);
                write!(f, "{}.{}", int_part, frac_part)
            } else {
                f.write_str("0.")?;
                for _ in 0..-radix_position {
                    f.write_str("0")?;
                }
                f.write_str(&digits)
            }
        }
    }
}

impl fmt::Debug for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal128(\"{}\")", self)
    }
}

impl From<rust_decimal::Decimal> for Decimal128 {
    fn from(d: rust_decimal::Decimal) -> Self {
        Decimal128::from_string(&d.to_string())
    }
}

impl TryFrom<Decimal128> for rust_decimal::Decimal {
    type Error = BsonError;

    fn try_from(d: Decimal128) -> BsonResult<Self> {
        let s = d.to_string();
        let parsed = if s.contains('E') {
            rust_decimal::Decimal::from_scientific(&s.to_lowercase())
        } else {
            rust_decimal::Decimal::from_str(&s)
        };
        parsed.map_err(|_| BsonError::InvalidDecimal128(s))
    }
}

/// 解析后的十进制值
enum Parsed {
    NaN,
    Infinity { negative: bool },
    /// 值 = digits × 10^exponent, digits 已去掉前导零
    Finite {
        negative: bool,
        digits: Vec<u8>,
        exponent: i64,
    },
}

/// 文本状态机: 符号、数字串、至多一个小数点、可选指数
fn parse(s: &str) -> Option<Parsed> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut negative = false;
    if let Some(&c) = bytes.first() {
        if c == b'+' || c == b'-' {
            negative = c == b'-';
            i = 1;
        }
    }

    match bytes.get(i) {
        Some(c) if c.is_ascii_digit() || *c == b'.' => {}
        _ => {
            let rest = &s[i..];
            if rest.eq_ignore_ascii_case("inf") || rest.eq_ignore_ascii_case("infinity") {
                return Some(Parsed::Infinity { negative });
            }
            if rest.eq_ignore_ascii_case("nan") {
                return Some(Parsed::NaN);
            }
            return None;
        }
    }

    let mut digits = Vec::new();
    let mut saw_radix = false;
    let mut digits_read = 0usize;
    let mut radix_position: i64 = 0;
    while let Some(&c) = bytes.get(i) {
        if c == b'.' {
            if saw_radix {
                return None;
            }
            saw_radix = true;
            i += 1;
            continue;
        }
        if !c.is_ascii_digit() {
            break;
        }
        if c != b'0' || !digits.is_empty() {
            digits.push(c - b'0');
        }
        if saw_radix {
            radix_position += 1;
        }
        digits_read += 1;
        i += 1;
    }
    if digits_read == 0 {
        return None;
    }

    let mut exponent: i64 = 0;
    if matches!(bytes.get(i), Some(b'e') | Some(b'E')) {
        i += 1;
        let mut exponent_negative = false;
        if let Some(&c) = bytes.get(i) {
            if c == b'+' || c == b'-' {
                exponent_negative = c == b'-';
                i += 1;
            }
        }
        let start = i;
        while let Some(&c) = bytes.get(i) {
            if !c.is_ascii_digit() {
                break;
            }
            exponent = (exponent * 10 + (c - b'0') as i64).min(EXPONENT_SATURATION);
            i += 1;
        }
        if i == start {
            return None;
        }
        if exponent_negative {
            exponent = -exponent;
        }
    }
    if i != bytes.len() {
        return None;
    }

    Some(Parsed::Finite {
        negative,
        digits,
        exponent: exponent - radix_position,
    })
}

impl Parsed {
    fn pack(self) -> Decimal128 {
        let (negative, mut digits, mut exponent) = match self {
            Parsed::NaN => return Decimal128::NAN,
            Parsed::Infinity { negative: true } => return Decimal128::NEG_INFINITY,
            Parsed::Infinity { negative: false } => return Decimal128::INFINITY,
            Parsed::Finite {
                negative,
                digits,
                exponent,
            } => (negative, digits, exponent),
        };

        // 系数放不下的低位数字和低于最小指数的部分需要舍入掉
        let excess = digits.len().saturating_sub(MAX_DIGITS) as i64;
        let drop = excess.max(EXPONENT_MIN - exponent);
        if drop > 0 {
            round_half_even(&mut digits, drop);
            exponent += drop;
            if digits.len() > MAX_DIGITS {
                // 进位产生了第 35 位,末位必然为 0
                digits.pop();
                exponent += 1;
            }
        }

        if digits.is_empty() {
            return pack(negative, 0, exponent.clamp(EXPONENT_MIN, EXPONENT_MAX));
        }

        while exponent > EXPONENT_MAX {
            if digits.len() >= MAX_DIGITS {
                return if negative {
                    Decimal128::NEG_INFINITY
                } else {
                    Decimal128::INFINITY
                };
            }
            digits.push(0);
            exponent -= 1;
        }

        pack(negative, coefficient_from_digits(&digits), exponent)
    }
}

/// 去掉末尾 `drop` 位数字,按四舍六入五取偶舍入
fn round_half_even(digits: &mut Vec<u8>, drop: i64) {
    if drop > digits.len() as i64 {
        digits.clear();
        return;
    }
    let keep = digits.len() - drop as usize;
    let round_digit = digits[keep];
    let sticky = digits[keep + 1..].iter().any(|&d| d != 0);
    let odd = keep > 0 && digits[keep - 1] % 2 == 1;
    let round_up = round_digit > 5 || (round_digit == 5 && (sticky || odd));

    digits.truncate(keep);
    if !round_up {
        return;
    }
    let mut idx = keep;
    loop {
        if idx == 0 {
            digits.insert(0, 1);
            return;
        }
        idx -= 1;
        if digits[idx] == 9 {
            digits[idx] = 0;
        } else {
            digits[idx] += 1;
            return;
        }
    }
}

/// 高 17 位与低 17 位分别在 u64 中累加,再合成 `high * 10^17 + low`
fn coefficient_from_digits(digits: &[u8]) -> u128 {
    let split = digits.len().saturating_sub(HALF_DIGITS);
    let (high, low) = digits.split_at(split);
    let fold = |acc: u64, d: &u8| acc * 10 + *d as u64;
    let high = high.iter().fold(0u64, fold);
    let low = low.iter().fold(0u64, fold);
    high as u128 * TEN_POW_17 + low as u128
}

fn pack(negative: bool, coefficient: u128, exponent: i64) -> Decimal128 {
    let biased = (exponent + EXPONENT_BIAS) as u64 & EXPONENT_MASK;
    let significand_high = (coefficient >> 64) as u64;
    let low = coefficient as u64;

    // 34 位系数小于 2^113,常规形式总能容纳;bit 113 置位时改用 `11` 组合形式
    let mut high = if (significand_high >> 49) & 1 == 1 {
        (0b11 << 61) | (biased << 47) | (significand_high & 0x7fff_ffff_ffff)
    } else {
        (biased << 49) | (significand_high & 0x1_ffff_ffff_ffff)
    };
    if negative {
        high |= SIGN_BIT;
    }
    Decimal128::from_words(high, low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn words(s: &str) -> (u64, u64) {
        Decimal128::from_string(s).words()
    }

    fn canonical(s: &str) -> String {
        Decimal128::from_string(s).to_string()
    }

    #[test]
    fn test_special_values() {
        assert_eq!(words("NaN"), (0x7C00_0000_0000_0000, 0));
        assert_eq!(words("-NaN"), (0x7C00_0000_0000_0000, 0));
        assert_eq!(words("Infinity"), (0x7800_0000_0000_0000, 0));
        assert_eq!(words("inf"), (0x7800_0000_0000_0000, 0));
        assert_eq!(words("-Infinity"), (0xF800_0000_0000_0000, 0));
        assert_eq!(Decimal128::NAN.to_string(), "NaN");
        assert_eq!(Decimal128::INFINITY.to_string(), "Infinity");
        assert_eq!(Decimal128::NEG_INFINITY.to_string(), "-Infinity");
        assert!(Decimal128::NAN.is_nan());
        assert!(Decimal128::NEG_INFINITY.is_infinite());
        assert!(Decimal128::NEG_INFINITY.is_negative());
    }

    #[test]
    fn test_zero_and_small_values() {
        assert_eq!(words("0"), (0x3040_0000_0000_0000, 0));
        assert_eq!(words("-0"), (0xB040_0000_0000_0000, 0));
        assert_eq!(words("1"), (0x3040_0000_0000_0000, 1));
        assert_eq!(words("-1"), (0xB040_0000_0000_0000, 1));
        assert_eq!(words("0.1"), (0x303E_0000_0000_0000, 1));
        assert_eq!(words("1E-6176"), (0, 1));
        assert_eq!(words("-1E-6176"), (0x8000_0000_0000_0000, 1));
        assert_eq!(
            Decimal128::from_string("0").bytes(),
            [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x40, 0x30]
        );
    }

    #[test]
    fn test_largest_value() {
        assert_eq!(
            words("9.999999999999999999999999999999999E+6144"),
            (0x5FFF_ED09_BEAD_87C0, 0x378D_8E63_FFFF_FFFF)
        );
        assert_eq!(
            canonical("9.999999999999999999999999999999999E+6144"),
            "9.999999999999999999999999999999999E+6144"
        );
    }

    #[test]
    fn test_to_string_formats() {
        assert_eq!(canonical("0.001234"), "0.001234");
        assert_eq!(canonical("123456789012"), "123456789012");
        assert_eq!(canonical("0.00000001"), "1E-8");
        assert_eq!(canonical("0.0000001"), "1E-7");
        assert_eq!(canonical("0.000001"), "0.000001");
        assert_eq!(canonical("1E+3"), "1E+3");
        assert_eq!(canonical("1e3"), "1E+3");
        assert_eq!(canonical("1000"), "1000");
        assert_eq!(canonical("-1.50"), "-1.50");
        assert_eq!(canonical("0.000"), "0.000");
        assert_eq!(canonical("0E-10"), "0E-10");
        assert_eq!(canonical("0E+3"), "0E+3");
        assert_eq!(canonical("-0"), "-0");
        assert_eq!(canonical(".5"), "0.5");
        assert_eq!(canonical("+12.34E2"), "1234");
        assert_eq!(canonical("00012"), "12");
    }

    #[test]
    fn test_malformed_input_is_nan() {
        for s in ["", "-", ".", "1.2.3", "1e", "1e+", "abc", "1x", "E5", "Infinit", "1 ", "+.e1"] {
            assert!(Decimal128::from_string(s).is_nan(), "{:?}", s);
            assert!(s.parse::<Decimal128>().is_err(), "{:?}", s);
        }
        assert_eq!("1.5".parse::<Decimal128>().unwrap().to_string(), "1.5");
    }

    #[test]
    fn test_clamping() {
        assert_eq!(canonical("1E+6112"), "1.0E+6112");
        assert_eq!(words("1E+6112"), (0x5FFE_0000_0000_0000, 10));
        assert_eq!(canonical("1E+6144"), "1.000000000000000000000000000000000E+6144");
        assert_eq!(canonical("0E+9999"), "0E+6111");
        assert_eq!(canonical("0E-9999"), "0E-6176");
        assert_eq!(canonical("-0E-9999"), "-0E-6176");
    }

    #[test]
    fn test_overflow_is_infinity() {
        assert!(Decimal128::from_string("1E+6145").is_infinite());
        assert_eq!(Decimal128::from_string("-1E+6145"), Decimal128::NEG_INFINITY);
        assert_eq!(
            Decimal128::from_string("9999999999999999999999999999999999E+6111"),
            Decimal128::from_string("9.999999999999999999999999999999999E+6144")
        );
    }

    #[test]
    fn test_round_half_even_on_digit_overflow() {
        assert_eq!(
            canonical("12345678901234567890123456789012345"),
            "1.234567890123456789012345678901234E+34"
        );
        assert_eq!(
            canonical("10000000000000000000000000000000005"),
            "1.000000000000000000000000000000000E+34"
        );
        assert_eq!(
            canonical("10000000000000000000000000000000015"),
            "1.000000000000000000000000000000002E+34"
        );
        assert_eq!(
            canonical("10000000000000000000000000000000006"),
            "1.000000000000000000000000000000001E+34"
        );
        assert_eq!(
            canonical("99999999999999999999999999999999999"),
            "1.000000000000000000000000000000000E+35"
        );
    }

    #[test]
    fn test_underflow_rounding() {
        assert_eq!(canonical("1E-6177"), "0E-6176");
        assert_eq!(canonical("5E-6177"), "0E-6176");
        assert_eq!(canonical("6E-6177"), "1E-6176");
        assert_eq!(canonical("15E-6177"), "2E-6176");
        assert_eq!(canonical("1E-99999999"), "0E-6176");
    }

    #[test]
    fn test_non_canonical_significand_reads_as_zero() {
        // `11` 组合形式,指数 0
        let d = Decimal128::from_words(0x6C10_0000_0000_0000, 0);
        assert_eq!(d.to_parts(), Some((0, 0)));
        assert_eq!(d.to_string(), "0");
        // 常规形式但系数超过 10^34 - 1
        let d = Decimal128::from_words(0x3041_ED09_BEAD_87C0, 0x378D_8E64_0000_0000);
        assert_eq!(d.to_string(), "0");
    }

    #[test]
    fn test_rust_decimal_interop() {
        let d = rust_decimal::Decimal::new(12345, 2);
        let dec: Decimal128 = d.into();
        assert_eq!(dec.to_string(), "123.45");
        let back: rust_decimal::Decimal = dec.try_into().unwrap();
        assert_eq!(back, d);
        assert!(rust_decimal::Decimal::try_from(Decimal128::NAN).is_err());
    }

    proptest! {
        #[test]
        fn prop_print_parse_fixed_point(
            negative in any::<bool>(),
            coefficient in 0u128..=MAX_SIGNIFICAND,
            exponent in EXPONENT_MIN..=EXPONENT_MAX,
        ) {
            let d = pack(negative, coefficient, exponent);
            let reparsed = Decimal128::from_string(&d.to_string());
            prop_assert_eq!(reparsed, d);
        }

        #[test]
        fn prop_integers_roundtrip(n in any::<i64>()) {
            let d = Decimal128::from_string(&n.to_string());
            prop_assert_eq!(d.to_string(), n.to_string());
        }
    }
}
