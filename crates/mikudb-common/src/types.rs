//! 公共类型定义模块
//!
//! ObjectId: 12 字节唯一标识符(BSON 0x07 类型的线格式)。
//! 生成策略不在本 crate 内,这里只负责字节形态、十六进制表示和时间戳读取。

use crate::error::{MikuError, MikuResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ObjectId 的字节长度
pub const OBJECT_ID_LEN: usize = 12;

/// ObjectId - 12 字节唯一标识符
///
/// 格式:
/// - 前 4 字节: 时间戳(秒,大端)
/// - 后 8 字节: 由生成方决定(进程标识 + 计数器)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    pub const fn from_bytes(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// # Brief
    /// 从切片构造 ObjectId
    ///
    /// # Arguments
    /// * `bytes` - 必须恰好 12 字节
    ///
    /// # Returns
    /// 长度不符时返回 `MikuError::InvalidObjectId`
    pub fn from_slice(bytes: &[u8]) -> MikuResult<Self> {
        let arr: [u8; OBJECT_ID_LEN] = bytes.try_into().map_err(|_| {
            MikuError::InvalidObjectId(format!(
                "ObjectId must be {} bytes, got {}",
                OBJECT_ID_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> MikuResult<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| MikuError::InvalidObjectId(format!("Invalid hex: {}", e)))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = MikuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; OBJECT_ID_LEN]> for ObjectId {
    fn from(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        Self(bytes)
    }
}
