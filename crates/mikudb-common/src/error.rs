//! 错误类型定义模块
//!
//! 定义 MikuDB 公共层的错误类型 MikuError 和 Result 别名。

use thiserror::Error;

/// MikuDB 公共错误类型
#[derive(Error, Debug)]
pub enum MikuError {
    /// I/O 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 配置错误(解析失败或取值非法)
    #[error("Config error: {0}")]
    Config(String),

    /// ObjectId 无效
    #[error("Invalid ObjectId: {0}")]
    InvalidObjectId(String),

    /// 验证错误
    #[error("Validation error: {0}")]
    Validation(String),
}

/// MikuDB Result 类型别名
pub type MikuResult<T> = Result<T, MikuError>;
