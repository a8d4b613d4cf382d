//! 错误处理模块
//!
//! 该模块提供 Sigil 共享模型层的统一错误类型。

use thiserror::Error;

/// Sigil 共享模型错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 定时表达式无法解析
    #[error("定时表达式无效 `{expression}`: {reason}")]
    Schedule {
        /// 原始表达式
        expression: String,
        /// 解析失败原因
        reason: String,
    },
}

/// Sigil 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;
