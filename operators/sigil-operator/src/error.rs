//! 错误类型
//!
//! [`StoreError`] 描述对象存储层的失败，[`OperatorError`] 是动作与协调入口使用的统一错误。
//! 重试策略依据这里的分类方法决定重新入队的时机。

use std::fmt;
use thiserror::Error;

/// 存储中对象的标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// 对象种类
    pub kind: String,
    /// 命名空间
    pub namespace: String,
    /// 名称
    pub name: String,
}

impl ObjectKey {
    /// 创建对象标识
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// 对象存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 对象不存在
    #[error("对象不存在: {0}")]
    NotFound(ObjectKey),

    /// 创建时对象已存在
    #[error("对象已存在: {0}")]
    AlreadyExists(ObjectKey),

    /// 乐观并发冲突，对象在读取后已被修改
    #[error("对象版本冲突: {0}")]
    Conflict(ObjectKey),

    /// 本轮协调已被取消
    #[error("存储操作已取消")]
    Cancelled,

    /// 存储 API 返回的其他错误
    #[error("存储 API 错误 ({code} {reason}): {message}")]
    Api {
        /// HTTP 状态码
        code: u16,
        /// 机器可读原因
        reason: String,
        /// 错误消息
        message: String,
    },

    /// 客户端传输错误
    #[error("存储客户端错误: {0}")]
    Transport(String),

    /// 对象序列化失败
    #[error("对象序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// 是否为乐观并发冲突
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// 是否为对象不存在
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// 是否为创建冲突
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}

/// Operator 统一错误类型
#[derive(Debug, Error)]
pub enum OperatorError {
    /// 存储错误
    #[error(transparent)]
    Store(#[from] StoreError),

    /// 依赖资源尚未就绪
    #[error("依赖 {kind} 尚未就绪: {reason}")]
    DependencyNotReady {
        /// 依赖种类
        kind: String,
        /// 原因
        reason: String,
    },

    /// 网络探测在重试预算内均失败
    #[error("探测 {url} 失败，已尝试 {attempts} 次: {last_error}")]
    FetchExhausted {
        /// 探测地址
        url: String,
        /// 尝试次数
        attempts: u32,
        /// 最后一次失败原因
        last_error: String,
    },

    /// 用户提交的配置无效，不可重试
    #[error("资源配置无效: {0}")]
    InvalidSpec(String),

    /// 共享模型错误
    #[error(transparent)]
    Model(#[from] sigil_common::Error),

    /// 外部协作方（密钥生成、日志树创建等）失败
    #[error("外部协作方失败: {0}")]
    Collaborator(String),

    /// 动作流水线构造错误
    #[error("动作流水线无效: {0}")]
    Pipeline(String),

    /// 本轮协调已被取消
    #[error("协调已取消")]
    Cancelled,
}

impl OperatorError {
    /// 是否为乐观并发冲突
    pub fn is_conflict(&self) -> bool {
        matches!(self, OperatorError::Store(e) if e.is_conflict())
    }

    /// 是否为对象或依赖不存在
    pub fn is_not_found(&self) -> bool {
        matches!(self, OperatorError::Store(e) if e.is_not_found())
            || matches!(self, OperatorError::DependencyNotReady { .. })
    }

    /// 是否为不可重试的配置错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OperatorError::InvalidSpec(_) | OperatorError::Model(sigil_common::Error::Schedule { .. })
        )
    }

    /// 是否因取消而中止
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OperatorError::Cancelled | OperatorError::Store(StoreError::Cancelled))
    }
}

/// Operator 结果类型别名
pub type Result<T> = std::result::Result<T, OperatorError>;
