//! Sigil Common - 跨模块共享的状态模型
//!
//! 该模块提供 Sigil 各组件共享的数据结构与错误处理，包括资源阶段（Phase）、
//! 条件（Condition）、状态补丁归约器以及定时表达式校验。
//! 这些类型不依赖 Kubernetes 客户端，可以独立测试。

pub mod error;
pub mod models;

/// 重新导出常用类型，方便使用
pub use error::Error;
pub use error::Result;
pub use models::condition::*;
pub use models::phase::*;
pub use models::schedule::*;
pub use models::status::*;
