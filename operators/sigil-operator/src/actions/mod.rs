//! 各资源的动作与流水线
//!
//! [`common`] 提供阶段迁移、子对象收敛、就绪探测等通用动作；
//! 每个资源模块组合这些动作并补充自身特有的部分，对外只暴露 `pipeline()`。

pub mod common;
pub mod ctlog;
pub mod fulcio;
pub mod rekor;
pub mod securesign;
pub mod trillian;
