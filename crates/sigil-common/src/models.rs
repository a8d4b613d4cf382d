//! 数据模型模块
//!
//! 该模块定义了受管资源状态的核心数据模型：阶段、条件、状态补丁归约器，
//! 以及用户提交的定时表达式的校验。

pub mod condition;
pub mod phase;
pub mod schedule;
pub mod status;
