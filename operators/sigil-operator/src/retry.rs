//! 重试策略
//!
//! 把一轮协调的流程结果映射为重新入队的时间。`None` 表示不再自动重试。

use std::time::Duration;

use crate::action::Flow;
use crate::config::RetryConfig;
use crate::error::OperatorError;

/// 重新入队策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 乐观并发冲突
    pub conflict: Duration,
    /// 暂时性错误
    pub transient: Duration,
    /// 依赖尚未就绪
    pub dependency: Duration,
    /// 稳定状态下的周期性重新协调
    pub resync: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            conflict: Duration::from_secs(1),
            transient: Duration::from_secs(5),
            dependency: Duration::from_secs(10),
            resync: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// 从配置创建
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            conflict: Duration::from_secs(config.conflict_secs),
            transient: Duration::from_secs(config.transient_secs),
            dependency: Duration::from_secs(config.dependency_secs),
            resync: Duration::from_secs(config.resync_secs),
        }
    }

    /// 流程结果对应的重新入队时间
    pub fn requeue_after(&self, flow: &Flow) -> Option<Duration> {
        match flow {
            Flow::Continue | Flow::Done => Some(self.resync),
            Flow::Requeue(after) => Some(*after),
            Flow::Transition => Some(Duration::ZERO),
            Flow::Waiting(_) => Some(self.dependency),
            Flow::Conflict => Some(self.conflict),
            Flow::Failed(_) => Some(self.transient),
            Flow::Fatal(_) | Flow::Cancelled => None,
        }
    }

    /// 流水线之外的错误（加载资源、写入状态）对应的重新入队时间
    pub fn requeue_for_error(&self, error: &OperatorError) -> Option<Duration> {
        if error.is_cancelled() || error.is_fatal() {
            None
        } else if error.is_conflict() {
            Some(self.conflict)
        } else if error.is_not_found() {
            Some(self.dependency)
        } else {
            Some(self.transient)
        }
    }
}
