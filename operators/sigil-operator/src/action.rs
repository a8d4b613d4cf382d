//! 动作与单轮协调上下文
//!
//! 每个动作由谓词 [`Action::can_handle`] 与处理函数 [`Action::handle`] 组成。
//! 处理函数不修改资源本身，而是返回 [`Outcome`]：一个状态补丁加上流程控制 [`Flow`]，
//! 由流水线统一归约并决定是否继续执行下一个动作。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::Resource;
use sigil_common::{Condition, Phase, StatusPatch, READY};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::context::Context;
use crate::crd::{Field, Managed};
use crate::error::OperatorError;
use crate::events::EventRecord;
use crate::store::ScopedStore;

/// 动作执行后的流程控制
#[derive(Debug)]
pub enum Flow {
    /// 继续执行本轮的下一个动作
    Continue,
    /// 结束本轮，在指定时间后重新协调
    Requeue(Duration),
    /// 持久化阶段迁移并立即重新协调
    Transition,
    /// 本轮完成，按周期重新协调
    Done,
    /// 依赖尚未就绪，短暂等待后重试
    Waiting(OperatorError),
    /// 乐观并发冲突，丢弃本轮补丁
    Conflict,
    /// 暂时性失败
    Failed(OperatorError),
    /// 不可重试的失败，资源进入 `Error` 阶段
    Fatal(OperatorError),
    /// 本轮被取消
    Cancelled,
}

impl Flow {
    /// 指标与日志使用的标签
    pub fn label(&self) -> &'static str {
        match self {
            Flow::Continue | Flow::Done => "done",
            Flow::Requeue(_) => "requeue",
            Flow::Transition => "transition",
            Flow::Waiting(_) => "waiting",
            Flow::Conflict => "conflict",
            Flow::Failed(_) => "failed",
            Flow::Fatal(_) => "fatal",
            Flow::Cancelled => "cancelled",
        }
    }

    /// 本轮的状态补丁是否需要持久化
    pub fn persists(&self) -> bool {
        !matches!(self, Flow::Conflict | Flow::Cancelled)
    }

    /// 需要上报给调用方的错误：依赖等待不算失败
    pub fn into_error(self) -> Option<OperatorError> {
        match self {
            Flow::Failed(e) | Flow::Fatal(e) => Some(e),
            _ => None,
        }
    }
}

/// 动作的执行结果
pub struct Outcome<R: Managed> {
    /// 状态补丁
    pub patch: StatusPatch<Field<R>>,
    /// 流程控制
    pub flow: Flow,
}

impl<R: Managed> Outcome<R> {
    /// 不修改状态，继续下一个动作
    pub fn next() -> Self {
        Self::next_with(StatusPatch::new())
    }

    /// 应用补丁后继续下一个动作
    pub fn next_with(patch: StatusPatch<Field<R>>) -> Self {
        Self {
            patch,
            flow: Flow::Continue,
        }
    }

    /// 应用补丁后结束本轮，延迟重新协调
    pub fn requeue(patch: StatusPatch<Field<R>>, after: Duration) -> Self {
        Self {
            patch,
            flow: Flow::Requeue(after),
        }
    }

    /// 持久化阶段迁移，结束本轮
    pub fn transition(patch: StatusPatch<Field<R>>) -> Self {
        Self {
            patch,
            flow: Flow::Transition,
        }
    }

    /// 应用补丁，本轮完成
    pub fn done(patch: StatusPatch<Field<R>>) -> Self {
        Self {
            patch,
            flow: Flow::Done,
        }
    }

    /// 按错误类别生成结果
    ///
    /// 冲突不修改状态；依赖未就绪只等待；配置错误进入 `Error` 阶段；
    /// 其余错误把 `condition` 与 `Ready` 置为 `False/Failure`。
    pub fn failed(condition: &str, error: OperatorError) -> Self {
        if error.is_cancelled() {
            return Self {
                patch: StatusPatch::new(),
                flow: Flow::Cancelled,
            };
        }
        if error.is_conflict() {
            return Self {
                patch: StatusPatch::new(),
                flow: Flow::Conflict,
            };
        }
        if error.is_fatal() {
            return Self::fatal(condition, error);
        }
        if error.is_not_found() {
            return Self {
                patch: StatusPatch::new(),
                flow: Flow::Waiting(error),
            };
        }
        Self {
            patch: failure_patch(condition, &error),
            flow: Flow::Failed(error),
        }
    }

    /// 不可重试的失败
    pub fn fatal(condition: &str, error: OperatorError) -> Self {
        Self {
            patch: failure_patch(condition, &error).phase(Phase::Error),
            flow: Flow::Fatal(error),
        }
    }
}

fn failure_patch<F>(condition: &str, error: &OperatorError) -> StatusPatch<F> {
    let message = error.to_string();
    let patch = StatusPatch::new().condition(Condition::failure(condition, message.clone()));
    if condition == READY {
        patch
    } else {
        patch.condition(Condition::failure(READY, message))
    }
}

/// 单轮协调上下文
///
/// 持有共享依赖与本轮的取消令牌，动作通过它访问存储、协作方与事件。
pub struct Pass {
    context: Arc<Context>,
    cancel: CancellationToken,
    now: DateTime<Utc>,
}

impl Pass {
    /// 创建新的单轮上下文
    pub fn new(context: Arc<Context>, cancel: CancellationToken) -> Self {
        Self {
            context,
            cancel,
            now: Utc::now(),
        }
    }

    /// 共享依赖
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// 绑定到本轮取消令牌的存储
    pub fn store(&self) -> ScopedStore<'_> {
        ScopedStore::new(self.context.store.as_ref(), &self.cancel)
    }

    /// 本轮取消令牌
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 本轮开始时间，用于条件的迁移时间
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// 记录审计事件，失败只记录日志
    pub async fn record<K: Resource<DynamicType = ()>>(&self, resource: &K, event: EventRecord) {
        let reference = resource.object_ref(&());
        if let Err(e) = self.context.events.publish(reference, event).await {
            warn!("记录事件失败: {}", e);
        }
    }
}

/// 协调动作
#[async_trait]
pub trait Action<R: Managed>: Send + Sync {
    /// 动作名称，在同一阶段内唯一
    fn name(&self) -> &'static str;

    /// 是否适用于资源的当前状态
    fn can_handle(&self, resource: &R) -> bool;

    /// 执行动作
    async fn handle(&self, pass: &Pass, resource: &R) -> Outcome<R>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::Rekor;
    use crate::error::{ObjectKey, StoreError};
    use sigil_common::{find_condition, ConditionStatus};

    fn key() -> ObjectKey {
        ObjectKey::new("Secret", "sigstore", "rekor-signer")
    }

    #[test]
    fn test_conflict_carries_no_patch() {
        let outcome = Outcome::<Rekor>::failed("ServerAvailable", StoreError::Conflict(key()).into());
        assert!(matches!(outcome.flow, Flow::Conflict));
        assert!(outcome.patch.is_empty());
        assert!(!outcome.flow.persists());
    }

    #[test]
    fn test_transient_failure_marks_condition_and_ready() {
        let outcome = Outcome::<Rekor>::failed("ServerAvailable", StoreError::Transport("eof".into()).into());
        assert!(matches!(outcome.flow, Flow::Failed(_)));
        let server = find_condition(&outcome.patch.conditions, "ServerAvailable").unwrap();
        assert_eq!(server.status, ConditionStatus::False);
        assert_eq!(server.reason, "Failure");
        assert!(find_condition(&outcome.patch.conditions, READY).is_some());
        assert_eq!(outcome.patch.phase, None);
    }

    #[test]
    fn test_invalid_spec_is_fatal() {
        let outcome = Outcome::<Rekor>::failed(READY, OperatorError::InvalidSpec("坏的定时表达式".into()));
        assert!(matches!(outcome.flow, Flow::Fatal(_)));
        assert_eq!(outcome.patch.phase, Some(Phase::Error));
        assert_eq!(outcome.patch.conditions.len(), 1);
    }

    #[test]
    fn test_missing_dependency_waits() {
        let outcome = Outcome::<Rekor>::failed(
            READY,
            OperatorError::DependencyNotReady {
                kind: "Trillian".into(),
                reason: "无就绪实例".into(),
            },
        );
        assert!(matches!(outcome.flow, Flow::Waiting(_)));
        assert!(outcome.patch.is_empty());
    }

    #[test]
    fn test_cancelled_is_not_persisted() {
        let outcome = Outcome::<Rekor>::failed(READY, StoreError::Cancelled.into());
        assert!(matches!(outcome.flow, Flow::Cancelled));
        assert!(!outcome.flow.persists());
    }
}
