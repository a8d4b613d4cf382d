//! 动作流水线
//!
//! 流水线按阶段组织：每个阶段显式列出合法的动作及其顺序，顺序即依赖关系（前置条件在前）。
//! 一轮协调只执行资源在本轮开始时所处阶段的动作列表：
//!
//! - 谓词不成立的动作被跳过；
//! - 动作返回的补丁立即经归约器应用到工作副本，后续动作看到的是更新后的状态；
//! - 第一个非 `Continue` 的结果结束本轮；
//! - 冲突或取消会丢弃本轮已累积的全部补丁。

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use sigil_common::{reduce, ManagedStatus, Phase, Rejection};

use crate::action::{Action, Flow, Pass};
use crate::crd::{current_status, phase_of, Managed};
use crate::error::{OperatorError, Result};

/// 一轮执行的报告
pub struct PassReport<R: Managed> {
    /// 归约后的状态
    pub status: R::Status,
    /// 结束本轮的流程结果
    pub flow: Flow,
    /// 实际执行过的动作
    pub handled: Vec<&'static str>,
    /// 被归约器拒绝的变更
    pub rejected: Vec<Rejection>,
}

/// 按阶段组织的动作流水线
pub struct Pipeline<R: Managed> {
    phases: BTreeMap<Phase, Vec<Arc<dyn Action<R>>>>,
}

/// 流水线构造器
pub struct PipelineBuilder<R: Managed> {
    phases: BTreeMap<Phase, Vec<Arc<dyn Action<R>>>>,
}

impl<R: Managed> PipelineBuilder<R> {
    /// 为阶段追加动作
    pub fn phase(mut self, phase: Phase, actions: impl IntoIterator<Item = Arc<dyn Action<R>>>) -> Self {
        self.phases.entry(phase).or_default().extend(actions);
        self
    }

    /// 校验并构造流水线
    ///
    /// 同一阶段内动作名称重复、或为 `Error` 阶段注册动作，都是构造错误。
    pub fn build(self) -> Result<Pipeline<R>> {
        for (phase, actions) in &self.phases {
            if phase.is_terminal() && !actions.is_empty() {
                return Err(OperatorError::Pipeline(format!("终止阶段 {phase} 不能注册动作")));
            }
            let mut seen = HashSet::new();
            for action in actions {
                if !seen.insert(action.name()) {
                    return Err(OperatorError::Pipeline(format!(
                        "阶段 {phase} 中动作 {} 重复注册",
                        action.name()
                    )));
                }
            }
        }
        Ok(Pipeline { phases: self.phases })
    }
}

impl<R: Managed> Pipeline<R> {
    /// 创建构造器
    pub fn builder() -> PipelineBuilder<R> {
        PipelineBuilder {
            phases: BTreeMap::new(),
        }
    }

    /// 阶段的动作名称，按执行顺序
    pub fn action_names(&self, phase: Phase) -> Vec<&'static str> {
        self.phases
            .get(&phase)
            .map(|actions| actions.iter().map(|a| a.name()).collect())
            .unwrap_or_default()
    }

    /// 对资源执行一轮
    pub async fn run(&self, pass: &Pass, resource: &R) -> PassReport<R> {
        let original = current_status(resource);
        let components = resource.components();
        let phase = phase_of(resource);

        let mut working = resource.clone();
        let mut status = original.clone();
        let mut handled = Vec::new();
        let mut rejected = Vec::new();

        for action in self.phases.get(&phase).into_iter().flatten() {
            if pass.cancel().is_cancelled() {
                return PassReport {
                    status: original,
                    flow: Flow::Cancelled,
                    handled,
                    rejected,
                };
            }
            if !action.can_handle(&working) {
                continue;
            }

            debug!(phase = %phase, action = action.name(), "执行动作");
            handled.push(action.name());
            let outcome = action.handle(pass, &working).await;

            if !outcome.flow.persists() {
                debug!(action = action.name(), flow = outcome.flow.label(), "丢弃本轮状态补丁");
                return PassReport {
                    status: original,
                    flow: outcome.flow,
                    handled,
                    rejected,
                };
            }

            let reduction = reduce(status, outcome.patch, &components, pass.now());
            if !reduction.rejected.is_empty() {
                warn!(action = action.name(), rejected = ?reduction.rejected, "状态变更被拒绝");
            }
            status = reduction.status;
            rejected.extend(reduction.rejected);
            *working.status_mut() = Some(status.clone());

            if !matches!(outcome.flow, Flow::Continue) {
                return PassReport {
                    status,
                    flow: outcome.flow,
                    handled,
                    rejected,
                };
            }
        }

        debug!(phase = %status.phase(), handled = handled.len(), "本轮动作执行完毕");
        PassReport {
            status,
            flow: Flow::Done,
            handled,
            rejected,
        }
    }
}
