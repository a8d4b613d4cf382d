//! 状态补丁与归约器
//!
//! 动作不直接修改资源状态，而是返回 [`StatusPatch`]；[`reduce`] 将补丁应用到状态副本上，
//! 并在此过程中保证两条不变式：
//!
//! - 阶段单调推进（`Error` 除外，且 `Error` 不可离开）；
//! - `Ready=True` 仅在所有组件条件均为 `True` 时成立，阶段 `Ready` 仅在 `Ready=True` 时可达。

use chrono::{DateTime, Utc};
use std::fmt;
use tracing::debug;

use crate::models::condition::{aggregate, is_condition_true, set_condition, Condition, READY};
use crate::models::phase::Phase;

/// 受管资源状态需要实现的接口
pub trait ManagedStatus: Clone + Default + PartialEq + Send + Sync {
    /// 资源特有字段的补丁类型，例如树 ID、服务地址
    type Field: Clone + fmt::Debug + Send + Sync;

    /// 当前阶段
    fn phase(&self) -> Phase;

    /// 设置阶段，仅由归约器调用
    fn set_phase(&mut self, phase: Phase);

    /// 当前条件列表
    fn conditions(&self) -> &[Condition];

    /// 可变条件列表，仅由归约器调用
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    /// 应用资源特有字段
    fn apply_field(&mut self, field: Self::Field);
}

/// 动作返回的状态补丁
#[derive(Debug, Clone)]
pub struct StatusPatch<F> {
    /// 目标阶段
    pub phase: Option<Phase>,
    /// 需要写入的条件
    pub conditions: Vec<Condition>,
    /// 资源特有字段
    pub fields: Vec<F>,
}

impl<F> Default for StatusPatch<F> {
    fn default() -> Self {
        Self {
            phase: None,
            conditions: Vec::new(),
            fields: Vec::new(),
        }
    }
}

impl<F> StatusPatch<F> {
    /// 创建空补丁
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置目标阶段
    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// 追加条件
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// 追加资源特有字段
    pub fn field(mut self, field: F) -> Self {
        self.fields.push(field);
        self
    }

    /// 补丁是否为空
    pub fn is_empty(&self) -> bool {
        self.phase.is_none() && self.conditions.is_empty() && self.fields.is_empty()
    }
}

/// 归约器拒绝的变更
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// 阶段回退
    PhaseRegression {
        /// 当前阶段
        from: Phase,
        /// 请求的阶段
        to: Phase,
    },
    /// 组件未全部就绪时请求 `Ready=True`
    ReadyWithPendingComponents,
    /// `Ready` 条件不为 `True` 时请求 `Ready` 阶段
    ReadyPhaseWithoutReadyCondition,
}

/// 归约结果
#[derive(Debug, Clone)]
pub struct Reduction<S> {
    /// 新状态
    pub status: S,
    /// 被拒绝的变更
    pub rejected: Vec<Rejection>,
}

/// 将补丁应用到状态上
///
/// `components` 为该资源当前声明的组件条件类型。
pub fn reduce<S: ManagedStatus>(
    mut status: S,
    patch: StatusPatch<S::Field>,
    components: &[&str],
    now: DateTime<Utc>,
) -> Reduction<S> {
    let mut rejected = Vec::new();

    for field in patch.fields {
        status.apply_field(field);
    }

    for condition in patch.conditions {
        set_condition(status.conditions_mut(), condition, now);
    }

    let components_ready = components
        .iter()
        .all(|component| is_condition_true(status.conditions(), component));
    if is_condition_true(status.conditions(), READY) && !components_ready {
        let downgraded = aggregate(status.conditions(), components, "");
        debug!(reason = %downgraded.reason, "组件未全部就绪，拒绝 Ready=True");
        set_condition(status.conditions_mut(), downgraded, now);
        rejected.push(Rejection::ReadyWithPendingComponents);
    }

    if let Some(next) = patch.phase {
        let current = status.phase();
        if !current.can_transition(next) {
            debug!(from = %current, to = %next, "拒绝阶段回退");
            rejected.push(Rejection::PhaseRegression { from: current, to: next });
        } else if next == Phase::Ready && !is_condition_true(status.conditions(), READY) {
            rejected.push(Rejection::ReadyPhaseWithoutReadyCondition);
        } else {
            status.set_phase(next);
        }
    }

    Reduction { status, rejected }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::condition::{find_condition, ConditionStatus};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct TestStatus {
        phase: Phase,
        conditions: Vec<Condition>,
        url: Option<String>,
    }

    #[derive(Debug, Clone)]
    enum TestField {
        Url(String),
    }

    impl ManagedStatus for TestStatus {
        type Field = TestField;

        fn phase(&self) -> Phase {
            self.phase
        }

        fn set_phase(&mut self, phase: Phase) {
            self.phase = phase;
        }

        fn conditions(&self) -> &[Condition] {
            &self.conditions
        }

        fn conditions_mut(&mut self) -> &mut Vec<Condition> {
            &mut self.conditions
        }

        fn apply_field(&mut self, field: TestField) {
            match field {
                TestField::Url(url) => self.url = Some(url),
            }
        }
    }

    const COMPONENTS: &[&str] = &["ServerAvailable", "DbAvailable"];

    fn status_in(phase: Phase) -> TestStatus {
        TestStatus {
            phase,
            ..Default::default()
        }
    }

    #[test]
    fn test_forward_transition_and_fields() {
        let patch = StatusPatch::new()
            .phase(Phase::Pending)
            .condition(Condition::pending("ServerAvailable", "等待"))
            .field(TestField::Url("http://trillian:8091".into()));
        let out = reduce(TestStatus::default(), patch, COMPONENTS, Utc::now());
        assert!(out.rejected.is_empty());
        assert_eq!(out.status.phase, Phase::Pending);
        assert_eq!(out.status.url.as_deref(), Some("http://trillian:8091"));
        assert_eq!(out.status.conditions.len(), 1);
    }

    #[test]
    fn test_phase_regression_rejected() {
        let patch = StatusPatch::<TestField>::new().phase(Phase::Creating);
        let out = reduce(status_in(Phase::Initialize), patch, COMPONENTS, Utc::now());
        assert_eq!(out.status.phase, Phase::Initialize);
        assert_eq!(
            out.rejected,
            vec![Rejection::PhaseRegression {
                from: Phase::Initialize,
                to: Phase::Creating
            }]
        );
    }

    #[test]
    fn test_error_is_absorbing() {
        let patch = StatusPatch::<TestField>::new().phase(Phase::Error);
        let out = reduce(status_in(Phase::Creating), patch, COMPONENTS, Utc::now());
        assert_eq!(out.status.phase, Phase::Error);

        let patch = StatusPatch::<TestField>::new().phase(Phase::Ready);
        let out = reduce(out.status, patch, COMPONENTS, Utc::now());
        assert_eq!(out.status.phase, Phase::Error);
    }

    #[test]
    fn test_ready_requires_all_components() {
        let patch = StatusPatch::<TestField>::new()
            .condition(Condition::ready("ServerAvailable", "ok"))
            .condition(Condition::initialize("DbAvailable", "数据库启动中"))
            .condition(Condition::ready(READY, "ok"))
            .phase(Phase::Ready);
        let out = reduce(status_in(Phase::Initialize), patch, COMPONENTS, Utc::now());

        assert_eq!(out.status.phase, Phase::Initialize);
        let ready = find_condition(&out.status.conditions, READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "Initialize");
        assert_eq!(ready.message, "数据库启动中");
        assert!(out.rejected.contains(&Rejection::ReadyWithPendingComponents));
        assert!(out.rejected.contains(&Rejection::ReadyPhaseWithoutReadyCondition));
    }

    #[test]
    fn test_ready_phase_reached_when_components_true() {
        let patch = StatusPatch::<TestField>::new()
            .condition(Condition::ready("ServerAvailable", "ok"))
            .condition(Condition::ready("DbAvailable", "ok"))
            .condition(Condition::ready(READY, "ok"))
            .phase(Phase::Ready);
        let out = reduce(status_in(Phase::Initialize), patch, COMPONENTS, Utc::now());
        assert!(out.rejected.is_empty());
        assert_eq!(out.status.phase, Phase::Ready);
    }
}
