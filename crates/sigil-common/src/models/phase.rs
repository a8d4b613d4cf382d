//! 资源阶段模型
//!
//! 受管资源按 `None → Pending → Creating → Initialize → Ready` 单调推进，
//! `Error` 可从任意阶段进入且不会自动退出。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 资源生命周期阶段
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum Phase {
    /// 尚未开始协调
    #[default]
    None,
    /// 等待前置依赖
    Pending,
    /// 正在创建子对象
    Creating,
    /// 子对象已创建，等待其就绪
    Initialize,
    /// 所有组件就绪
    Ready,
    /// 致命错误，终止态
    Error,
}

impl Phase {
    /// 判断从 `self` 迁移到 `next` 是否合法
    ///
    /// 普通阶段只能前进或保持不变；`Error` 可从任意阶段进入，进入后不再离开。
    pub fn can_transition(self, next: Phase) -> bool {
        match (self, next) {
            (Phase::Error, Phase::Error) => true,
            (Phase::Error, _) => false,
            (_, Phase::Error) => true,
            (current, next) => next >= current,
        }
    }

    /// 是否为终止态
    pub fn is_terminal(self) -> bool {
        self == Phase::Error
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::None => "None",
            Phase::Pending => "Pending",
            Phase::Creating => "Creating",
            Phase::Initialize => "Initialize",
            Phase::Ready => "Ready",
            Phase::Error => "Error",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Phase::None, Phase::Pending, true)]
    #[case(Phase::Pending, Phase::Creating, true)]
    #[case(Phase::Creating, Phase::Ready, true)]
    #[case(Phase::Ready, Phase::Ready, true)]
    #[case(Phase::Initialize, Phase::Creating, false)]
    #[case(Phase::Ready, Phase::Pending, false)]
    #[case(Phase::Pending, Phase::Error, true)]
    #[case(Phase::Ready, Phase::Error, true)]
    #[case(Phase::Error, Phase::Ready, false)]
    #[case(Phase::Error, Phase::None, false)]
    fn test_transitions(#[case] from: Phase, #[case] to: Phase, #[case] allowed: bool) {
        assert_eq!(from.can_transition(to), allowed);
    }

    #[test]
    fn test_default_is_none() {
        assert_eq!(Phase::default(), Phase::None);
        assert!(!Phase::default().is_terminal());
        assert!(Phase::Error.is_terminal());
    }
}
