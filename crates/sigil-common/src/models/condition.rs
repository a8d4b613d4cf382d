//! 条件模型
//!
//! 条件是附加在资源状态上的具名健康指示，取值 `True`、`False` 或 `Unknown`，
//! 并携带原因（reason）与消息（message）。本模块同时实现父资源对子组件条件的聚合规则。

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 资源整体就绪条件的类型名
pub const READY: &str = "Ready";

/// 条件取值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    /// 条件成立
    True,
    /// 条件不成立
    False,
    /// 尚无法判断
    Unknown,
}

impl ConditionStatus {
    /// 对外暴露时的严重程度，数值越大越优先被上报
    pub fn severity(self) -> u8 {
        match self {
            ConditionStatus::True => 0,
            ConditionStatus::Unknown => 1,
            ConditionStatus::False => 2,
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// 条件原因的受控词表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// 等待前置依赖
    Pending,
    /// 正在创建
    Creating,
    /// 等待就绪
    Initialize,
    /// 正在恢复
    Recovering,
    /// 失败
    Failure,
    /// 就绪
    Ready,
}

impl Reason {
    /// 原因的字符串形式
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Pending => "Pending",
            Reason::Creating => "Creating",
            Reason::Initialize => "Initialize",
            Reason::Recovering => "Recovering",
            Reason::Failure => "Failure",
            Reason::Ready => "Ready",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 资源状态中的单个条件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// 条件类型，例如 `Ready`、`ServerAvailable`
    #[serde(rename = "type")]
    pub type_: String,

    /// 条件取值
    pub status: ConditionStatus,

    /// 机器可读的原因
    #[serde(default)]
    pub reason: String,

    /// 人类可读的消息
    #[serde(default)]
    pub message: String,

    /// 上次取值变化的时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// 创建新的条件
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: Reason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.as_str().to_string(),
            message: message.into(),
            last_transition_time: None,
        }
    }

    /// `Unknown/Pending`，首次协调时的初始值
    pub fn pending(type_: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::Unknown, Reason::Pending, message)
    }

    /// `False/Creating`
    pub fn creating(type_: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::False, Reason::Creating, message)
    }

    /// `False/Initialize`
    pub fn initialize(type_: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::False, Reason::Initialize, message)
    }

    /// `True/Ready`
    pub fn ready(type_: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::True, Reason::Ready, message)
    }

    /// `False/Failure`
    pub fn failure(type_: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::False, Reason::Failure, message)
    }

    /// 条件是否为 `True`
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// 忽略时间戳比较两个条件
    pub fn same_observation(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// 按类型查找条件
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// 指定类型的条件是否存在且为 `True`
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).map_or(false, Condition::is_true)
}

/// 写入条件，返回观测值是否发生变化
///
/// 取值未变时保留原有的 `last_transition_time`。
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition, now: DateTime<Utc>) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.same_observation(&condition) {
                return false;
            }
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.or(Some(now))
            } else {
                Some(now)
            };
            *existing = condition;
            true
        }
        None => {
            condition.last_transition_time = Some(now);
            conditions.push(condition);
            true
        }
    }
}

/// 聚合组件条件得到整体 `Ready` 条件
///
/// 取最差的组件条件（`False` > `Unknown` > `True`），原样复制其原因与消息；
/// 只有全部组件为 `True` 时才以 `Ready/ready_message` 置为 `True`。
/// 缺失的组件条件视为 `Unknown/Pending`。
pub fn aggregate(conditions: &[Condition], components: &[&str], ready_message: &str) -> Condition {
    let worst = components
        .iter()
        .map(|component| {
            find_condition(conditions, component)
                .cloned()
                .unwrap_or_else(|| Condition::pending(*component, format!("{component} 尚未上报")))
        })
        .fold(None::<Condition>, |worst, candidate| match worst {
            Some(current) if current.status.severity() >= candidate.status.severity() => Some(current),
            _ => Some(candidate),
        });

    match worst {
        Some(worst) if !worst.is_true() => Condition {
            type_: READY.to_string(),
            status: worst.status,
            reason: worst.reason,
            message: worst.message,
            last_transition_time: None,
        },
        _ => Condition::ready(READY, ready_message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn test_aggregate_surfaces_false_reason() {
        let conditions = vec![
            Condition::ready("A", "ok"),
            Condition::new("B", ConditionStatus::False, Reason::Failure, "镜像拉取失败"),
            Condition::ready("C", "ok"),
        ];
        let ready = aggregate(&conditions, &["A", "B", "C"], "全部就绪");
        assert_eq!(ready.type_, READY);
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "Failure");
        assert_eq!(ready.message, "镜像拉取失败");
    }

    #[test]
    fn test_aggregate_false_wins_over_unknown() {
        let conditions = vec![
            Condition::pending("A", "等待"),
            Condition::initialize("B", "启动中"),
        ];
        let ready = aggregate(&conditions, &["A", "B"], "全部就绪");
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "Initialize");
    }

    #[test]
    fn test_aggregate_verbatim_copy_of_foreign_reason() {
        let mut child = Condition::failure("Child", "boom");
        child.reason = "ImagePullBackOff".to_string();
        let ready = aggregate(&[child], &["Child"], "全部就绪");
        assert_eq!(ready.reason, "ImagePullBackOff");
        assert_eq!(ready.message, "boom");
    }

    #[test]
    fn test_aggregate_missing_component_is_unknown() {
        let conditions = vec![Condition::ready("A", "ok")];
        let ready = aggregate(&conditions, &["A", "B"], "全部就绪");
        assert_eq!(ready.status, ConditionStatus::Unknown);
        assert_eq!(ready.reason, "Pending");
    }

    #[test]
    fn test_aggregate_all_true() {
        let conditions = vec![Condition::ready("A", "ok"), Condition::ready("B", "ok")];
        let ready = aggregate(&conditions, &["A", "B"], "全部就绪");
        assert!(ready.is_true());
        assert_eq!(ready.reason, "Ready");
        assert_eq!(ready.message, "全部就绪");
    }

    #[test]
    fn test_set_condition_keeps_transition_time_when_status_unchanged() {
        let mut conditions = Vec::new();
        assert!(set_condition(&mut conditions, Condition::initialize("A", "等待"), at(10)));
        assert!(set_condition(&mut conditions, Condition::initialize("A", "仍在等待"), at(20)));
        assert_eq!(conditions[0].last_transition_time, Some(at(10)));
        assert_eq!(conditions[0].message, "仍在等待");

        assert!(set_condition(&mut conditions, Condition::ready("A", "ok"), at(30)));
        assert_eq!(conditions[0].last_transition_time, Some(at(30)));

        assert!(!set_condition(&mut conditions, Condition::ready("A", "ok"), at(40)));
        assert_eq!(conditions.len(), 1);
    }
}
