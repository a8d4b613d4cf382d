//! Securesign 组合资源
//!
//! 一个 Securesign 实例拥有 Trillian、Fulcio、Rekor、Ctlog 各一个子资源，
//! 其状态按组件镜像各子资源的 `Ready` 条件。

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sigil_common::{Condition, ManagedStatus, Phase};

use super::{CtlogSpec, FulcioSpec, Managed, RekorSpec, TrillianSpec};

/// Trillian 子资源条件
pub const TRILLIAN_AVAILABLE: &str = "TrillianAvailable";
/// Fulcio 子资源条件
pub const FULCIO_AVAILABLE: &str = "FulcioAvailable";
/// Rekor 子资源条件
pub const REKOR_AVAILABLE: &str = "RekorAvailable";
/// Ctlog 子资源条件
pub const CTLOG_AVAILABLE: &str = "CtlogAvailable";

/// Securesign 规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "rhtas.sigil.dev",
    version = "v1alpha1",
    kind = "Securesign",
    namespaced,
    status = "SecuresignStatus"
)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[serde(rename_all = "camelCase")]
pub struct SecuresignSpec {
    /// Trillian 子资源规范
    #[serde(default)]
    pub trillian: TrillianSpec,
    /// Fulcio 子资源规范
    #[serde(default)]
    pub fulcio: FulcioSpec,
    /// Rekor 子资源规范
    #[serde(default)]
    pub rekor: RekorSpec,
    /// Ctlog 子资源规范
    #[serde(default)]
    pub ctlog: CtlogSpec,
}

/// Securesign 状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecuresignStatus {
    /// 生命周期阶段
    #[serde(default)]
    pub phase: Phase,

    /// 条件列表
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Trillian 子资源名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trillian: Option<String>,

    /// Fulcio 子资源名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulcio: Option<String>,

    /// Rekor 子资源名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rekor: Option<String>,

    /// Ctlog 子资源名称
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctlog: Option<String>,
}

/// Securesign 状态字段补丁
#[derive(Debug, Clone, PartialEq)]
pub enum SecuresignField {
    /// Trillian 子资源
    Trillian(String),
    /// Fulcio 子资源
    Fulcio(String),
    /// Rekor 子资源
    Rekor(String),
    /// Ctlog 子资源
    Ctlog(String),
}

impl ManagedStatus for SecuresignStatus {
    type Field = SecuresignField;

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

    fn apply_field(&mut self, field: SecuresignField) {
        match field {
            SecuresignField::Trillian(name) => self.trillian = Some(name),
            SecuresignField::Fulcio(name) => self.fulcio = Some(name),
            SecuresignField::Rekor(name) => self.rekor = Some(name),
            SecuresignField::Ctlog(name) => self.ctlog = Some(name),
        }
    }
}

impl Managed for Securesign {
    type Status = SecuresignStatus;

    fn status(&self) -> Option<&SecuresignStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<SecuresignStatus> {
        &mut self.status
    }

    fn components(&self) -> Vec<&'static str> {
        vec![TRILLIAN_AVAILABLE, FULCIO_AVAILABLE, REKOR_AVAILABLE, CTLOG_AVAILABLE]
    }

    fn ready_message(&self) -> &'static str {
        "Securesign 全部组件已就绪"
    }
}
