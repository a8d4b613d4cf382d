//! Ctlog 证书透明日志资源

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sigil_common::{Condition, ManagedStatus, Phase};

use super::rekor::TrillianRef;
use super::{Managed, SERVER_AVAILABLE};

/// Ctlog 规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "rhtas.sigil.dev",
    version = "v1alpha1",
    kind = "Ctlog",
    namespaced,
    status = "CtlogStatus"
)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[serde(rename_all = "camelCase")]
pub struct CtlogSpec {
    /// Trillian 日志后端
    #[serde(default)]
    pub trillian: TrillianRef,

    /// 指定已有的日志树，缺省时自动创建
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_id: Option<i64>,

    /// 外部 Fulcio 地址，缺省时在同一命名空间中查找就绪的 Fulcio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulcio_url: Option<String>,
}

/// Ctlog 状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CtlogStatus {
    /// 生命周期阶段
    #[serde(default)]
    pub phase: Phase,

    /// 条件列表
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// 集群内服务地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// 日志树 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_id: Option<i64>,

    /// 签名私钥 Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_key_ref: Option<String>,

    /// Fulcio 根证书 Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_certificate_ref: Option<String>,

    /// 服务配置 Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<String>,

    /// 解析得到的 Trillian 地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trillian_address: Option<String>,

    /// 解析得到的 Fulcio 地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulcio_url: Option<String>,
}

/// Ctlog 状态字段补丁
#[derive(Debug, Clone, PartialEq)]
pub enum CtlogField {
    /// 服务地址
    Url(String),
    /// 日志树 ID
    TreeId(i64),
    /// 签名私钥 Secret
    SignerKey(String),
    /// Fulcio 根证书 Secret
    RootCertificate(String),
    /// 服务配置 Secret
    Config(String),
    /// Trillian 地址
    TrillianAddress(String),
    /// Fulcio 地址
    FulcioUrl(String),
}

impl ManagedStatus for CtlogStatus {
    type Field = CtlogField;

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

    fn apply_field(&mut self, field: CtlogField) {
        match field {
            CtlogField::Url(url) => self.url = Some(url),
            CtlogField::TreeId(id) => self.tree_id = Some(id),
            CtlogField::SignerKey(name) => self.signer_key_ref = Some(name),
            CtlogField::RootCertificate(name) => self.root_certificate_ref = Some(name),
            CtlogField::Config(name) => self.config_ref = Some(name),
            CtlogField::TrillianAddress(address) => self.trillian_address = Some(address),
            CtlogField::FulcioUrl(url) => self.fulcio_url = Some(url),
        }
    }
}

impl Managed for Ctlog {
    type Status = CtlogStatus;

    fn status(&self) -> Option<&CtlogStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<CtlogStatus> {
        &mut self.status
    }

    fn components(&self) -> Vec<&'static str> {
        vec![SERVER_AVAILABLE]
    }

    fn ready_message(&self) -> &'static str {
        "Ctlog 已就绪"
    }
}
