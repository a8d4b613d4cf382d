//! Fulcio 证书颁发资源

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sigil_common::{Condition, ManagedStatus, Phase};

use super::{Managed, SERVER_AVAILABLE};

/// Fulcio 规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "rhtas.sigil.dev",
    version = "v1alpha1",
    kind = "Fulcio",
    namespaced,
    status = "FulcioStatus"
)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.url"}"#)]
#[serde(rename_all = "camelCase")]
pub struct FulcioSpec {
    /// 签发配置
    #[serde(default)]
    pub config: FulcioConfig,

    /// 自签 CA 证书的主题
    #[serde(default)]
    pub certificate: FulcioCertificate,
}

/// Fulcio 签发配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FulcioConfig {
    /// 受信任的 OIDC 签发方，至少一个
    #[serde(default)]
    pub oidc_issuers: Vec<OidcIssuer>,
}

/// OIDC 签发方
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OidcIssuer {
    /// 签发方标识
    pub issuer: String,
    /// 签发方地址，缺省时与 `issuer` 相同
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_url: Option<String>,
    /// 客户端 ID
    pub client_id: String,
    /// 身份类型，例如 `email`
    #[serde(default = "default_issuer_type")]
    pub r#type: String,
}

fn default_issuer_type() -> String {
    "email".to_string()
}

/// CA 证书主题
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FulcioCertificate {
    /// 通用名
    pub common_name: String,
    /// 组织名
    pub organization_name: String,
    /// 组织邮箱
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_email: Option<String>,
}

impl Default for FulcioCertificate {
    fn default() -> Self {
        Self {
            common_name: "fulcio.local".to_string(),
            organization_name: "Sigil".to_string(),
            organization_email: None,
        }
    }
}

/// Fulcio 状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FulcioStatus {
    /// 生命周期阶段
    #[serde(default)]
    pub phase: Phase,

    /// 条件列表
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// 集群内服务地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// CA 证书与私钥所在的 Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_ref: Option<String>,
}

/// Fulcio 状态字段补丁
#[derive(Debug, Clone, PartialEq)]
pub enum FulcioField {
    /// 服务地址
    Url(String),
    /// CA Secret
    Certificate(String),
}

impl ManagedStatus for FulcioStatus {
    type Field = FulcioField;

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

    fn apply_field(&mut self, field: FulcioField) {
        match field {
            FulcioField::Url(url) => self.url = Some(url),
            FulcioField::Certificate(name) => self.certificate_ref = Some(name),
        }
    }
}

impl Managed for Fulcio {
    type Status = FulcioStatus;

    fn status(&self) -> Option<&FulcioStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<FulcioStatus> {
        &mut self.status
    }

    fn components(&self) -> Vec<&'static str> {
        vec![SERVER_AVAILABLE]
    }

    fn ready_message(&self) -> &'static str {
        "Fulcio 已就绪"
    }
}
