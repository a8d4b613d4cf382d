//! Trillian 日志后端资源

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sigil_common::{Condition, ManagedStatus, Phase};

use super::{Managed, SERVER_AVAILABLE};

/// 数据库组件条件
pub const DB_AVAILABLE: &str = "DbAvailable";

/// 签名器组件条件
pub const SIGNER_AVAILABLE: &str = "SignerAvailable";

/// Trillian 规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "rhtas.sigil.dev",
    version = "v1alpha1",
    kind = "Trillian",
    namespaced,
    status = "TrillianStatus",
    shortname = "trl"
)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.url"}"#)]
#[serde(rename_all = "camelCase")]
pub struct TrillianSpec {
    /// 数据库配置
    #[serde(default)]
    pub database: TrillianDatabase,
}

/// Trillian 数据库配置
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrillianDatabase {
    /// 是否由 Operator 部署数据库
    #[serde(default = "default_true")]
    pub create: bool,

    /// 外部数据库凭据所在的 Secret，`create` 为 false 时必填
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_secret_ref: Option<String>,

    /// 数据卷大小
    #[serde(default = "default_volume_size")]
    pub size: String,

    /// 存储类
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

impl Default for TrillianDatabase {
    fn default() -> Self {
        Self {
            create: true,
            database_secret_ref: None,
            size: default_volume_size(),
            storage_class: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_volume_size() -> String {
    "5Gi".to_string()
}

/// Trillian 状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrillianStatus {
    /// 生命周期阶段
    #[serde(default)]
    pub phase: Phase,

    /// 条件列表
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// 日志服务的 gRPC 地址（`host:port`）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// 数据库凭据 Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_secret_ref: Option<String>,
}

/// Trillian 状态字段补丁
#[derive(Debug, Clone, PartialEq)]
pub enum TrillianField {
    /// 日志服务地址
    Url(String),
    /// 数据库凭据 Secret
    DatabaseSecret(String),
}

impl ManagedStatus for TrillianStatus {
    type Field = TrillianField;

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

    fn apply_field(&mut self, field: TrillianField) {
        match field {
            TrillianField::Url(url) => self.url = Some(url),
            TrillianField::DatabaseSecret(name) => self.database_secret_ref = Some(name),
        }
    }
}

impl Managed for Trillian {
    type Status = TrillianStatus;

    fn status(&self) -> Option<&TrillianStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<TrillianStatus> {
        &mut self.status
    }

    fn components(&self) -> Vec<&'static str> {
        if self.spec.database.create {
            vec![DB_AVAILABLE, SERVER_AVAILABLE, SIGNER_AVAILABLE]
        } else {
            vec![SERVER_AVAILABLE, SIGNER_AVAILABLE]
        }
    }

    fn ready_message(&self) -> &'static str {
        "Trillian 已就绪"
    }
}
