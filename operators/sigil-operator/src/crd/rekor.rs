//! Rekor 透明日志资源

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sigil_common::{Condition, ManagedStatus, Phase};

use super::{Managed, SERVER_AVAILABLE};

/// Redis 组件条件
pub const REDIS_AVAILABLE: &str = "RedisAvailable";

/// Rekor 规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "rhtas.sigil.dev",
    version = "v1alpha1",
    kind = "Rekor",
    namespaced,
    status = "RekorStatus"
)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.url"}"#)]
#[serde(rename_all = "camelCase")]
pub struct RekorSpec {
    /// Trillian 日志后端
    #[serde(default)]
    pub trillian: TrillianRef,

    /// 指定已有的日志树，缺省时自动创建
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_id: Option<i64>,

    /// 定时回填 Redis 索引
    #[serde(default)]
    pub backfill_redis: BackfillRedis,
}

/// Trillian 地址引用，缺省时在同一命名空间中查找就绪的 Trillian
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrillianRef {
    /// 外部 Trillian 地址（`host:port`）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Redis 回填任务配置
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackfillRedis {
    /// 是否启用
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cron 表达式
    #[serde(default = "default_schedule")]
    pub schedule: String,
}

impl Default for BackfillRedis {
    fn default() -> Self {
        Self {
            enabled: true,
            schedule: default_schedule(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_schedule() -> String {
    "0 0 * * *".to_string()
}

/// Rekor 状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RekorStatus {
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

    /// 从服务端获取的公钥 Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_ref: Option<String>,

    /// 解析得到的 Trillian 地址
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trillian_address: Option<String>,
}

/// Rekor 状态字段补丁
#[derive(Debug, Clone, PartialEq)]
pub enum RekorField {
    /// 服务地址
    Url(String),
    /// 日志树 ID
    TreeId(i64),
    /// 签名私钥 Secret
    SignerKey(String),
    /// 公钥 Secret
    PublicKey(String),
    /// Trillian 地址
    TrillianAddress(String),
}

impl ManagedStatus for RekorStatus {
    type Field = RekorField;

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

    fn apply_field(&mut self, field: RekorField) {
        match field {
            RekorField::Url(url) => self.url = Some(url),
            RekorField::TreeId(id) => self.tree_id = Some(id),
            RekorField::SignerKey(name) => self.signer_key_ref = Some(name),
            RekorField::PublicKey(name) => self.public_key_ref = Some(name),
            RekorField::TrillianAddress(address) => self.trillian_address = Some(address),
        }
    }
}

impl Managed for Rekor {
    type Status = RekorStatus;

    fn status(&self) -> Option<&RekorStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<RekorStatus> {
        &mut self.status
    }

    fn components(&self) -> Vec<&'static str> {
        vec![SERVER_AVAILABLE, REDIS_AVAILABLE]
    }

    fn ready_message(&self) -> &'static str {
        "Rekor 已就绪"
    }
}
