//! 自定义资源定义模块
//!
//! 定义 Sigil 的五种自定义资源：Trillian（日志后端）、Fulcio（证书颁发）、Rekor（透明日志）、
//! Ctlog（证书透明日志前端）以及组合它们的 Securesign。所有资源都位于
//! `rhtas.sigil.dev/v1alpha1`，状态中包含阶段、条件列表和各自的引用字段。

pub mod ctlog;
pub mod fulcio;
pub mod rekor;
pub mod securesign;
pub mod trillian;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{CustomResourceExt, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sigil_common::{find_condition, is_condition_true, Condition, ManagedStatus, Phase, READY};
use std::fmt;

use crate::store::StoreObject;

pub use self::ctlog::{Ctlog, CtlogField, CtlogSpec, CtlogStatus};
pub use self::fulcio::{Fulcio, FulcioField, FulcioSpec, FulcioStatus, OidcIssuer};
pub use self::rekor::{BackfillRedis, Rekor, RekorField, RekorSpec, RekorStatus, TrillianRef};
pub use self::securesign::{Securesign, SecuresignField, SecuresignSpec, SecuresignStatus};
pub use self::trillian::{Trillian, TrillianField, TrillianSpec, TrillianStatus};

/// API 组
pub const GROUP: &str = "rhtas.sigil.dev";

/// 所有受管资源共用的终结器
pub const FINALIZER: &str = "rhtas.sigil.dev/finalizer";

/// 服务端组件条件
pub const SERVER_AVAILABLE: &str = "ServerAvailable";

/// 受管资源
///
/// 由协调入口和动作流水线使用：读取与替换状态，声明组件条件。
pub trait Managed: StoreObject {
    /// 状态类型
    type Status: ManagedStatus + Serialize + DeserializeOwned + fmt::Debug + 'static;

    /// 当前状态，从未协调过时为 `None`
    fn status(&self) -> Option<&Self::Status>;

    /// 可变状态
    fn status_mut(&mut self) -> &mut Option<Self::Status>;

    /// 当前声明的组件条件类型
    fn components(&self) -> Vec<&'static str>;

    /// 全部组件就绪时 `Ready` 条件的消息
    fn ready_message(&self) -> &'static str;
}

/// 资源特有字段的补丁类型
pub type Field<R> = <<R as Managed>::Status as ManagedStatus>::Field;

/// 当前状态的副本，缺失时为默认状态
pub fn current_status<R: Managed>(resource: &R) -> R::Status {
    resource.status().cloned().unwrap_or_default()
}

/// 当前阶段
pub fn phase_of<R: Managed>(resource: &R) -> Phase {
    resource.status().map(|status| status.phase()).unwrap_or_default()
}

/// 当前条件列表
pub fn conditions_of<R: Managed>(resource: &R) -> &[Condition] {
    resource.status().map(|status| status.conditions()).unwrap_or_default()
}

/// 指定条件是否为 `True`
pub fn condition_true<R: Managed>(resource: &R, type_: &str) -> bool {
    is_condition_true(conditions_of(resource), type_)
}

/// 资源的 `Ready` 条件是否为 `True`
pub fn is_ready<R: Managed>(resource: &R) -> bool {
    condition_true(resource, READY)
}

/// 资源的 `Ready` 条件
pub fn ready_condition<R: Managed>(resource: &R) -> Option<&Condition> {
    find_condition(conditions_of(resource), READY)
}

/// 全部组件条件是否为 `True`
pub fn components_ready<R: Managed>(resource: &R) -> bool {
    resource
        .components()
        .iter()
        .all(|component| condition_true(resource, component))
}

/// 子对象名称：`<实例名>-<组件名>`
pub fn child_name<R: Managed>(resource: &R, component: &str) -> String {
    format!("{}-{}", resource.name_any(), component)
}

/// 资源所在命名空间
pub fn namespace_of<R: Managed>(resource: &R) -> String {
    resource.namespace().unwrap_or_else(|| "default".into())
}

/// 全部 CRD 定义
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        Trillian::crd(),
        Fulcio::crd(),
        Rekor::crd(),
        Ctlog::crd(),
        Securesign::crd(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_crds_share_group() {
        let crds = all_crds();
        assert_eq!(crds.len(), 5);
        for crd in crds {
            assert_eq!(crd.spec.group, GROUP);
            assert!(crd.spec.versions.iter().any(|v| v.name == "v1alpha1"));
        }
    }

    #[test]
    fn test_helpers_on_fresh_resource() {
        let rekor = Rekor::new("rekor", RekorSpec::default());
        assert_eq!(phase_of(&rekor), Phase::None);
        assert!(conditions_of(&rekor).is_empty());
        assert!(!is_ready(&rekor));
        assert_eq!(child_name(&rekor, "redis"), "rekor-redis");
    }
}
