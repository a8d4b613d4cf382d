//! 通用动作
//!
//! 所有受管资源共享的阶段迁移与收敛动作。每个构造函数返回可直接注册到流水线的
//! `Arc<dyn Action<R>>`；资源特有的部分（子对象清单、字段补丁）以闭包或函数指针注入。

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Resource, ResourceExt};
use sigil_common::{aggregate, Condition, ConditionStatus, Phase, Reason, StatusPatch, READY};
use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::action::{Action, Outcome, Pass};
use crate::config::OperatorConfig;
use crate::crd::{child_name, components_ready, conditions_of, is_ready, namespace_of, phase_of, Field, Managed};
use crate::dependency::{fetch_with_retry, resolve_dependency, Exposes};
use crate::drift::Compared;
use crate::ensure::{ensure, ensure_created, Ensured};
use crate::error::{OperatorError, Result};
use crate::events::EventRecord;
use crate::manifests::{self, sibling_selector};
use crate::store::key_of;

/// 子对象清单构造函数，返回 `None` 表示当前配置下不需要该子对象
pub type Build<R, K> = Box<dyn Fn(&OperatorConfig, &R) -> Result<Option<K>> + Send + Sync>;

struct InitializeStatus;

#[async_trait]
impl<R: Managed> Action<R> for InitializeStatus {
    fn name(&self) -> &'static str {
        "initialize-status"
    }

    fn can_handle(&self, resource: &R) -> bool {
        phase_of(resource) == Phase::None
    }

    async fn handle(&self, _pass: &Pass, resource: &R) -> Outcome<R> {
        let mut patch = StatusPatch::new()
            .phase(Phase::Pending)
            .condition(Condition::pending(READY, "等待协调"));
        for component in resource.components() {
            patch = patch.condition(Condition::pending(component, "等待协调"));
        }
        info!(name = %resource.name_any(), "初始化资源状态");
        Outcome::transition(patch)
    }
}

/// `None → Pending`：写入初始条件
pub fn initialize_status<R: Managed>() -> Arc<dyn Action<R>> {
    Arc::new(InitializeStatus)
}

struct StartCreating;

#[async_trait]
impl<R: Managed> Action<R> for StartCreating {
    fn name(&self) -> &'static str {
        "start-creating"
    }

    fn can_handle(&self, resource: &R) -> bool {
        phase_of(resource) == Phase::Pending
    }

    async fn handle(&self, pass: &Pass, resource: &R) -> Outcome<R> {
        pass.record(resource, EventRecord::normal(Action::<R>::name(self), "Creating", "前置依赖已满足，开始创建组件"))
            .await;
        Outcome::transition(
            StatusPatch::new()
                .phase(Phase::Creating)
                .condition(Condition::creating(READY, "正在创建组件")),
        )
    }
}

/// `Pending → Creating`：放在依赖解析之后，依赖全部满足才会执行到这里
pub fn start_creating<R: Managed>() -> Arc<dyn Action<R>> {
    Arc::new(StartCreating)
}

struct MoveToInitialize;

#[async_trait]
impl<R: Managed> Action<R> for MoveToInitialize {
    fn name(&self) -> &'static str {
        "move-to-initialize"
    }

    fn can_handle(&self, resource: &R) -> bool {
        phase_of(resource) == Phase::Creating
    }

    async fn handle(&self, _pass: &Pass, resource: &R) -> Outcome<R> {
        let mut patch = StatusPatch::new()
            .phase(Phase::Initialize)
            .condition(Condition::initialize(READY, "等待组件就绪"));
        for component in resource.components() {
            patch = patch.condition(Condition::initialize(component, "等待组件就绪"));
        }
        Outcome::transition(patch)
    }
}

/// `Creating → Initialize`：放在全部创建动作之后
pub fn move_to_initialize<R: Managed>() -> Arc<dyn Action<R>> {
    Arc::new(MoveToInitialize)
}

struct ValidateSpec<R> {
    check: fn(&R) -> Result<()>,
}

#[async_trait]
impl<R: Managed> Action<R> for ValidateSpec<R> {
    fn name(&self) -> &'static str {
        "validate-spec"
    }

    fn can_handle(&self, _resource: &R) -> bool {
        true
    }

    async fn handle(&self, pass: &Pass, resource: &R) -> Outcome<R> {
        match (self.check)(resource) {
            Ok(()) => Outcome::next(),
            Err(e) => {
                warn!(name = %resource.name_any(), "资源配置无效: {}", e);
                pass.record(resource, EventRecord::warning(self.name(), "InvalidSpec", e.to_string()))
                    .await;
                Outcome::failed(READY, e)
            }
        }
    }
}

/// 校验规范，配置错误使资源进入 `Error` 阶段
pub fn validate<R: Managed>(check: fn(&R) -> Result<()>) -> Arc<dyn Action<R>> {
    Arc::new(ValidateSpec { check })
}

struct EnsureChild<R, K> {
    name: &'static str,
    condition: &'static str,
    build: Build<R, K>,
}

#[async_trait]
impl<R: Managed, K: Compared> Action<R> for EnsureChild<R, K> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_handle(&self, _resource: &R) -> bool {
        true
    }

    async fn handle(&self, pass: &Pass, resource: &R) -> Outcome<R> {
        let expected = match (self.build)(&pass.context().config, resource) {
            Ok(Some(expected)) => expected,
            Ok(None) => return Outcome::next(),
            Err(e) => return Outcome::failed(self.condition, e),
        };

        match ensure(pass.store(), &expected).await {
            Ok(ensured) => {
                record_ensured(pass, resource, self.name, &expected, &ensured).await;
                Outcome::next()
            }
            Err(e) => Outcome::failed(self.condition, e.into()),
        }
    }
}

async fn record_ensured<R: Managed, K: Compared>(pass: &Pass, resource: &R, action: &str, child: &K, ensured: &Ensured) {
    let key = key_of(child);
    match ensured {
        Ensured::Created => {
            pass.record(resource, EventRecord::normal(action, "Created", format!("已创建 {key}")))
                .await
        }
        Ensured::Updated(drifts) => {
            pass.record(
                resource,
                EventRecord::normal(action, "Updated", format!("已修正 {key} 的 {} 处漂移", drifts.len())),
            )
            .await
        }
        Ensured::Unchanged => debug!(object = %key, "子对象无变化"),
    }
}

/// 确保子对象存在且与清单一致
pub fn ensure_child<R, K, F>(name: &'static str, condition: &'static str, build: F) -> Arc<dyn Action<R>>
where
    R: Managed,
    K: Compared,
    F: Fn(&OperatorConfig, &R) -> Result<Option<K>> + Send + Sync + 'static,
{
    Arc::new(EnsureChild {
        name,
        condition,
        build: Box::new(build),
    })
}

/// 服务账号、角色与角色绑定，名称均为 `<实例名>-sa`
pub fn rbac<R: Managed>(component: &'static str) -> Vec<Arc<dyn Action<R>>> {
    vec![
        ensure_child("ensure-service-account", READY, move |_, r: &R| {
            Ok(Some(manifests::service_account(r, &service_account_name(r), component)))
        }),
        ensure_child("ensure-role", READY, move |_, r: &R| {
            Ok(Some(manifests::role(r, &service_account_name(r), component)))
        }),
        ensure_child("ensure-role-binding", READY, move |_, r: &R| {
            Ok(Some(manifests::role_binding(r, &service_account_name(r), component)))
        }),
    ]
}

/// 工作负载使用的服务账号
pub fn service_account_name<R: Managed>(resource: &R) -> String {
    format!("{}-sa", resource.name_any())
}

/// 确保生成型 Secret 存在：已存在时不调用生成器，也不覆盖
pub async fn ensure_generated_secret<R, G, Fut>(
    pass: &Pass,
    owner: &R,
    name: &str,
    component: &str,
    generate: G,
) -> Result<Ensured>
where
    R: Managed,
    G: FnOnce() -> Fut,
    Fut: Future<Output = Result<BTreeMap<String, Vec<u8>>>>,
{
    let namespace = namespace_of(owner);
    if pass.store().get::<Secret>(&namespace, name).await?.is_some() {
        return Ok(Ensured::Unchanged);
    }
    let secret = manifests::secret(owner, name, component, generate().await?);
    let ensured = ensure_created(pass.store(), &secret).await?;
    if ensured.changed() {
        pass.record(owner, EventRecord::normal("ensure-generated-secret", "Generated", format!("已生成 Secret {name}")))
            .await;
    }
    Ok(ensured)
}

struct WorkloadReady<R> {
    name: &'static str,
    condition: &'static str,
    deployment: fn(&R) -> Option<String>,
}

#[async_trait]
impl<R: Managed> Action<R> for WorkloadReady<R> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_handle(&self, resource: &R) -> bool {
        matches!(phase_of(resource), Phase::Initialize | Phase::Ready)
    }

    async fn handle(&self, pass: &Pass, resource: &R) -> Outcome<R> {
        let Some(name) = (self.deployment)(resource) else {
            return Outcome::next();
        };
        let deployment = match pass.store().get::<Deployment>(&namespace_of(resource), &name).await {
            Ok(deployment) => deployment,
            Err(e) => return Outcome::failed(self.condition, e.into()),
        };

        let reason = if phase_of(resource) == Phase::Ready {
            Reason::Recovering
        } else {
            Reason::Initialize
        };
        let condition = match deployment {
            Some(d) if manifests::deployment_available(&d) => {
                Condition::ready(self.condition, format!("{name} 可用"))
            }
            Some(_) => Condition::new(self.condition, ConditionStatus::False, reason, format!("等待 {name} 可用")),
            None => Condition::new(self.condition, ConditionStatus::False, reason, format!("{name} 尚不存在")),
        };
        Outcome::next_with(StatusPatch::new().condition(condition))
    }
}

/// 根据 Deployment 可用副本更新组件条件
pub fn workload_ready<R: Managed>(
    name: &'static str,
    condition: &'static str,
    deployment: fn(&R) -> Option<String>,
) -> Arc<dyn Action<R>> {
    Arc::new(WorkloadReady {
        name,
        condition,
        deployment,
    })
}

struct AggregateReady;

#[async_trait]
impl<R: Managed> Action<R> for AggregateReady {
    fn name(&self) -> &'static str {
        "aggregate-ready"
    }

    fn can_handle(&self, resource: &R) -> bool {
        matches!(phase_of(resource), Phase::Initialize | Phase::Ready)
    }

    async fn handle(&self, _pass: &Pass, resource: &R) -> Outcome<R> {
        let ready = aggregate(conditions_of(resource), &resource.components(), resource.ready_message());
        Outcome::next_with(StatusPatch::new().condition(ready))
    }
}

/// 由组件条件计算 `Ready`：取最差的组件，原样复制其原因与消息
pub fn aggregate_ready<R: Managed>() -> Arc<dyn Action<R>> {
    Arc::new(AggregateReady)
}

struct MarkReady<R: Managed> {
    publish: fn(&R) -> Vec<Field<R>>,
}

#[async_trait]
impl<R: Managed> Action<R> for MarkReady<R> {
    fn name(&self) -> &'static str {
        "mark-ready"
    }

    fn can_handle(&self, resource: &R) -> bool {
        phase_of(resource) == Phase::Initialize && components_ready(resource) && is_ready(resource)
    }

    async fn handle(&self, pass: &Pass, resource: &R) -> Outcome<R> {
        let mut patch = StatusPatch::new().phase(Phase::Ready);
        for field in (self.publish)(resource) {
            patch = patch.field(field);
        }
        info!(name = %resource.name_any(), "资源已就绪");
        pass.record(resource, EventRecord::normal(self.name(), "Ready", resource.ready_message()))
            .await;
        Outcome::done(patch)
    }
}

/// `Initialize → Ready`：全部组件就绪后发布地址等字段
pub fn mark_ready<R: Managed>(publish: fn(&R) -> Vec<Field<R>>) -> Arc<dyn Action<R>> {
    Arc::new(MarkReady { publish })
}

struct ResolveDependency<R: Managed, D> {
    name: &'static str,
    explicit: fn(&R) -> Option<String>,
    field: fn(String) -> Field<R>,
    dependency: PhantomData<fn() -> D>,
}

#[async_trait]
impl<R: Managed, D: Exposes> Action<R> for ResolveDependency<R, D> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_handle(&self, resource: &R) -> bool {
        phase_of(resource) == Phase::Pending
    }

    async fn handle(&self, pass: &Pass, resource: &R) -> Outcome<R> {
        if let Some(address) = (self.explicit)(resource) {
            return Outcome::next_with(StatusPatch::new().field((self.field)(address)));
        }

        let selector = sibling_selector(resource);
        match resolve_dependency::<D>(pass.store(), &namespace_of(resource), &selector).await {
            Ok(address) => Outcome::next_with(StatusPatch::new().field((self.field)(address))),
            Err(e) => {
                debug!(name = %resource.name_any(), "依赖尚未就绪: {}", e);
                Outcome::failed(READY, e)
            }
        }
    }
}

/// 解析兄弟资源地址；规范中显式给出的地址优先
pub fn resolve<R: Managed, D: Exposes>(
    name: &'static str,
    explicit: fn(&R) -> Option<String>,
    field: fn(String) -> Field<R>,
) -> Arc<dyn Action<R>> {
    Arc::new(ResolveDependency::<R, D> {
        name,
        explicit,
        field,
        dependency: PhantomData,
    })
}

struct CreateTree<R: Managed> {
    condition: &'static str,
    explicit: fn(&R) -> Option<i64>,
    current: fn(&R) -> Option<i64>,
    admin_server: fn(&R) -> Option<String>,
    field: fn(i64) -> Field<R>,
}

/// 记录树 ID 的 ConfigMap 中的键
pub const TREE_ID_KEY: &str = "treeId";

/// 记录树 ID 的 ConfigMap 名称
pub fn tree_record_name<R: Managed>(resource: &R) -> String {
    child_name(resource, "tree")
}

async fn recorded_tree<R: Managed>(pass: &Pass, resource: &R) -> Result<Option<i64>> {
    let name = tree_record_name(resource);
    let Some(record) = pass.store().get::<ConfigMap>(&namespace_of(resource), &name).await? else {
        return Ok(None);
    };
    let value = record.data.as_ref().and_then(|data| data.get(TREE_ID_KEY)).ok_or_else(|| {
        OperatorError::Collaborator(format!("{name} 中缺少 {TREE_ID_KEY}"))
    })?;
    value
        .parse()
        .map(Some)
        .map_err(|e| OperatorError::Collaborator(format!("{name} 中的树 ID 无效: {e}")))
}

impl<R: Managed> CreateTree<R> {
    /// 先把树 ID 写入属主拥有的 ConfigMap，再返回给状态；
    /// 状态写入丢失后，下一轮从该记录恢复而不是重新创建
    async fn provision(&self, pass: &Pass, resource: &R, admin_server: &str) -> Result<i64> {
        if let Some(tree_id) = recorded_tree(pass, resource).await? {
            debug!(name = %resource.name_any(), tree_id, "复用已记录的日志树");
            return Ok(tree_id);
        }

        let display_name = format!("{}-{}", namespace_of(resource), resource.name_any());
        let tree_id = pass.context().trees.create_tree(admin_server, &display_name).await?;
        let record = manifests::config_map(
            resource,
            &tree_record_name(resource),
            "tree",
            BTreeMap::from([(TREE_ID_KEY.to_string(), tree_id.to_string())]),
        );
        if ensure_created(pass.store(), &record).await?.changed() {
            pass.record(resource, EventRecord::normal(self.name(), "TreeCreated", format!("已创建日志树 {tree_id}")))
                .await;
            return Ok(tree_id);
        }

        // 其他协调者先写入了记录，以记录为准
        match recorded_tree(pass, resource).await? {
            Some(recorded) => {
                warn!(name = %resource.name_any(), orphan = tree_id, tree_id = recorded, "日志树已由其他协调者记录");
                Ok(recorded)
            }
            None => Err(OperatorError::Collaborator(format!("{} 写入后无法读取", tree_record_name(resource)))),
        }
    }
}

#[async_trait]
impl<R: Managed> Action<R> for CreateTree<R> {
    fn name(&self) -> &'static str {
        "create-tree"
    }

    fn can_handle(&self, resource: &R) -> bool {
        (self.current)(resource).is_none()
    }

    async fn handle(&self, pass: &Pass, resource: &R) -> Outcome<R> {
        if let Some(tree_id) = (self.explicit)(resource) {
            return Outcome::next_with(StatusPatch::new().field((self.field)(tree_id)));
        }
        let Some(admin_server) = (self.admin_server)(resource) else {
            return Outcome::failed(
                self.condition,
                OperatorError::DependencyNotReady {
                    kind: "Trillian".to_string(),
                    reason: "尚未解析 Trillian 地址".to_string(),
                },
            );
        };

        match self.provision(pass, resource, &admin_server).await {
            Ok(tree_id) => Outcome::next_with(StatusPatch::new().field((self.field)(tree_id))),
            Err(e) => {
                pass.record(resource, EventRecord::warning(self.name(), "TreeFailed", e.to_string()))
                    .await;
                Outcome::failed(self.condition, e)
            }
        }
    }
}

/// 在 Trillian 中创建日志树；规范中指定的树 ID 优先
pub fn create_tree<R: Managed>(
    condition: &'static str,
    explicit: fn(&R) -> Option<i64>,
    current: fn(&R) -> Option<i64>,
    admin_server: fn(&R) -> Option<String>,
    field: fn(i64) -> Field<R>,
) -> Arc<dyn Action<R>> {
    Arc::new(CreateTree {
        condition,
        explicit,
        current,
        admin_server,
        field,
    })
}

/// 探测获取的数据写入 Secret 的位置
pub struct FetchTarget {
    /// 探测地址
    pub url: String,
    /// Secret 名称
    pub secret: String,
    /// Secret 中的键
    pub key: String,
    /// 组件名
    pub component: String,
}

struct FetchIntoSecret<R: Managed> {
    name: &'static str,
    applies: fn(&R) -> bool,
    target: fn(&R) -> Option<FetchTarget>,
    field: fn(String) -> Field<R>,
}

#[async_trait]
impl<R: Managed> Action<R> for FetchIntoSecret<R> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_handle(&self, resource: &R) -> bool {
        (self.applies)(resource)
    }

    async fn handle(&self, pass: &Pass, resource: &R) -> Outcome<R> {
        let Some(target) = (self.target)(resource) else {
            return Outcome::failed(
                READY,
                OperatorError::DependencyNotReady {
                    kind: R::kind(&()).to_string(),
                    reason: "探测地址尚未确定".to_string(),
                },
            );
        };

        let context = pass.context();
        let body = match fetch_with_retry(context.http.as_ref(), &target.url, &context.fetch, pass.cancel()).await {
            Ok(body) => body,
            Err(e) => {
                pass.record(resource, EventRecord::warning(self.name, "FetchFailed", e.to_string()))
                    .await;
                return Outcome::failed(READY, e);
            }
        };

        let secret = manifests::secret(
            resource,
            &target.secret,
            &target.component,
            BTreeMap::from([(target.key.clone(), body)]),
        );
        match ensure(pass.store(), &secret).await {
            Ok(ensured) => {
                record_ensured(pass, resource, self.name, &secret, &ensured).await;
                Outcome::next_with(StatusPatch::new().field((self.field)(target.secret)))
            }
            Err(e) => Outcome::failed(READY, e.into()),
        }
    }
}

/// 通过 HTTP 获取生成数据（公钥、根证书）并保存到 Secret
pub fn fetch_into_secret<R: Managed>(
    name: &'static str,
    applies: fn(&R) -> bool,
    target: fn(&R) -> Option<FetchTarget>,
    field: fn(String) -> Field<R>,
) -> Arc<dyn Action<R>> {
    Arc::new(FetchIntoSecret {
        name,
        applies,
        target,
        field,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Flow;
    use crate::crd::{Rekor, RekorField, RekorSpec, RekorStatus, SERVER_AVAILABLE};
    use crate::store::ScopedStore;
    use crate::collaborators::{MockHttpFetch, MockTreeProvisioner};
    use crate::testing::{fake_keys, Harness, TREE_ID};
    use sigil_common::{find_condition, reduce};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rekor_in(phase: Phase) -> Rekor {
        let mut rekor = Rekor::new("rekor", RekorSpec::default());
        rekor.metadata.namespace = Some("sigstore".into());
        rekor.metadata.uid = Some("rekor-uid".into());
        rekor.status = Some(RekorStatus {
            phase,
            ..Default::default()
        });
        rekor
    }

    #[tokio::test]
    async fn test_initialize_seeds_every_component() {
        let harness = Harness::new();
        let rekor = rekor_in(Phase::None);
        let action = initialize_status::<Rekor>();

        assert!(action.can_handle(&rekor));
        let outcome = action.handle(&harness.pass(), &rekor).await;

        assert!(matches!(outcome.flow, Flow::Transition));
        assert_eq!(outcome.patch.phase, Some(Phase::Pending));
        for type_ in [READY, SERVER_AVAILABLE, "RedisAvailable"] {
            let condition = find_condition(&outcome.patch.conditions, type_).unwrap();
            assert_eq!(condition.status, ConditionStatus::Unknown);
            assert_eq!(condition.reason, "Pending");
        }
    }

    #[tokio::test]
    async fn test_ensure_child_records_creation_once() {
        let harness = Harness::new();
        let rekor = rekor_in(Phase::Creating);
        let action = ensure_child("ensure-config", READY, |_, r: &Rekor| {
            Ok(Some(manifests::config_map(
                r,
                "rekor-config",
                "rekor-server",
                BTreeMap::from([("a".to_string(), "1".to_string())]),
            )))
        });

        action.handle(&harness.pass(), &rekor).await;
        action.handle(&harness.pass(), &rekor).await;

        assert_eq!(harness.events.count("Created"), 1);
        let live: ConfigMap = harness.store.fetch("sigstore", "rekor-config").unwrap();
        assert_eq!(live.metadata.owner_references.unwrap()[0].uid, "rekor-uid");
    }

    #[tokio::test]
    async fn test_ensure_child_skips_disabled_object() {
        let harness = Harness::new();
        let action = ensure_child::<Rekor, ConfigMap, _>("ensure-nothing", READY, |_, _| Ok(None));

        let outcome = action.handle(&harness.pass(), &rekor_in(Phase::Creating)).await;
        assert!(matches!(outcome.flow, Flow::Continue));
        assert_eq!(harness.store.len(), 0);
    }

    #[tokio::test]
    async fn test_generated_secret_is_not_regenerated() {
        let harness = Harness::new();
        let rekor = rekor_in(Phase::Creating);
        let pass = harness.pass();
        let generated = AtomicUsize::new(0);
        let counter = &generated;
        let generate = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, OperatorError>(BTreeMap::from([("private".to_string(), b"one".to_vec())]))
        };

        let first = ensure_generated_secret(&pass, &rekor, "rekor-signer", "rekor-server", generate)
            .await
            .unwrap();
        let second = ensure_generated_secret(&pass, &rekor, "rekor-signer", "rekor-server", generate)
            .await
            .unwrap();

        assert_eq!(first, Ensured::Created);
        assert_eq!(second, Ensured::Unchanged);
        assert_eq!(generated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_workload_ready_tracks_deployment() {
        let harness = Harness::new();
        let rekor = rekor_in(Phase::Initialize);
        let action = workload_ready::<Rekor>("server-ready", SERVER_AVAILABLE, |_| Some("rekor-server".into()));

        let outcome = action.handle(&harness.pass(), &rekor).await;
        let condition = &outcome.patch.conditions[0];
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "Initialize");

        let cancel = tokio_util::sync::CancellationToken::new();
        let deployment = manifests::deployment(
            &rekor,
            &manifests::Workload::new("rekor-server", "rekor-server", "rekor:latest"),
        );
        ScopedStore::new(harness.store.as_ref(), &cancel)
            .create(&deployment)
            .await
            .unwrap();
        harness.mark_available("sigstore", "rekor-server");

        let outcome = action.handle(&harness.pass(), &rekor).await;
        assert!(outcome.patch.conditions[0].is_true());
    }

    #[tokio::test]
    async fn test_aggregate_copies_worst_component() {
        let harness = Harness::new();
        let mut rekor = rekor_in(Phase::Initialize);
        let status = rekor.status.as_mut().unwrap();
        status.conditions = vec![
            Condition::ready(SERVER_AVAILABLE, "ok"),
            Condition::failure("RedisAvailable", "redis 崩溃"),
        ];

        let outcome = aggregate_ready::<Rekor>().handle(&harness.pass(), &rekor).await;
        let ready = &outcome.patch.conditions[0];
        assert_eq!(ready.type_, READY);
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "Failure");
        assert_eq!(ready.message, "redis 崩溃");
    }

    #[tokio::test]
    async fn test_mark_ready_requires_ready_condition() {
        let harness = Harness::new();
        let mut rekor = rekor_in(Phase::Initialize);
        let action = mark_ready::<Rekor>(|r| vec![RekorField::Url(format!("http://{}", r.name_any()))]);
        assert!(!action.can_handle(&rekor));

        let status = rekor.status.take().unwrap();
        let patch = StatusPatch::new()
            .condition(Condition::ready(SERVER_AVAILABLE, "ok"))
            .condition(Condition::ready("RedisAvailable", "ok"))
            .condition(Condition::ready(READY, "ok"));
        rekor.status = Some(reduce(status, patch, &rekor.components(), chrono::Utc::now()).status);
        assert!(action.can_handle(&rekor));

        let outcome = action.handle(&harness.pass(), &rekor).await;
        assert!(matches!(outcome.flow, Flow::Done));
        assert_eq!(outcome.patch.phase, Some(Phase::Ready));
        assert_eq!(outcome.patch.fields, vec![RekorField::Url("http://rekor".into())]);
    }

    fn rekor_tree() -> Arc<dyn Action<Rekor>> {
        create_tree::<Rekor>(
            SERVER_AVAILABLE,
            |r| r.spec.tree_id,
            |r| r.status.as_ref().and_then(|s| s.tree_id),
            |r| r.status.as_ref().and_then(|s| s.trillian_address.clone()),
            RekorField::TreeId,
        )
    }

    #[tokio::test]
    async fn test_create_tree_uses_explicit_id() {
        let harness = Harness::new();
        let mut rekor = rekor_in(Phase::Creating);
        rekor.spec.tree_id = Some(77);

        let outcome = rekor_tree().handle(&harness.pass(), &rekor).await;
        assert_eq!(outcome.patch.fields, vec![RekorField::TreeId(77)]);
        assert_eq!(harness.events.count("TreeCreated"), 0);
    }

    #[tokio::test]
    async fn test_create_tree_reuses_recorded_id() {
        let mut trees = MockTreeProvisioner::new();
        trees.expect_create_tree().never();
        let harness = Harness::with_collaborators(fake_keys(), trees, MockHttpFetch::new());
        let mut rekor = rekor_in(Phase::Creating);
        rekor.status.as_mut().unwrap().trillian_address = Some("trillian:8091".into());
        harness.store.seed(&manifests::config_map(
            &rekor,
            "rekor-tree",
            "tree",
            BTreeMap::from([(TREE_ID_KEY.to_string(), "4242".to_string())]),
        ));

        let outcome = rekor_tree().handle(&harness.pass(), &rekor).await;

        assert_eq!(outcome.patch.fields, vec![RekorField::TreeId(4242)]);
    }

    #[tokio::test]
    async fn test_created_tree_is_recorded_before_status() {
        let harness = Harness::new();
        let mut rekor = rekor_in(Phase::Creating);
        rekor.status.as_mut().unwrap().trillian_address = Some("trillian:8091".into());

        let outcome = rekor_tree().handle(&harness.pass(), &rekor).await;

        assert_eq!(outcome.patch.fields, vec![RekorField::TreeId(TREE_ID)]);
        let record: ConfigMap = harness.store.fetch("sigstore", "rekor-tree").unwrap();
        assert_eq!(record.data.unwrap()[TREE_ID_KEY], TREE_ID.to_string());
        assert_eq!(harness.events.count("TreeCreated"), 1);
    }
}
