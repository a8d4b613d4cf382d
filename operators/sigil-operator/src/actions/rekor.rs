//! Rekor 流水线
//!
//! 依赖 Trillian 日志服务：待定阶段解析其地址，创建阶段在其中建立日志树，
//! 服务启动后再从 Rekor 自身获取公钥保存到 Secret。

use async_trait::async_trait;
use sigil_common::{validate_schedule, Phase, StatusPatch};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::common::{
    aggregate_ready, create_tree, ensure_child, ensure_generated_secret, fetch_into_secret, initialize_status,
    mark_ready, move_to_initialize, rbac, resolve, service_account_name, start_creating, validate, workload_ready,
    FetchTarget,
};
use crate::action::{Action, Outcome, Pass};
use crate::config::OperatorConfig;
use crate::crd::rekor::REDIS_AVAILABLE;
use crate::crd::{child_name, condition_true, namespace_of, phase_of, Rekor, RekorField, Trillian, SERVER_AVAILABLE};
use crate::error::{OperatorError, Result};
use crate::manifests::{self, service_host, Mount, Workload};
use crate::pipeline::Pipeline;

/// 服务组件
pub const SERVER: &str = "rekor-server";
/// Redis 组件
pub const REDIS: &str = "rekor-redis";
/// 回填任务组件
pub const BACKFILL: &str = "backfill-redis";

const HTTP_PORT: i32 = 3000;
const REDIS_PORT: i32 = 6379;

/// 集群内服务地址
pub fn server_url(rekor: &Rekor) -> String {
    format!("http://{}", service_host(&child_name(rekor, SERVER), &namespace_of(rekor)))
}

fn redis_host(rekor: &Rekor) -> String {
    service_host(&child_name(rekor, REDIS), &namespace_of(rekor))
}

fn signer_secret(rekor: &Rekor) -> String {
    child_name(rekor, "rekor-signer")
}

fn check(rekor: &Rekor) -> Result<()> {
    let backfill = &rekor.spec.backfill_redis;
    if backfill.enabled {
        validate_schedule(&backfill.schedule)?;
    }
    if matches!(rekor.spec.tree_id, Some(id) if id <= 0) {
        return Err(OperatorError::InvalidSpec("treeId 必须为正数".to_string()));
    }
    Ok(())
}

fn missing(what: &str) -> OperatorError {
    OperatorError::DependencyNotReady {
        kind: "Trillian".to_string(),
        reason: format!("状态中尚无{what}"),
    }
}

struct SignerKey;

#[async_trait]
impl Action<Rekor> for SignerKey {
    fn name(&self) -> &'static str {
        "ensure-signer-key"
    }

    fn can_handle(&self, _resource: &Rekor) -> bool {
        true
    }

    async fn handle(&self, pass: &Pass, resource: &Rekor) -> Outcome<Rekor> {
        let name = signer_secret(resource);
        let keys = pass.context().keys.clone();
        let generate = || async move {
            let pair = keys.signer_key().await?;
            Ok::<_, OperatorError>(BTreeMap::from([
                ("private".to_string(), pair.private_pem),
                ("public".to_string(), pair.public_pem),
            ]))
        };
        match ensure_generated_secret(pass, resource, &name, SERVER, generate).await {
            Ok(_) => Outcome::next_with(StatusPatch::new().field(RekorField::SignerKey(name))),
            Err(e) => Outcome::failed(SERVER_AVAILABLE, e),
        }
    }
}

fn server_workload(config: &OperatorConfig, rekor: &Rekor) -> Result<Workload> {
    let status = rekor.status.as_ref();
    let address = status
        .and_then(|s| s.trillian_address.clone())
        .ok_or_else(|| missing("地址"))?;
    let tree_id = status.and_then(|s| s.tree_id).ok_or_else(|| missing("日志树"))?;
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| OperatorError::InvalidSpec(format!("Trillian 地址 {address} 缺少端口")))?;

    Ok(Workload::new(child_name(rekor, SERVER), SERVER, &config.images.rekor_server)
        .args([
            "serve".to_string(),
            format!("--port={HTTP_PORT}"),
            format!("--trillian_log_server.address={host}"),
            format!("--trillian_log_server.port={port}"),
            format!("--trillian_log_server.tlog_id={tree_id}"),
            format!("--redis_server.address={}", redis_host(rekor)),
            format!("--redis_server.port={REDIS_PORT}"),
            "--rekor_server.signer=/key/private".to_string(),
            "--enable_retrieve_api=true".to_string(),
        ])
        .port(HTTP_PORT)
        .service_account(service_account_name(rekor))
        .mount(Mount::Secret {
            secret: signer_secret(rekor),
            path: "/key".to_string(),
        }))
}

fn converge() -> Vec<Arc<dyn Action<Rekor>>> {
    let mut actions = rbac::<Rekor>("rekor");
    actions.push(Arc::new(SignerKey));
    actions.extend([
        create_tree(
            SERVER_AVAILABLE,
            |r: &Rekor| r.spec.tree_id,
            |r: &Rekor| r.status.as_ref().and_then(|s| s.tree_id),
            |r: &Rekor| r.status.as_ref().and_then(|s| s.trillian_address.clone()),
            RekorField::TreeId,
        ),
        ensure_child("ensure-redis", REDIS_AVAILABLE, |config, r: &Rekor| {
            let workload = Workload::new(child_name(r, REDIS), REDIS, &config.images.redis)
                .port(REDIS_PORT)
                .service_account(service_account_name(r));
            Ok(Some(manifests::deployment(r, &workload)))
        }),
        ensure_child("ensure-redis-service", REDIS_AVAILABLE, |_, r: &Rekor| {
            Ok(Some(manifests::service(r, &child_name(r, REDIS), REDIS, REDIS_PORT, REDIS_PORT)))
        }),
        ensure_child("ensure-server", SERVER_AVAILABLE, |config, r: &Rekor| {
            Ok(Some(manifests::deployment(r, &server_workload(config, r)?)))
        }),
        ensure_child("ensure-server-service", SERVER_AVAILABLE, |_, r: &Rekor| {
            Ok(Some(manifests::service(r, &child_name(r, SERVER), SERVER, 80, HTTP_PORT)))
        }),
        ensure_child("ensure-backfill", SERVER_AVAILABLE, |config, r: &Rekor| {
            let backfill = &r.spec.backfill_redis;
            if !backfill.enabled {
                return Ok(None);
            }
            let workload = Workload::new(child_name(r, BACKFILL), BACKFILL, &config.images.backfill_redis)
                .args([
                    format!("--redis-hostname={}", redis_host(r)),
                    format!("--redis-port={REDIS_PORT}"),
                    format!("--rekor-address={}", server_url(r)),
                ])
                .service_account(service_account_name(r));
            Ok(Some(manifests::cron_job(r, &backfill.schedule, &workload)))
        }),
    ]);
    actions
}

fn public_key() -> Arc<dyn Action<Rekor>> {
    fetch_into_secret(
        "fetch-public-key",
        |r: &Rekor| {
            matches!(phase_of(r), Phase::Initialize | Phase::Ready)
                && r.status.as_ref().map_or(true, |s| s.public_key_ref.is_none())
                && condition_true(r, SERVER_AVAILABLE)
        },
        |r: &Rekor| {
            Some(FetchTarget {
                url: format!("{}/api/v1/log/publicKey", server_url(r)),
                secret: child_name(r, "rekor-pub"),
                key: "public".to_string(),
                component: SERVER.to_string(),
            })
        },
        RekorField::PublicKey,
    )
}

fn readiness() -> Vec<Arc<dyn Action<Rekor>>> {
    vec![
        workload_ready("redis-ready", REDIS_AVAILABLE, |r: &Rekor| Some(child_name(r, REDIS))),
        workload_ready("server-ready", SERVER_AVAILABLE, |r: &Rekor| Some(child_name(r, SERVER))),
        public_key(),
        aggregate_ready(),
    ]
}

/// Rekor 的动作流水线
pub fn pipeline() -> Result<Pipeline<Rekor>> {
    Pipeline::builder()
        .phase(Phase::None, [initialize_status()])
        .phase(
            Phase::Pending,
            [
                validate(check),
                resolve::<Rekor, Trillian>(
                    "resolve-trillian",
                    |r: &Rekor| r.spec.trillian.address.clone(),
                    RekorField::TrillianAddress,
                ),
                start_creating(),
            ],
        )
        .phase(Phase::Creating, [validate(check)])
        .phase(Phase::Creating, converge())
        .phase(Phase::Creating, [move_to_initialize()])
        .phase(Phase::Initialize, [validate(check)])
        .phase(Phase::Initialize, converge())
        .phase(Phase::Initialize, readiness())
        .phase(
            Phase::Initialize,
            [mark_ready(|r: &Rekor| vec![RekorField::Url(server_url(r))])],
        )
        .phase(Phase::Ready, [validate(check)])
        .phase(Phase::Ready, converge())
        .phase(Phase::Ready, readiness())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Flow;
    use crate::collaborators::{FetchResponse, MockHttpFetch};
    use crate::crd::{RekorSpec, RekorStatus};
    use crate::testing::{fake_http, Harness, TREE_ID};
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::batch::v1::CronJob;
    use k8s_openapi::api::core::v1::Secret;
    use sigil_common::{find_condition, Condition, ConditionStatus, READY};

    fn rekor_in(phase: Phase) -> Rekor {
        let mut rekor = Rekor::new("rekor", RekorSpec::default());
        rekor.metadata.namespace = Some("sigstore".into());
        rekor.metadata.uid = Some("rekor-uid".into());
        rekor.status = Some(RekorStatus {
            phase,
            trillian_address: Some("trillian-trillian-logserver.sigstore.svc:8091".into()),
            ..Default::default()
        });
        rekor
    }

    #[tokio::test]
    async fn test_invalid_schedule_moves_to_error() {
        let harness = Harness::new();
        let mut rekor = rekor_in(Phase::Ready);
        rekor.spec.backfill_redis.schedule = "every day at noon".into();

        let report = pipeline().unwrap().run(&harness.pass(), &rekor).await;

        assert!(matches!(report.flow, Flow::Fatal(_)));
        assert_eq!(report.status.phase, Phase::Error);
        let ready = find_condition(&report.status.conditions, READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "Failure");
        assert_eq!(report.handled, vec!["validate-spec"]);
    }

    #[tokio::test]
    async fn test_disabled_backfill_skips_schedule_check() {
        let mut rekor = rekor_in(Phase::Pending);
        rekor.spec.backfill_redis.enabled = false;
        rekor.spec.backfill_redis.schedule = "not a schedule".into();
        assert!(check(&rekor).is_ok());
    }

    #[tokio::test]
    async fn test_pending_waits_for_trillian() {
        let harness = Harness::new();
        let mut rekor = rekor_in(Phase::Pending);
        rekor.status.as_mut().unwrap().trillian_address = None;

        let report = pipeline().unwrap().run(&harness.pass(), &rekor).await;

        assert!(matches!(report.flow, Flow::Waiting(_)));
        assert_eq!(report.status.phase, Phase::Pending);
        assert_eq!(report.handled, vec!["validate-spec", "resolve-trillian"]);
    }

    #[tokio::test]
    async fn test_explicit_trillian_address_skips_lookup() {
        let harness = Harness::new();
        let mut rekor = rekor_in(Phase::Pending);
        rekor.status.as_mut().unwrap().trillian_address = None;
        rekor.spec.trillian.address = Some("external-trillian:8091".into());

        let report = pipeline().unwrap().run(&harness.pass(), &rekor).await;

        assert!(matches!(report.flow, Flow::Transition));
        assert_eq!(report.status.phase, Phase::Creating);
        assert_eq!(report.status.trillian_address.as_deref(), Some("external-trillian:8091"));
    }

    #[tokio::test]
    async fn test_creating_pass_creates_tree_and_workloads() {
        let harness = Harness::new();
        let rekor = rekor_in(Phase::Creating);

        let report = pipeline().unwrap().run(&harness.pass(), &rekor).await;

        assert!(matches!(report.flow, Flow::Transition));
        assert_eq!(report.status.tree_id, Some(TREE_ID));
        assert_eq!(report.status.signer_key_ref.as_deref(), Some("rekor-rekor-signer"));
        let server: Deployment = harness.store.fetch("sigstore", "rekor-rekor-server").unwrap();
        let args = server.spec.unwrap().template.spec.unwrap().containers[0].args.clone().unwrap();
        assert!(args.contains(&format!("--trillian_log_server.tlog_id={TREE_ID}")));
        assert!(args.contains(&"--trillian_log_server.port=8091".to_string()));
        let backfill: CronJob = harness.store.fetch("sigstore", "rekor-backfill-redis").unwrap();
        assert_eq!(backfill.spec.unwrap().schedule, "0 0 * * *");
    }

    #[tokio::test]
    async fn test_public_key_fetch_failure_marks_ready_false() {
        let mut http = MockHttpFetch::new();
        http.expect_get().times(3).returning(|_| {
            Ok(FetchResponse {
                status: 503,
                body: Vec::new(),
            })
        });
        let harness = Harness::with_http(http);
        let mut rekor = rekor_in(Phase::Initialize);
        rekor.status.as_mut().unwrap().conditions = vec![Condition::ready(SERVER_AVAILABLE, "ok")];

        let outcome = public_key().handle(&harness.pass(), &rekor).await;

        assert!(matches!(outcome.flow, Flow::Failed(OperatorError::FetchExhausted { attempts: 3, .. })));
        let ready = find_condition(&outcome.patch.conditions, READY).unwrap();
        assert_eq!(ready.reason, "Failure");
        assert_eq!(harness.events.count("FetchFailed"), 1);
    }

    #[tokio::test]
    async fn test_public_key_is_stored_once_server_is_up() {
        let harness = Harness::with_http(fake_http("-----BEGIN PUBLIC KEY-----"));
        let mut rekor = rekor_in(Phase::Initialize);
        let action = public_key();
        assert!(!action.can_handle(&rekor));

        rekor.status.as_mut().unwrap().conditions = vec![Condition::ready(SERVER_AVAILABLE, "ok")];
        assert!(action.can_handle(&rekor));
        let outcome = action.handle(&harness.pass(), &rekor).await;

        assert_eq!(outcome.patch.fields, vec![RekorField::PublicKey("rekor-rekor-pub".into())]);
        let secret: Secret = harness.store.fetch("sigstore", "rekor-rekor-pub").unwrap();
        assert_eq!(secret.data.unwrap()["public"].0, b"-----BEGIN PUBLIC KEY-----".to_vec());
    }
}
