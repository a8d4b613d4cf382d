//! Trillian 流水线
//!
//! 部署数据库（可选）、日志服务与签名器。日志服务地址在全部组件就绪后发布到状态，
//! Rekor 与 Ctlog 通过它解析依赖。

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sigil_common::{Phase, StatusPatch};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::common::{
    aggregate_ready, ensure_child, ensure_generated_secret, initialize_status, mark_ready, move_to_initialize, rbac,
    service_account_name, start_creating, validate, workload_ready,
};
use crate::action::{Action, Outcome, Pass};
use crate::crd::trillian::{DB_AVAILABLE, SIGNER_AVAILABLE};
use crate::crd::{child_name, namespace_of, Trillian, TrillianField, SERVER_AVAILABLE};
use crate::error::{OperatorError, Result};
use crate::manifests::{self, secret_env, service_host, Mount, Workload};
use crate::pipeline::Pipeline;

/// 数据库组件
pub const DB: &str = "trillian-db";
/// 日志服务组件
pub const LOG_SERVER: &str = "trillian-logserver";
/// 签名器组件
pub const LOG_SIGNER: &str = "trillian-logsigner";

/// 日志服务 gRPC 端口
pub const SERVER_PORT: i32 = 8091;
const MYSQL_PORT: i32 = 3306;

/// 日志服务地址：`<服务名>.<命名空间>.svc:8091`
pub fn server_address(trillian: &Trillian) -> String {
    format!(
        "{}:{SERVER_PORT}",
        service_host(&child_name(trillian, LOG_SERVER), &namespace_of(trillian))
    )
}

/// 数据库凭据 Secret 名称，显式指定的优先
pub fn database_secret(trillian: &Trillian) -> String {
    trillian
        .spec
        .database
        .database_secret_ref
        .clone()
        .unwrap_or_else(|| child_name(trillian, "trillian-db-secret"))
}

fn check(trillian: &Trillian) -> Result<()> {
    let database = &trillian.spec.database;
    if !database.create && database.database_secret_ref.is_none() {
        return Err(OperatorError::InvalidSpec(
            "使用外部数据库时必须指定 databaseSecretRef".to_string(),
        ));
    }
    Ok(())
}

fn random_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

fn database_credentials(host: &str) -> BTreeMap<String, Vec<u8>> {
    BTreeMap::from([
        ("mysql-root-password".to_string(), random_password().into_bytes()),
        ("mysql-password".to_string(), random_password().into_bytes()),
        ("mysql-user".to_string(), b"mysql".to_vec()),
        ("mysql-database".to_string(), b"trillian".to_vec()),
        ("mysql-host".to_string(), host.as_bytes().to_vec()),
        ("mysql-port".to_string(), MYSQL_PORT.to_string().into_bytes()),
    ])
}

struct DatabaseSecret;

#[async_trait]
impl Action<Trillian> for DatabaseSecret {
    fn name(&self) -> &'static str {
        "ensure-database-secret"
    }

    fn can_handle(&self, _resource: &Trillian) -> bool {
        true
    }

    async fn handle(&self, pass: &Pass, resource: &Trillian) -> Outcome<Trillian> {
        let name = database_secret(resource);
        if resource.spec.database.database_secret_ref.is_some() {
            return Outcome::next_with(StatusPatch::new().field(TrillianField::DatabaseSecret(name)));
        }

        let host = child_name(resource, DB);
        let generate = || {
            let credentials = database_credentials(&host);
            async move { Ok::<_, OperatorError>(credentials) }
        };
        match ensure_generated_secret(pass, resource, &name, DB, generate).await {
            Ok(_) => Outcome::next_with(StatusPatch::new().field(TrillianField::DatabaseSecret(name))),
            Err(e) => Outcome::failed(DB_AVAILABLE, e),
        }
    }
}

fn database_env(trillian: &Trillian) -> Vec<k8s_openapi::api::core::v1::EnvVar> {
    let secret = database_secret(trillian);
    vec![
        secret_env("MYSQL_USER", &secret, "mysql-user"),
        secret_env("MYSQL_PASSWORD", &secret, "mysql-password"),
        secret_env("MYSQL_DATABASE", &secret, "mysql-database"),
        secret_env("MYSQL_HOSTNAME", &secret, "mysql-host"),
        secret_env("MYSQL_PORT", &secret, "mysql-port"),
    ]
}

fn storage_args() -> Vec<&'static str> {
    vec![
        "--storage_system=mysql",
        "--quota_system=mysql",
        "--mysql_uri=$(MYSQL_USER):$(MYSQL_PASSWORD)@tcp($(MYSQL_HOSTNAME):$(MYSQL_PORT))/$(MYSQL_DATABASE)",
        "--alsologtostderr",
    ]
}

fn converge() -> Vec<Arc<dyn Action<Trillian>>> {
    let mut actions = rbac::<Trillian>("trillian");
    actions.push(Arc::new(DatabaseSecret));
    actions.extend([
        ensure_child("ensure-db-volume", DB_AVAILABLE, |_, t: &Trillian| {
            let database = &t.spec.database;
            Ok(database.create.then(|| {
                manifests::persistent_volume_claim(
                    t,
                    &child_name(t, DB),
                    DB,
                    &database.size,
                    database.storage_class.as_deref(),
                )
            }))
        }),
        ensure_child("ensure-db", DB_AVAILABLE, |config, t: &Trillian| {
            let secret = database_secret(t);
            let workload = Workload::new(child_name(t, DB), DB, &config.images.trillian_db)
                .port(MYSQL_PORT)
                .service_account(service_account_name(t))
                .env([
                    secret_env("MYSQL_ROOT_PASSWORD", &secret, "mysql-root-password"),
                    secret_env("MYSQL_USER", &secret, "mysql-user"),
                    secret_env("MYSQL_PASSWORD", &secret, "mysql-password"),
                    secret_env("MYSQL_DATABASE", &secret, "mysql-database"),
                ])
                .mount(Mount::Claim {
                    claim: child_name(t, DB),
                    path: "/var/lib/mysql".to_string(),
                });
            Ok(t.spec.database.create.then(|| manifests::deployment(t, &workload)))
        }),
        ensure_child("ensure-db-service", DB_AVAILABLE, |_, t: &Trillian| {
            Ok(t.spec
                .database
                .create
                .then(|| manifests::service(t, &child_name(t, DB), DB, MYSQL_PORT, MYSQL_PORT)))
        }),
        ensure_child("ensure-log-server", SERVER_AVAILABLE, |config, t: &Trillian| {
            let mut args = storage_args();
            args.extend(["--rpc_endpoint=0.0.0.0:8091", "--http_endpoint=0.0.0.0:8090"]);
            let workload = Workload::new(child_name(t, LOG_SERVER), LOG_SERVER, &config.images.trillian_server)
                .args(args)
                .env(database_env(t))
                .port(SERVER_PORT)
                .service_account(service_account_name(t));
            Ok(Some(manifests::deployment(t, &workload)))
        }),
        ensure_child("ensure-log-server-service", SERVER_AVAILABLE, |_, t: &Trillian| {
            Ok(Some(manifests::service(
                t,
                &child_name(t, LOG_SERVER),
                LOG_SERVER,
                SERVER_PORT,
                SERVER_PORT,
            )))
        }),
        ensure_child("ensure-log-signer", SIGNER_AVAILABLE, |config, t: &Trillian| {
            let mut args = storage_args();
            args.extend([
                "--rpc_endpoint=0.0.0.0:8091",
                "--http_endpoint=0.0.0.0:8090",
                "--force_master=true",
            ]);
            let workload = Workload::new(child_name(t, LOG_SIGNER), LOG_SIGNER, &config.images.trillian_signer)
                .args(args)
                .env(database_env(t))
                .port(SERVER_PORT)
                .service_account(service_account_name(t));
            Ok(Some(manifests::deployment(t, &workload)))
        }),
    ]);
    actions
}

fn readiness() -> Vec<Arc<dyn Action<Trillian>>> {
    vec![
        workload_ready("db-ready", DB_AVAILABLE, |t: &Trillian| {
            t.spec.database.create.then(|| child_name(t, DB))
        }),
        workload_ready("log-server-ready", SERVER_AVAILABLE, |t: &Trillian| {
            Some(child_name(t, LOG_SERVER))
        }),
        workload_ready("log-signer-ready", SIGNER_AVAILABLE, |t: &Trillian| {
            Some(child_name(t, LOG_SIGNER))
        }),
        aggregate_ready(),
    ]
}

/// Trillian 的动作流水线
pub fn pipeline() -> Result<Pipeline<Trillian>> {
    Pipeline::builder()
        .phase(Phase::None, [initialize_status()])
        .phase(Phase::Pending, [validate(check), start_creating()])
        .phase(Phase::Creating, [validate(check)])
        .phase(Phase::Creating, converge())
        .phase(Phase::Creating, [move_to_initialize()])
        .phase(Phase::Initialize, [validate(check)])
        .phase(Phase::Initialize, converge())
        .phase(Phase::Initialize, readiness())
        .phase(
            Phase::Initialize,
            [mark_ready(|t: &Trillian| vec![TrillianField::Url(server_address(t))])],
        )
        .phase(Phase::Ready, [validate(check)])
        .phase(Phase::Ready, converge())
        .phase(Phase::Ready, readiness())
        .build()
}
