//! Ctlog 流水线
//!
//! 依赖 Trillian 与 Fulcio：日志树建在 Trillian 中，Fulcio 的根证书作为可接受的证书链根。
//! 服务配置由状态中已解析的地址、树 ID 与 Secret 名称生成。

use async_trait::async_trait;
use sigil_common::{Phase, StatusPatch};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::common::{
    aggregate_ready, create_tree, ensure_child, ensure_generated_secret, fetch_into_secret, initialize_status,
    mark_ready, move_to_initialize, rbac, resolve, service_account_name, start_creating, validate, workload_ready,
    FetchTarget,
};
use crate::action::{Action, Outcome, Pass};
use crate::crd::{child_name, namespace_of, phase_of, Ctlog, CtlogField, Fulcio, Trillian, SERVER_AVAILABLE};
use crate::ensure::ensure;
use crate::error::{OperatorError, Result};
use crate::manifests::{self, service_host, Mount, Workload};
use crate::pipeline::Pipeline;

/// 服务组件
pub const SERVER: &str = "ctlog";

const HTTP_PORT: i32 = 6962;
const KEYS_PATH: &str = "/ctfe-keys";
const ROOT_PATH: &str = "/ctfe-root";
const CONFIG_PATH: &str = "/ctfe-config";

/// 集群内服务地址
pub fn server_url(ctlog: &Ctlog) -> String {
    format!("http://{}", service_host(&child_name(ctlog, SERVER), &namespace_of(ctlog)))
}

fn signer_secret(ctlog: &Ctlog) -> String {
    child_name(ctlog, "ctlog-signer")
}

fn root_secret(ctlog: &Ctlog) -> String {
    child_name(ctlog, "fulcio-root")
}

fn config_secret(ctlog: &Ctlog) -> String {
    child_name(ctlog, "ctlog-config")
}

fn check(ctlog: &Ctlog) -> Result<()> {
    if let Some(url) = &ctlog.spec.fulcio_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(OperatorError::InvalidSpec(format!("fulcioUrl {url} 必须是 HTTP 地址")));
        }
    }
    if matches!(ctlog.spec.tree_id, Some(id) if id <= 0) {
        return Err(OperatorError::InvalidSpec("treeId 必须为正数".to_string()));
    }
    Ok(())
}

fn missing(kind: &str, what: &str) -> OperatorError {
    OperatorError::DependencyNotReady {
        kind: kind.to_string(),
        reason: format!("状态中尚无{what}"),
    }
}

/// 服务配置（protobuf 文本格式）
fn server_config(ctlog: &Ctlog) -> Result<String> {
    let status = ctlog.status.as_ref();
    let address = status
        .and_then(|s| s.trillian_address.clone())
        .ok_or_else(|| missing("Trillian", "地址"))?;
    let tree_id = status.and_then(|s| s.tree_id).ok_or_else(|| missing("Trillian", "日志树"))?;

    Ok(format!(
        r#"backends:{{backend:{{name:"trillian" backend_spec:"{address}"}}}}
log_configs:{{config:{{
  log_id:{tree_id}
  prefix:"{prefix}"
  roots_pem_file:"{ROOT_PATH}/root.pem"
  private_key:{{[type.googleapis.com/keyspb.PEMKeyFile]:{{path:"{KEYS_PATH}/private"}}}}
  ext_key_usages:"CodeSigning"
  log_backend_name:"trillian"
}}}}
"#,
        prefix = ctlog.metadata.name.as_deref().unwrap_or("ctlog"),
    ))
}

struct SignerKey;

#[async_trait]
impl Action<Ctlog> for SignerKey {
    fn name(&self) -> &'static str {
        "ensure-signer-key"
    }

    fn can_handle(&self, _resource: &Ctlog) -> bool {
        true
    }

    async fn handle(&self, pass: &Pass, resource: &Ctlog) -> Outcome<Ctlog> {
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
            Ok(_) => Outcome::next_with(StatusPatch::new().field(CtlogField::SignerKey(name))),
            Err(e) => Outcome::failed(SERVER_AVAILABLE, e),
        }
    }
}

struct ServerConfig;

#[async_trait]
impl Action<Ctlog> for ServerConfig {
    fn name(&self) -> &'static str {
        "ensure-server-config"
    }

    fn can_handle(&self, _resource: &Ctlog) -> bool {
        true
    }

    async fn handle(&self, pass: &Pass, resource: &Ctlog) -> Outcome<Ctlog> {
        let config = match server_config(resource) {
            Ok(config) => config,
            Err(e) => return Outcome::failed(SERVER_AVAILABLE, e),
        };
        let name = config_secret(resource);
        let secret = manifests::secret(
            resource,
            &name,
            SERVER,
            BTreeMap::from([("config".to_string(), config.into_bytes())]),
        );
        match ensure(pass.store(), &secret).await {
            Ok(ensured) => {
                if ensured.changed() {
                    tracing::info!(secret = %name, "CT 日志配置已更新");
                }
                Outcome::next_with(StatusPatch::new().field(CtlogField::Config(name)))
            }
            Err(e) => Outcome::failed(SERVER_AVAILABLE, e.into()),
        }
    }
}

fn fulcio_root() -> Arc<dyn Action<Ctlog>> {
    fetch_into_secret(
        "fetch-fulcio-root",
        |c: &Ctlog| {
            matches!(phase_of(c), Phase::Creating | Phase::Initialize | Phase::Ready)
                && c.status.as_ref().map_or(true, |s| s.root_certificate_ref.is_none())
        },
        |c: &Ctlog| {
            let fulcio = c.status.as_ref().and_then(|s| s.fulcio_url.clone())?;
            Some(FetchTarget {
                url: format!("{fulcio}/api/v1/rootCert"),
                secret: root_secret(c),
                key: "root.pem".to_string(),
                component: SERVER.to_string(),
            })
        },
        CtlogField::RootCertificate,
    )
}

fn converge() -> Vec<Arc<dyn Action<Ctlog>>> {
    let mut actions = rbac::<Ctlog>("ctlog");
    actions.push(Arc::new(SignerKey));
    actions.push(create_tree(
        SERVER_AVAILABLE,
        |c: &Ctlog| c.spec.tree_id,
        |c: &Ctlog| c.status.as_ref().and_then(|s| s.tree_id),
        |c: &Ctlog| c.status.as_ref().and_then(|s| s.trillian_address.clone()),
        CtlogField::TreeId,
    ));
    actions.push(fulcio_root());
    actions.push(Arc::new(ServerConfig));
    actions.extend([
        ensure_child("ensure-server", SERVER_AVAILABLE, |config, c: &Ctlog| {
            let workload = Workload::new(child_name(c, SERVER), SERVER, &config.images.ctlog)
                .args([
                    format!("--http_endpoint=0.0.0.0:{HTTP_PORT}"),
                    format!("--log_config={CONFIG_PATH}/config"),
                    "--alsologtostderr".to_string(),
                ])
                .port(HTTP_PORT)
                .service_account(service_account_name(c))
                .mount(Mount::Secret {
                    secret: signer_secret(c),
                    path: KEYS_PATH.to_string(),
                })
                .mount(Mount::Secret {
                    secret: root_secret(c),
                    path: ROOT_PATH.to_string(),
                })
                .mount(Mount::Secret {
                    secret: config_secret(c),
                    path: CONFIG_PATH.to_string(),
                });
            Ok(Some(manifests::deployment(c, &workload)))
        }),
        ensure_child("ensure-server-service", SERVER_AVAILABLE, |_, c: &Ctlog| {
            Ok(Some(manifests::service(c, &child_name(c, SERVER), SERVER, 80, HTTP_PORT)))
        }),
    ]);
    actions
}

fn readiness() -> Vec<Arc<dyn Action<Ctlog>>> {
    vec![
        workload_ready("server-ready", SERVER_AVAILABLE, |c: &Ctlog| Some(child_name(c, SERVER))),
        aggregate_ready(),
    ]
}

/// Ctlog 的动作流水线
pub fn pipeline() -> Result<Pipeline<Ctlog>> {
    Pipeline::builder()
        .phase(Phase::None, [initialize_status()])
        .phase(
            Phase::Pending,
            [
                validate(check),
                resolve::<Ctlog, Trillian>(
                    "resolve-trillian",
                    |c: &Ctlog| c.spec.trillian.address.clone(),
                    CtlogField::TrillianAddress,
                ),
                resolve::<Ctlog, Fulcio>(
                    "resolve-fulcio",
                    |c: &Ctlog| c.spec.fulcio_url.clone(),
                    CtlogField::FulcioUrl,
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
            [mark_ready(|c: &Ctlog| vec![CtlogField::Url(server_url(c))])],
        )
        .phase(Phase::Ready, [validate(check)])
        .phase(Phase::Ready, converge())
        .phase(Phase::Ready, readiness())
        .build()
}
