//! Fulcio 流水线

use async_trait::async_trait;
use serde_json::json;
use sigil_common::{Phase, StatusPatch};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::common::{
    aggregate_ready, ensure_child, ensure_generated_secret, initialize_status, mark_ready, move_to_initialize, rbac,
    service_account_name, start_creating, validate, workload_ready,
};
use crate::action::{Action, Outcome, Pass};
use crate::collaborators::Subject;
use crate::crd::{child_name, namespace_of, Fulcio, FulcioField, SERVER_AVAILABLE};
use crate::error::{OperatorError, Result};
use crate::manifests::{self, service_host, Mount, Workload};
use crate::pipeline::Pipeline;

/// 服务组件
pub const SERVER: &str = "fulcio-server";

const HTTP_PORT: i32 = 5555;

/// 集群内服务地址
pub fn server_url(fulcio: &Fulcio) -> String {
    format!(
        "http://{}",
        service_host(&child_name(fulcio, SERVER), &namespace_of(fulcio))
    )
}

fn certificate_secret(fulcio: &Fulcio) -> String {
    child_name(fulcio, "fulcio-cert")
}

fn config_name(fulcio: &Fulcio) -> String {
    child_name(fulcio, "fulcio-server-config")
}

fn check(fulcio: &Fulcio) -> Result<()> {
    let issuers = &fulcio.spec.config.oidc_issuers;
    if issuers.is_empty() {
        return Err(OperatorError::InvalidSpec("至少需要配置一个 OIDC 签发方".to_string()));
    }
    if let Some(issuer) = issuers.iter().find(|i| i.issuer.is_empty() || i.client_id.is_empty()) {
        return Err(OperatorError::InvalidSpec(format!(
            "OIDC 签发方 {:?} 缺少 issuer 或 clientId",
            issuer.issuer
        )));
    }
    Ok(())
}

/// 服务配置文件内容
fn server_config(fulcio: &Fulcio) -> Result<String> {
    let issuers: serde_json::Map<String, serde_json::Value> = fulcio
        .spec
        .config
        .oidc_issuers
        .iter()
        .map(|issuer| {
            let url = issuer.issuer_url.clone().unwrap_or_else(|| issuer.issuer.clone());
            (
                issuer.issuer.clone(),
                json!({
                    "IssuerURL": url,
                    "ClientID": issuer.client_id,
                    "Type": issuer.r#type,
                }),
            )
        })
        .collect();
    serde_json::to_string_pretty(&json!({ "OIDCIssuers": issuers }))
        .map_err(|e| OperatorError::InvalidSpec(format!("无法序列化 Fulcio 配置: {e}")))
}

struct CertificateAuthority;

#[async_trait]
impl Action<Fulcio> for CertificateAuthority {
    fn name(&self) -> &'static str {
        "ensure-certificate"
    }

    fn can_handle(&self, _resource: &Fulcio) -> bool {
        true
    }

    async fn handle(&self, pass: &Pass, resource: &Fulcio) -> Outcome<Fulcio> {
        let name = certificate_secret(resource);
        let certificate = &resource.spec.certificate;
        let subject = Subject {
            common_name: certificate.common_name.clone(),
            organization: certificate.organization_name.clone(),
            email: certificate.organization_email.clone(),
        };

        let keys = pass.context().keys.clone();
        let generate = || async move {
            let ca = keys.certificate_authority(&subject).await?;
            Ok::<_, OperatorError>(BTreeMap::from([
                ("private".to_string(), ca.private_pem),
                ("public".to_string(), ca.public_pem),
                ("cert".to_string(), ca.certificate_pem),
            ]))
        };
        match ensure_generated_secret(pass, resource, &name, SERVER, generate).await {
            Ok(_) => Outcome::next_with(StatusPatch::new().field(FulcioField::Certificate(name))),
            Err(e) => Outcome::failed(SERVER_AVAILABLE, e),
        }
    }
}

fn converge() -> Vec<Arc<dyn Action<Fulcio>>> {
    let mut actions = rbac::<Fulcio>("fulcio");
    actions.push(Arc::new(CertificateAuthority));
    actions.extend([
        ensure_child("ensure-server-config", SERVER_AVAILABLE, |_, f: &Fulcio| {
            let data = BTreeMap::from([("config.json".to_string(), server_config(f)?)]);
            Ok(Some(manifests::config_map(f, &config_name(f), SERVER, data)))
        }),
        ensure_child("ensure-server", SERVER_AVAILABLE, |config, f: &Fulcio| {
            let workload = Workload::new(child_name(f, SERVER), SERVER, &config.images.fulcio)
                .args([
                    "serve".to_string(),
                    format!("--port={HTTP_PORT}"),
                    "--grpc-port=5554".to_string(),
                    "--ca=fileca".to_string(),
                    "--fileca-key=/var/run/fulcio-secrets/private".to_string(),
                    "--fileca-cert=/var/run/fulcio-secrets/cert".to_string(),
                    "--fileca-watch=false".to_string(),
                    "--config-path=/etc/fulcio-config/config.json".to_string(),
                ])
                .port(HTTP_PORT)
                .service_account(service_account_name(f))
                .mount(Mount::Secret {
                    secret: certificate_secret(f),
                    path: "/var/run/fulcio-secrets".to_string(),
                })
                .mount(Mount::Config {
                    config_map: config_name(f),
                    path: "/etc/fulcio-config".to_string(),
                });
            Ok(Some(manifests::deployment(f, &workload)))
        }),
        ensure_child("ensure-server-service", SERVER_AVAILABLE, |_, f: &Fulcio| {
            Ok(Some(manifests::service(f, &child_name(f, SERVER), SERVER, 80, HTTP_PORT)))
        }),
    ]);
    actions
}

fn readiness() -> Vec<Arc<dyn Action<Fulcio>>> {
    vec![
        workload_ready("server-ready", SERVER_AVAILABLE, |f: &Fulcio| Some(child_name(f, SERVER))),
        aggregate_ready(),
    ]
}

/// Fulcio 的动作流水线
pub fn pipeline() -> Result<Pipeline<Fulcio>> {
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
            [mark_ready(|f: &Fulcio| vec![FulcioField::Url(server_url(f))])],
        )
        .phase(Phase::Ready, [validate(check)])
        .phase(Phase::Ready, converge())
        .phase(Phase::Ready, readiness())
        .build()
}
