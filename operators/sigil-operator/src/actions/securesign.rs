//! Securesign 流水线
//!
//! 为每个组件创建一个子资源，并把子资源的 `Ready` 条件镜像为自身的组件条件。
//! 子资源共享同一个实例标签，依赖解析因此只会匹配同一组合中的兄弟资源。

use async_trait::async_trait;
use kube::ResourceExt;
use sigil_common::{Condition, Phase, StatusPatch};
use std::marker::PhantomData;
use std::sync::Arc;

use super::common::{aggregate_ready, ensure_child, initialize_status, mark_ready, move_to_initialize, start_creating};
use crate::action::{Action, Outcome, Pass};
use crate::crd::securesign::{CTLOG_AVAILABLE, FULCIO_AVAILABLE, REKOR_AVAILABLE, TRILLIAN_AVAILABLE};
use crate::crd::{
    child_name, namespace_of, phase_of, ready_condition, Ctlog, Fulcio, Managed, Rekor, Securesign, SecuresignField,
    Trillian,
};
use crate::error::Result;
use crate::manifests::child_meta;
use crate::pipeline::Pipeline;

const TRILLIAN: &str = "trillian";
const FULCIO: &str = "fulcio";
const REKOR: &str = "rekor";
const CTLOG: &str = "ctlog";

fn trillian(securesign: &Securesign) -> Trillian {
    let name = child_name(securesign, TRILLIAN);
    let mut child = Trillian::new(&name, securesign.spec.trillian.clone());
    child.metadata = child_meta(securesign, &name, TRILLIAN);
    child
}

fn fulcio(securesign: &Securesign) -> Fulcio {
    let name = child_name(securesign, FULCIO);
    let mut child = Fulcio::new(&name, securesign.spec.fulcio.clone());
    child.metadata = child_meta(securesign, &name, FULCIO);
    child
}

fn rekor(securesign: &Securesign) -> Rekor {
    let name = child_name(securesign, REKOR);
    let mut child = Rekor::new(&name, securesign.spec.rekor.clone());
    child.metadata = child_meta(securesign, &name, REKOR);
    child
}

fn ctlog(securesign: &Securesign) -> Ctlog {
    let name = child_name(securesign, CTLOG);
    let mut child = Ctlog::new(&name, securesign.spec.ctlog.clone());
    child.metadata = child_meta(securesign, &name, CTLOG);
    child
}

struct MirrorChild<K> {
    name: &'static str,
    condition: &'static str,
    component: &'static str,
    field: fn(String) -> SecuresignField,
    child: PhantomData<fn() -> K>,
}

#[async_trait]
impl<K: Managed> Action<Securesign> for MirrorChild<K> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_handle(&self, resource: &Securesign) -> bool {
        matches!(phase_of(resource), Phase::Initialize | Phase::Ready)
    }

    async fn handle(&self, pass: &Pass, resource: &Securesign) -> Outcome<Securesign> {
        let name = child_name(resource, self.component);
        let child = match pass.store().get::<K>(&namespace_of(resource), &name).await {
            Ok(child) => child,
            Err(e) => return Outcome::failed(self.condition, e.into()),
        };

        let condition = match child.as_ref().and_then(|c| ready_condition(c)) {
            Some(ready) => Condition {
                type_: self.condition.to_string(),
                status: ready.status,
                reason: ready.reason.clone(),
                message: ready.message.clone(),
                last_transition_time: None,
            },
            None => Condition::pending(self.condition, format!("{} 尚未上报状态", name)),
        };
        let mut patch = StatusPatch::new().condition(condition);
        if let Some(child) = &child {
            patch = patch.field((self.field)(child.name_any()));
        }
        Outcome::next_with(patch)
    }
}

fn mirror<K: Managed>(
    name: &'static str,
    condition: &'static str,
    component: &'static str,
    field: fn(String) -> SecuresignField,
) -> Arc<dyn Action<Securesign>> {
    Arc::new(MirrorChild::<K> {
        name,
        condition,
        component,
        field,
        child: PhantomData,
    })
}

fn children() -> Vec<Arc<dyn Action<Securesign>>> {
    vec![
        ensure_child("ensure-trillian", TRILLIAN_AVAILABLE, |_, s: &Securesign| Ok(Some(trillian(s)))),
        ensure_child("ensure-fulcio", FULCIO_AVAILABLE, |_, s: &Securesign| Ok(Some(fulcio(s)))),
        ensure_child("ensure-rekor", REKOR_AVAILABLE, |_, s: &Securesign| Ok(Some(rekor(s)))),
        ensure_child("ensure-ctlog", CTLOG_AVAILABLE, |_, s: &Securesign| Ok(Some(ctlog(s)))),
    ]
}

fn mirrors() -> Vec<Arc<dyn Action<Securesign>>> {
    vec![
        mirror::<Trillian>("mirror-trillian", TRILLIAN_AVAILABLE, TRILLIAN, SecuresignField::Trillian),
        mirror::<Fulcio>("mirror-fulcio", FULCIO_AVAILABLE, FULCIO, SecuresignField::Fulcio),
        mirror::<Rekor>("mirror-rekor", REKOR_AVAILABLE, REKOR, SecuresignField::Rekor),
        mirror::<Ctlog>("mirror-ctlog", CTLOG_AVAILABLE, CTLOG, SecuresignField::Ctlog),
        aggregate_ready(),
    ]
}

/// Securesign 的动作流水线
pub fn pipeline() -> Result<Pipeline<Securesign>> {
    Pipeline::builder()
        .phase(Phase::None, [initialize_status()])
        .phase(Phase::Pending, [start_creating()])
        .phase(Phase::Creating, children())
        .phase(Phase::Creating, [move_to_initialize()])
        .phase(Phase::Initialize, children())
        .phase(Phase::Initialize, mirrors())
        .phase(Phase::Initialize, [mark_ready(|_: &Securesign| Vec::new())])
        .phase(Phase::Ready, children())
        .phase(Phase::Ready, mirrors())
        .build()
}
