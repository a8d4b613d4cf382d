//! 漂移检测
//!
//! 每种子对象通过 [`Compared`] 声明参与比较的子状态（例如 ConfigMap 的 `data`、
//! Deployment 的 `replicas` 与 Pod 模板），比较规则为"派生相等"：期望值中出现的每个字段
//! 都必须在实际值中以相同取值出现，实际值中由存储填充的额外字段不构成漂移。
//! 比较结果是逐字段的 [`Drift`] 列表，便于审计与测试。

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::{json, Value};

use crate::crd::{Ctlog, Fulcio, Rekor, Trillian};
use crate::store::StoreObject;

/// 单个字段的漂移
#[derive(Debug, Clone, PartialEq)]
pub struct Drift {
    /// 字段路径，例如 `state.data.config.json`
    pub path: String,
    /// 期望值
    pub expected: Value,
    /// 实际值，缺失时为 `None`
    pub live: Option<Value>,
}

/// 参与漂移检测的对象种类
pub trait Compared: StoreObject {
    /// 参与比较的子状态
    fn compared_state(&self) -> Value;

    /// 用期望对象的子状态覆盖自身，其余字段保持不变
    fn adopt_state(&mut self, expected: &Self);
}

/// 比较期望对象与实际对象，返回全部漂移
///
/// 除种类自身的子状态外，还比较标签（子集）与属主引用（按 uid）。
pub fn diff<K: Compared>(expected: &K, live: &K) -> Vec<Drift> {
    let mut drifts = Vec::new();

    let expected_labels = json!(expected.meta().labels);
    let live_labels = json!(live.meta().labels);
    subset_diff("metadata.labels", &expected_labels, Some(&live_labels), &mut drifts);

    let live_owners = live.meta().owner_references.as_deref().unwrap_or_default();
    for owner in expected.meta().owner_references.iter().flatten() {
        if !live_owners.iter().any(|o| o.uid == owner.uid) {
            drifts.push(Drift {
                path: format!("metadata.ownerReferences[{}]", owner.name),
                expected: json!(owner),
                live: None,
            });
        }
    }

    subset_diff("state", &expected.compared_state(), Some(&live.compared_state()), &mut drifts);
    drifts
}

/// 以实际对象为基础，写入期望的子状态、标签与属主引用
pub fn merge<K: Compared>(expected: &K, live: &K) -> K {
    let mut merged = live.clone();
    merged.adopt_state(expected);

    if let Some(labels) = &expected.meta().labels {
        let target = merged.meta_mut().labels.get_or_insert_with(Default::default);
        for (key, value) in labels {
            target.insert(key.clone(), value.clone());
        }
    }

    let missing: Vec<OwnerReference> = expected
        .meta()
        .owner_references
        .iter()
        .flatten()
        .filter(|owner| {
            !live
                .meta()
                .owner_references
                .iter()
                .flatten()
                .any(|o| o.uid == owner.uid)
        })
        .cloned()
        .collect();
    if !missing.is_empty() {
        merged
            .meta_mut()
            .owner_references
            .get_or_insert_with(Vec::new)
            .extend(missing);
    }

    merged
}

fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// 派生相等：`expected` 中的每个字段都必须出现在 `live` 中
pub fn subset_diff(path: &str, expected: &Value, live: Option<&Value>, out: &mut Vec<Drift>) {
    let live = live.filter(|v| !v.is_null());
    match (expected, live) {
        (expected, None) if is_unset(expected) => {}
        (Value::Null, _) => {}
        (Value::Object(fields), Some(Value::Object(live_fields))) => {
            for (name, value) in fields {
                subset_diff(&format!("{path}.{name}"), value, live_fields.get(name), out);
            }
        }
        (Value::Array(items), Some(Value::Array(live_items))) if items.len() == live_items.len() => {
            for (index, (item, live_item)) in items.iter().zip(live_items).enumerate() {
                subset_diff(&format!("{path}[{index}]"), item, Some(live_item), out);
            }
        }
        (expected, Some(live)) if expected == live => {}
        (expected, live) => out.push(Drift {
            path: path.to_string(),
            expected: expected.clone(),
            live: live.cloned(),
        }),
    }
}

impl Compared for ConfigMap {
    fn compared_state(&self) -> Value {
        json!({ "data": self.data, "binaryData": self.binary_data })
    }

    fn adopt_state(&mut self, expected: &Self) {
        self.data = expected.data.clone();
        self.binary_data = expected.binary_data.clone();
    }
}

impl Compared for Secret {
    fn compared_state(&self) -> Value {
        json!({ "data": self.data, "type": self.type_ })
    }

    fn adopt_state(&mut self, expected: &Self) {
        self.data = expected.data.clone();
        self.type_ = expected.type_.clone();
    }
}

impl Compared for Service {
    fn compared_state(&self) -> Value {
        let spec = self.spec.as_ref();
        json!({
            "type": spec.and_then(|s| s.type_.clone()),
            "selector": spec.and_then(|s| s.selector.clone()),
            "ports": spec.and_then(|s| s.ports.clone()),
        })
    }

    fn adopt_state(&mut self, expected: &Self) {
        let Some(expected_spec) = expected.spec.as_ref() else {
            return;
        };
        let spec = self.spec.get_or_insert_with(Default::default);
        spec.type_ = expected_spec.type_.clone();
        spec.selector = expected_spec.selector.clone();
        spec.ports = expected_spec.ports.clone();
    }
}

impl Compared for Deployment {
    fn compared_state(&self) -> Value {
        let spec = self.spec.as_ref();
        json!({
            "replicas": spec.and_then(|s| s.replicas),
            "template": spec.map(|s| &s.template),
        })
    }

    fn adopt_state(&mut self, expected: &Self) {
        match (self.spec.as_mut(), expected.spec.as_ref()) {
            (Some(spec), Some(expected_spec)) => {
                spec.replicas = expected_spec.replicas;
                spec.template = expected_spec.template.clone();
            }
            (None, Some(_)) => self.spec = expected.spec.clone(),
            _ => {}
        }
    }
}

impl Compared for CronJob {
    fn compared_state(&self) -> Value {
        let spec = self.spec.as_ref();
        json!({
            "schedule": spec.map(|s| &s.schedule),
            "suspend": spec.and_then(|s| s.suspend),
            "jobTemplate": spec.map(|s| &s.job_template),
        })
    }

    fn adopt_state(&mut self, expected: &Self) {
        match (self.spec.as_mut(), expected.spec.as_ref()) {
            (Some(spec), Some(expected_spec)) => {
                spec.schedule = expected_spec.schedule.clone();
                spec.suspend = expected_spec.suspend;
                spec.job_template = expected_spec.job_template.clone();
            }
            (None, Some(_)) => self.spec = expected.spec.clone(),
            _ => {}
        }
    }
}

impl Compared for ServiceAccount {
    fn compared_state(&self) -> Value {
        Value::Null
    }

    fn adopt_state(&mut self, _expected: &Self) {}
}

impl Compared for Role {
    fn compared_state(&self) -> Value {
        json!({ "rules": self.rules })
    }

    fn adopt_state(&mut self, expected: &Self) {
        self.rules = expected.rules.clone();
    }
}

impl Compared for RoleBinding {
    fn compared_state(&self) -> Value {
        json!({ "roleRef": self.role_ref, "subjects": self.subjects })
    }

    fn adopt_state(&mut self, expected: &Self) {
        self.role_ref = expected.role_ref.clone();
        self.subjects = expected.subjects.clone();
    }
}

/// 卷声明创建后规格不可变，只比较元数据
impl Compared for PersistentVolumeClaim {
    fn compared_state(&self) -> Value {
        Value::Null
    }

    fn adopt_state(&mut self, _expected: &Self) {}
}

macro_rules! compare_spec {
    ($($kind:ty),* $(,)?) => {
        $(
            impl Compared for $kind {
                fn compared_state(&self) -> Value {
                    json!({ "spec": self.spec })
                }

                fn adopt_state(&mut self, expected: &Self) {
                    self.spec = expected.spec.clone();
                }
            }
        )*
    };
}

compare_spec!(Trillian, Fulcio, Rekor, Ctlog);
