//! 子对象清单
//!
//! 构造受管资源拥有的子对象。每个子对象都带有统一的标签和指向属主的控制器引用，
//! 属主删除时由垃圾回收一并清理。清单内容本身（镜像、参数、卷）是可替换的细节，
//! 协调框架只通过 [`crate::ensure`] 使用它们。

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, ResourceRequirements,
    Secret, SecretKeySelector, SecretVolumeSource, Service, ServiceAccount, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

use crate::crd::{namespace_of, Managed};

/// 组件名标签
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
/// 实例标签
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
/// 归属标签
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";
/// 管理者标签
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// 子对象的完整标签
pub fn labels<R: Managed>(owner: &R, component: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(owner, component);
    labels.insert(PART_OF_LABEL.to_string(), "sigil".to_string());
    labels.insert(MANAGED_BY_LABEL.to_string(), "sigil-operator".to_string());
    labels
}

/// 用于选择器的不可变标签子集
pub fn selector_labels<R: Managed>(owner: &R, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), component.to_string()),
        (INSTANCE_LABEL.to_string(), owner.name_any()),
    ])
}

/// 兄弟资源的选择器
///
/// 由 Securesign 创建的资源共享同一个实例标签，据此只匹配同一组合中的依赖；
/// 独立创建的资源匹配命名空间中的全部实例。
pub fn sibling_selector<R: Managed>(resource: &R) -> String {
    let labels = resource.labels();
    match (labels.get(PART_OF_LABEL), labels.get(INSTANCE_LABEL)) {
        (Some(part_of), Some(instance)) if part_of == "sigil" => format!("{INSTANCE_LABEL}={instance}"),
        _ => String::new(),
    }
}

/// 子对象元数据
pub fn child_meta<R: Managed>(owner: &R, name: &str, component: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace_of(owner)),
        labels: Some(labels(owner, component)),
        owner_references: owner.controller_owner_ref(&()).map(|reference| vec![reference]),
        ..Default::default()
    }
}

/// 集群内服务主机名
pub fn service_host(name: &str, namespace: &str) -> String {
    format!("{name}.{namespace}.svc")
}

/// 服务账号
pub fn service_account<R: Managed>(owner: &R, name: &str, component: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: child_meta(owner, name, component),
        ..Default::default()
    }
}

/// 只读取本命名空间 Secret 与 ConfigMap 的角色
pub fn role<R: Managed>(owner: &R, name: &str, component: &str) -> Role {
    Role {
        metadata: child_meta(owner, name, component),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["secrets".to_string(), "configmaps".to_string()]),
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..Default::default()
        }]),
    }
}

/// 把同名角色绑定到同名服务账号
pub fn role_binding<R: Managed>(owner: &R, name: &str, component: &str) -> RoleBinding {
    RoleBinding {
        metadata: child_meta(owner, name, component),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: name.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: name.to_string(),
            namespace: Some(namespace_of(owner)),
            ..Default::default()
        }]),
    }
}

/// Secret
pub fn secret<R: Managed>(owner: &R, name: &str, component: &str, data: BTreeMap<String, Vec<u8>>) -> Secret {
    Secret {
        metadata: child_meta(owner, name, component),
        data: Some(data.into_iter().map(|(k, v)| (k, ByteString(v))).collect()),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// ConfigMap
pub fn config_map<R: Managed>(owner: &R, name: &str, component: &str, data: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: child_meta(owner, name, component),
        data: Some(data),
        ..Default::default()
    }
}

/// 工作负载挂载的卷
#[derive(Debug, Clone, PartialEq)]
pub enum Mount {
    /// 以只读方式挂载 Secret
    Secret {
        /// Secret 名称
        secret: String,
        /// 挂载路径
        path: String,
    },
    /// 以只读方式挂载 ConfigMap
    Config {
        /// ConfigMap 名称
        config_map: String,
        /// 挂载路径
        path: String,
    },
    /// 挂载卷声明
    Claim {
        /// 卷声明名称
        claim: String,
        /// 挂载路径
        path: String,
    },
}

/// Deployment 的可变部分
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workload {
    /// 对象名称
    pub name: String,
    /// 组件名
    pub component: String,
    /// 镜像
    pub image: String,
    /// 容器参数
    pub args: Vec<String>,
    /// 环境变量
    pub env: Vec<EnvVar>,
    /// 容器端口
    pub port: Option<i32>,
    /// 服务账号
    pub service_account: Option<String>,
    /// 卷
    pub mounts: Vec<Mount>,
}

impl Workload {
    /// 创建单副本工作负载
    pub fn new(name: impl Into<String>, component: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            component: component.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// 设置参数
    pub fn args<I: IntoIterator<Item = S>, S: Into<String>>(mut self, args: I) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// 追加环境变量
    pub fn env(mut self, env: impl IntoIterator<Item = EnvVar>) -> Self {
        self.env.extend(env);
        self
    }

    /// 设置容器端口
    pub fn port(mut self, port: i32) -> Self {
        self.port = Some(port);
        self
    }

    /// 设置服务账号
    pub fn service_account(mut self, name: impl Into<String>) -> Self {
        self.service_account = Some(name.into());
        self
    }

    /// 追加卷
    pub fn mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }
}

/// 从 Secret 的键读取的环境变量
pub fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn volumes(mounts: &[Mount]) -> (Vec<Volume>, Vec<VolumeMount>) {
    mounts
        .iter()
        .enumerate()
        .map(|(index, mount)| {
            let volume_name = format!("volume-{index}");
            match mount {
                Mount::Secret { secret, path } => (
                    Volume {
                        name: volume_name.clone(),
                        secret: Some(SecretVolumeSource {
                            secret_name: Some(secret.clone()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    VolumeMount {
                        name: volume_name,
                        mount_path: path.clone(),
                        read_only: Some(true),
                        ..Default::default()
                    },
                ),
                Mount::Config { config_map, path } => (
                    Volume {
                        name: volume_name.clone(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: config_map.clone(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    VolumeMount {
                        name: volume_name,
                        mount_path: path.clone(),
                        read_only: Some(true),
                        ..Default::default()
                    },
                ),
                Mount::Claim { claim, path } => (
                    Volume {
                        name: volume_name.clone(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: claim.clone(),
                            read_only: None,
                        }),
                        ..Default::default()
                    },
                    VolumeMount {
                        name: volume_name,
                        mount_path: path.clone(),
                        ..Default::default()
                    },
                ),
            }
        })
        .unzip()
}

fn pod_spec(workload: &Workload, restart_policy: Option<&str>) -> PodSpec {
    let (volumes, volume_mounts) = volumes(&workload.mounts);
    PodSpec {
        service_account_name: workload.service_account.clone(),
        restart_policy: restart_policy.map(String::from),
        containers: vec![Container {
            name: workload.component.clone(),
            image: Some(workload.image.clone()),
            args: (!workload.args.is_empty()).then(|| workload.args.clone()),
            env: (!workload.env.is_empty()).then(|| workload.env.clone()),
            ports: workload.port.map(|port| {
                vec![ContainerPort {
                    container_port: port,
                    ..Default::default()
                }]
            }),
            volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
            ..Default::default()
        }],
        volumes: (!volumes.is_empty()).then_some(volumes),
        ..Default::default()
    }
}

/// Deployment
pub fn deployment<R: Managed>(owner: &R, workload: &Workload) -> Deployment {
    Deployment {
        metadata: child_meta(owner, &workload.name, &workload.component),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(owner, &workload.component)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(owner, &workload.component)),
                    ..Default::default()
                }),
                spec: Some(pod_spec(workload, None)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Deployment 是否已有全部可用副本
pub fn deployment_available(deployment: &Deployment) -> bool {
    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let available = deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0);
    desired > 0 && available >= desired
}

/// Service
pub fn service<R: Managed>(owner: &R, name: &str, component: &str, port: i32, target_port: i32) -> Service {
    Service {
        metadata: child_meta(owner, name, component),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(owner, component)),
            ports: Some(vec![ServicePort {
                name: Some(component.to_string()),
                port,
                target_port: Some(IntOrString::Int(target_port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// 卷声明
pub fn persistent_volume_claim<R: Managed>(
    owner: &R,
    name: &str,
    component: &str,
    size: &str,
    storage_class: Option<&str>,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: child_meta(owner, name, component),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: storage_class.map(String::from),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), Quantity(size.to_string()))])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// 定时任务
pub fn cron_job<R: Managed>(owner: &R, schedule: &str, workload: &Workload) -> CronJob {
    CronJob {
        metadata: child_meta(owner, &workload.name, &workload.component),
        spec: Some(CronJobSpec {
            schedule: schedule.to_string(),
            concurrency_policy: Some("Forbid".to_string()),
            job_template: JobTemplateSpec {
                metadata: None,
                spec: Some(JobSpec {
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            labels: Some(labels(owner, &workload.component)),
                            ..Default::default()
                        }),
                        spec: Some(pod_spec(workload, Some("Never"))),
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Rekor, RekorSpec};

    fn owner() -> Rekor {
        let mut rekor = Rekor::new("rekor", RekorSpec::default());
        rekor.metadata.namespace = Some("sigstore".into());
        rekor.metadata.uid = Some("rekor-uid".into());
        rekor
    }

    #[test]
    fn test_child_meta_has_controller_reference() {
        let meta = child_meta(&owner(), "rekor-redis", "rekor-redis");
        let owners = meta.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].uid, "rekor-uid");
        assert_eq!(owners[0].controller, Some(true));
        assert_eq!(meta.labels.unwrap()[INSTANCE_LABEL], "rekor");
    }

    #[test]
    fn test_deployment_selector_matches_template() {
        let workload = Workload::new("rekor-redis", "rekor-redis", "redis:7")
            .port(6379)
            .mount(Mount::Secret {
                secret: "rekor-signer".into(),
                path: "/key".into(),
            });
        let deployment = deployment(&owner(), &workload);
        let spec = deployment.spec.unwrap();
        let selector = spec.selector.match_labels.unwrap();
        let template_labels = spec.template.metadata.unwrap().labels.unwrap();
        assert!(selector.iter().all(|(k, v)| template_labels.get(k) == Some(v)));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.volumes.unwrap().len(), 1);
        assert_eq!(pod.containers[0].volume_mounts.as_ref().unwrap()[0].mount_path, "/key");
    }

    #[test]
    fn test_deployment_available() {
        let mut deployment = deployment(&owner(), &Workload::new("a", "a", "img"));
        assert!(!deployment_available(&deployment));
        deployment.status = Some(k8s_openapi::api::apps::v1::DeploymentStatus {
            available_replicas: Some(1),
            ..Default::default()
        });
        assert!(deployment_available(&deployment));
    }

    #[test]
    fn test_sibling_selector() {
        let mut rekor = owner();
        assert_eq!(sibling_selector(&rekor), "");
        rekor.metadata.labels = Some(BTreeMap::from([
            (PART_OF_LABEL.to_string(), "sigil".to_string()),
            (INSTANCE_LABEL.to_string(), "securesign".to_string()),
        ]));
        assert_eq!(sibling_selector(&rekor), "app.kubernetes.io/instance=securesign");
    }
}
