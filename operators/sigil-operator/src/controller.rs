//! 控制器模块
//!
//! 为每种资源启动一个 kube-runtime 控制器：监听资源本身及其拥有的子对象，
//! 把触发的协调请求交给对应的 [`Reconciler`]，并按协调结果决定重新入队时间。

use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller as KubeController},
        watcher,
    },
    Resource, ResourceExt,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actions::{ctlog, fulcio, rekor, securesign, trillian};
use crate::context::Context;
use crate::crd::{Ctlog, Fulcio, Managed, Rekor, Securesign, Trillian};
use crate::error::OperatorError;
use crate::reconcile::Reconciler;

/// 控制器结构体
pub struct Controller {
    /// Kubernetes 客户端
    client: Client,
    /// 共享上下文
    context: Arc<Context>,
    /// 控制器是否正在运行
    running: Arc<RwLock<bool>>,
    /// 各资源的控制循环
    tasks: Vec<JoinHandle<()>>,
}

impl Controller {
    /// 创建新的控制器
    pub fn new(client: Client, context: Arc<Context>) -> Self {
        Self {
            client,
            context,
            running: Arc::new(RwLock::new(false)),
            tasks: Vec::new(),
        }
    }

    /// 启动全部资源的控制循环
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("控制器已在运行");
                return Ok(());
            }
            *running = true;
        }

        let client = self.client.clone();
        let namespace = self.context.config.namespace.clone();
        let ns = namespace.as_deref();
        let shutdown = self.context.shutdown.clone();

        let reconciler = Arc::new(Reconciler::new(trillian::pipeline()?, self.context.clone()));
        let controller = owns_workloads(watch::<Trillian>(&client, ns), &client, ns);
        self.tasks.push(tokio::spawn(drive(controller, reconciler, shutdown.clone())));

        let reconciler = Arc::new(Reconciler::new(fulcio::pipeline()?, self.context.clone()));
        let controller = owns_workloads(watch::<Fulcio>(&client, ns), &client, ns);
        self.tasks.push(tokio::spawn(drive(controller, reconciler, shutdown.clone())));

        let reconciler = Arc::new(Reconciler::new(rekor::pipeline()?, self.context.clone()));
        let controller = owns_workloads(watch::<Rekor>(&client, ns), &client, ns);
        self.tasks.push(tokio::spawn(drive(controller, reconciler, shutdown.clone())));

        let reconciler = Arc::new(Reconciler::new(ctlog::pipeline()?, self.context.clone()));
        let controller = owns_workloads(watch::<Ctlog>(&client, ns), &client, ns);
        self.tasks.push(tokio::spawn(drive(controller, reconciler, shutdown.clone())));

        let reconciler = Arc::new(Reconciler::new(securesign::pipeline()?, self.context.clone()));
        let controller = watch::<Securesign>(&client, ns)
            .owns(api::<Trillian>(&client, ns), watcher::Config::default())
            .owns(api::<Fulcio>(&client, ns), watcher::Config::default())
            .owns(api::<Rekor>(&client, ns), watcher::Config::default())
            .owns(api::<Ctlog>(&client, ns), watcher::Config::default());
        self.tasks.push(tokio::spawn(drive(controller, reconciler, shutdown)));

        match ns {
            Some(ns) => info!("Sigil Operator 控制器已启动，监听命名空间 {}", ns),
            None => info!("Sigil Operator 控制器已启动，监听全部命名空间"),
        }
        Ok(())
    }

    /// 停止控制器，等待进行中的协调结束
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            *running = false;
        }

        self.context.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("控制循环异常退出: {}", e);
            }
        }

        info!("Sigil Operator 控制器已停止");
        Ok(())
    }
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

fn watch<R>(client: &Client, namespace: Option<&str>) -> KubeController<R>
where
    R: Managed + Resource<Scope = NamespaceResourceScope>,
{
    KubeController::new(api::<R>(client, namespace), watcher::Config::default())
}

fn owns_workloads<R>(controller: KubeController<R>, client: &Client, namespace: Option<&str>) -> KubeController<R>
where
    R: Managed + Resource<Scope = NamespaceResourceScope>,
{
    controller
        .owns(api::<Deployment>(client, namespace), watcher::Config::default())
        .owns(api::<Service>(client, namespace), watcher::Config::default())
        .owns(api::<Secret>(client, namespace), watcher::Config::default())
        .owns(api::<ConfigMap>(client, namespace), watcher::Config::default())
        .owns(api::<CronJob>(client, namespace), watcher::Config::default())
        .owns(api::<PersistentVolumeClaim>(client, namespace), watcher::Config::default())
        .owns(api::<ServiceAccount>(client, namespace), watcher::Config::default())
        .owns(api::<Role>(client, namespace), watcher::Config::default())
        .owns(api::<RoleBinding>(client, namespace), watcher::Config::default())
}

async fn drive<R>(controller: KubeController<R>, reconciler: Arc<Reconciler<R>>, shutdown: CancellationToken)
where
    R: Managed,
{
    let kind = R::kind(&()).to_string();
    info!("启动 {} 控制器", kind);
    controller
        .graceful_shutdown_on(async move { shutdown.cancelled().await })
        .run(reconcile_object, error_policy, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!("协调完成: {}", object),
                Err(e) => warn!("协调错误: {}", e),
            }
        })
        .await;
    info!("{} 控制器已退出", kind);
}

async fn reconcile_object<R: Managed>(resource: Arc<R>, reconciler: Arc<Reconciler<R>>) -> Result<Action, OperatorError> {
    let namespace = resource.namespace().unwrap_or_default();
    let result = reconciler.reconcile(&namespace, &resource.name_any()).await;
    match result.error {
        // 不可重试的错误已经写入 Error 阶段，只等待规范变更
        Some(e) if !e.is_fatal() => Err(e),
        _ => Ok(match result.requeue_after {
            Some(after) => Action::requeue(after),
            None => Action::await_change(),
        }),
    }
}

fn error_policy<R: Managed>(_resource: Arc<R>, error: &OperatorError, reconciler: Arc<Reconciler<R>>) -> Action {
    match reconciler.context().retry.requeue_for_error(error) {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    }
}
