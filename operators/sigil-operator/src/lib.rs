//! Sigil Operator - Kubernetes Operator 自动化管理签名与透明日志组件
//!
//! 该模块实现了 Sigil 的 Kubernetes Operator，负责协调 Trillian、Fulcio、Rekor、
//! Ctlog 以及组合资源 Securesign，确保集群中的实际状态与声明的期望状态一致。
//!
//! 每种资源的行为由一条按阶段组织的动作流水线描述（见 [`actions`]），
//! 协调器（[`reconcile`]）负责读取资源、执行流水线并写回状态，
//! 控制器（[`controller`]）把它们挂到 kube-runtime 的监听循环上。

pub mod action;
pub mod actions;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod controller;
pub mod crd;
pub mod dependency;
pub mod drift;
pub mod ensure;
pub mod error;
pub mod events;
pub mod manifests;
pub mod metrics;
pub mod pipeline;
pub mod reconcile;
pub mod retry;
pub mod store;

#[cfg(test)]
mod testing;

use anyhow::Result;
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{CommandTreeProvisioner, OpensslKeyMaterial, ReqwestFetch};
use crate::config::OperatorConfig;
use crate::context::Context;
use crate::dependency::FetchPolicy;
use crate::events::KubeEventSink;
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;
use crate::store::KubeStore;

/// 事件上报使用的控制器名称
pub const CONTROLLER_NAME: &str = "sigil-operator";

/// 单次 HTTP 探测的超时时间
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Operator 主结构体
pub struct SigilOperator {
    /// 控制器
    controller: Arc<RwLock<controller::Controller>>,
}

impl SigilOperator {
    /// 创建新的 Operator 实例
    pub async fn new(config: OperatorConfig, metrics: Arc<Metrics>, shutdown: CancellationToken) -> Result<Self> {
        // 创建 Kubernetes 客户端
        let client = Client::try_default().await?;

        let context = Arc::new(Context {
            store: Arc::new(KubeStore::new(client.clone())),
            events: Arc::new(KubeEventSink::new(client.clone(), CONTROLLER_NAME)),
            keys: Arc::new(OpensslKeyMaterial::new(config.tools.openssl.clone())),
            trees: Arc::new(CommandTreeProvisioner::new(config.tools.createtree.clone())),
            http: Arc::new(ReqwestFetch::new(FETCH_TIMEOUT)?),
            retry: RetryPolicy::from_config(&config.retry),
            fetch: FetchPolicy::from_config(&config.fetch),
            config: Arc::new(config),
            metrics,
            shutdown,
        });

        // 创建控制器
        let controller = Arc::new(RwLock::new(controller::Controller::new(client, context)));

        Ok(Self { controller })
    }

    /// 启动 Operator
    pub async fn start(&self) -> Result<()> {
        self.controller.write().await.start().await
    }

    /// 停止 Operator
    pub async fn stop(&self) -> Result<()> {
        self.controller.write().await.stop().await
    }
}
