//! 资源协调模块
//!
//! 每种资源一个 [`Reconciler`]：按名称重新读取资源、处理终结器、执行一轮动作流水线，
//! 最后在状态变化时写回。协调器本身不保存任何跨轮次的状态。

use kube::{Resource, ResourceExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::action::{Flow, Pass};
use crate::context::Context;
use crate::crd::{phase_of, Managed, FINALIZER};
use crate::error::{OperatorError, Result};
use crate::events::EventRecord;
use crate::pipeline::Pipeline;

/// 一轮协调的结果
#[derive(Debug)]
pub struct ReconcileResult {
    /// 重新入队的延迟，`None` 表示等待下一次变更
    pub requeue_after: Option<Duration>,
    /// 需要上报的错误
    pub error: Option<OperatorError>,
}

impl ReconcileResult {
    fn settled(requeue_after: Option<Duration>) -> Self {
        Self {
            requeue_after,
            error: None,
        }
    }
}

/// 资源协调器
pub struct Reconciler<R: Managed> {
    pipeline: Pipeline<R>,
    context: Arc<Context>,
}

impl<R: Managed> Reconciler<R> {
    /// 创建新的协调器
    pub fn new(pipeline: Pipeline<R>, context: Arc<Context>) -> Self {
        Self { pipeline, context }
    }

    /// 共享上下文
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// 协调指定资源
    pub async fn reconcile(&self, namespace: &str, name: &str) -> ReconcileResult {
        let kind = R::kind(&()).to_string();
        let span = info_span!("reconcile", kind = %kind, namespace = %namespace, name = %name);
        let started = Instant::now();
        let pass = Pass::new(self.context.clone(), self.context.shutdown.child_token());

        let (outcome, result) = self.run(&pass, namespace, name).instrument(span).await;
        self.context.metrics.record(&kind, outcome, started.elapsed());
        result
    }

    async fn run(&self, pass: &Pass, namespace: &str, name: &str) -> (&'static str, ReconcileResult) {
        let resource = match pass.store().get::<R>(namespace, name).await {
            Ok(Some(resource)) => resource,
            Ok(None) => {
                debug!("资源已不存在，跳过");
                return ("done", ReconcileResult::settled(None));
            }
            Err(e) => return self.failure(e.into()),
        };

        if resource.meta().deletion_timestamp.is_some() {
            return match self.finalize(pass, resource).await {
                Ok(()) => ("done", ReconcileResult::settled(None)),
                Err(e) => self.failure(e),
            };
        }

        if phase_of(&resource).is_terminal() {
            debug!("资源处于 Error 阶段，等待规范变更");
            return ("done", ReconcileResult::settled(None));
        }

        let resource = match self.ensure_finalizer(pass, resource).await {
            Ok(resource) => resource,
            Err(e) => return self.failure(e),
        };

        let report = self.pipeline.run(pass, &resource).await;
        debug!(handled = ?report.handled, flow = report.flow.label(), "流水线执行完毕");

        if report.flow.persists() && resource.status() != Some(&report.status) {
            let previous = phase_of(&resource);
            let mut updated = resource.clone();
            *updated.status_mut() = Some(report.status);
            if let Err(e) = pass.store().update_status(&updated).await {
                return self.failure(e.into());
            }
            let current = phase_of(&updated);
            if current != previous {
                info!(from = %previous, to = %current, "阶段迁移");
            }
        }

        let outcome = report.flow.label();
        let requeue_after = self.context.retry.requeue_after(&report.flow);
        match &report.flow {
            Flow::Fatal(e) => error!("资源进入 Error 阶段: {}", e),
            Flow::Failed(e) => warn!("协调失败，稍后重试: {}", e),
            Flow::Waiting(e) => debug!("等待依赖: {}", e),
            Flow::Conflict => debug!("状态冲突，重新协调"),
            _ => {}
        }
        (
            outcome,
            ReconcileResult {
                requeue_after,
                error: report.flow.into_error(),
            },
        )
    }

    /// 首次协调时添加终结器，同一轮继续执行
    async fn ensure_finalizer(&self, pass: &Pass, resource: R) -> Result<R> {
        if resource.finalizers().iter().any(|f| f == FINALIZER) {
            return Ok(resource);
        }
        let mut updated = resource;
        updated.finalizers_mut().push(FINALIZER.to_string());
        let updated = pass.store().update(&updated).await?;
        debug!("已添加终结器");
        Ok(updated)
    }

    /// 删除中的资源：移除终结器，子对象由属主引用回收
    async fn finalize(&self, pass: &Pass, resource: R) -> Result<()> {
        if !resource.finalizers().iter().any(|f| f == FINALIZER) {
            return Ok(());
        }
        pass.record(&resource, EventRecord::normal("finalize", "Deleting", "资源正在删除，子对象将被回收"))
            .await;
        let mut updated = resource;
        updated.finalizers_mut().retain(|f| f != FINALIZER);
        pass.store().update(&updated).await?;
        info!(name = %updated.name_any(), "已移除终结器");
        Ok(())
    }

    /// 流水线之外的失败：冲突与取消不算错误
    fn failure(&self, error: OperatorError) -> (&'static str, ReconcileResult) {
        let requeue_after = self.context.retry.requeue_for_error(&error);
        if error.is_cancelled() {
            return ("cancelled", ReconcileResult::settled(None));
        }
        if error.is_conflict() {
            debug!("写入冲突，重新协调: {}", error);
            return ("conflict", ReconcileResult::settled(requeue_after));
        }
        warn!("协调失败: {}", error);
        (
            "failed",
            ReconcileResult {
                requeue_after,
                error: Some(error),
            },
        )
    }
}
