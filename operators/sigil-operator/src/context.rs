//! 协调共享上下文

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{HttpFetch, KeyMaterial, TreeProvisioner};
use crate::config::OperatorConfig;
use crate::dependency::FetchPolicy;
use crate::events::EventSink;
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;
use crate::store::Store;

/// 所有控制器共享的依赖
///
/// 不保存任何跨轮次的协调状态，每一轮都从存储重新读取。
pub struct Context {
    /// 对象存储
    pub store: Arc<dyn Store>,
    /// 事件记录
    pub events: Arc<dyn EventSink>,
    /// 密钥材料生成
    pub keys: Arc<dyn KeyMaterial>,
    /// 日志树创建
    pub trees: Arc<dyn TreeProvisioner>,
    /// HTTP 获取
    pub http: Arc<dyn HttpFetch>,
    /// 配置
    pub config: Arc<OperatorConfig>,
    /// 重新入队策略
    pub retry: RetryPolicy,
    /// 网络探测预算
    pub fetch: FetchPolicy,
    /// 指标
    pub metrics: Arc<Metrics>,
    /// 进程级关闭信号，每轮的取消令牌由它派生
    pub shutdown: CancellationToken,
}
