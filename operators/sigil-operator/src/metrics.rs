//! 指标收集与导出模块
//!
//! 记录每种资源的协调次数、耗时与冲突次数，通过 `/metrics` 以 Prometheus 格式导出，
//! 并在 `/healthz` 提供存活探针。

use anyhow::{Context as _, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 协调指标
pub struct Metrics {
    /// Prometheus 注册表
    registry: Registry,
    /// 协调次数，按种类与结果
    reconcile_total: IntCounterVec,
    /// 协调耗时，按种类
    reconcile_duration: HistogramVec,
    /// 乐观并发冲突次数，按种类
    conflicts_total: IntCounterVec,
}

impl Metrics {
    /// 创建并注册指标
    pub fn new() -> std::result::Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("sigil_reconcile_total", "Total number of reconcile passes"),
            &["kind", "outcome"],
        )?;
        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new("sigil_reconcile_duration_seconds", "Duration of reconcile passes"),
            &["kind"],
        )?;
        let conflicts_total = IntCounterVec::new(
            Opts::new("sigil_conflicts_total", "Total number of optimistic concurrency conflicts"),
            &["kind"],
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(conflicts_total.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_duration,
            conflicts_total,
        })
    }

    /// 记录一轮协调
    pub fn record(&self, kind: &str, outcome: &str, elapsed: Duration) {
        self.reconcile_total.with_label_values(&[kind, outcome]).inc();
        self.reconcile_duration
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
        if outcome == "conflict" {
            self.conflicts_total.with_label_values(&[kind]).inc();
        }
    }

    /// 指定种类与结果的协调次数
    pub fn reconcile_count(&self, kind: &str, outcome: &str) -> u64 {
        self.reconcile_total.with_label_values(&[kind, outcome]).get()
    }

    /// 以文本格式导出
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .context("编码指标失败")?;
        String::from_utf8(buffer).context("指标不是有效的 UTF-8")
    }
}

fn respond(metrics: &Metrics, path: &str) -> Response<Body> {
    let (status, body) = match path {
        "/metrics" => match metrics.render() {
            Ok(text) => (StatusCode::OK, text),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        "/healthz" => (StatusCode::OK, "ok".to_string()),
        _ => (StatusCode::NOT_FOUND, "not found".to_string()),
    };
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

/// 启动指标与健康检查服务器，直到取消令牌触发
pub async fn serve(metrics: Arc<Metrics>, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let make_svc = make_service_fn(move |_| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |request: Request<Body>| {
                let response = respond(&metrics, request.uri().path());
                async move { Ok::<_, Infallible>(response) }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("无法绑定指标地址 {addr}"))?
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });

    info!("指标服务器启动在 {}", addr);
    if let Err(e) = server.await {
        error!("指标服务器错误: {}", e);
    }
    Ok(())
}
