//! 依赖解析
//!
//! 两类依赖：同命名空间中兄弟资源暴露的内部地址（[`resolve_dependency`]），
//! 以及需要通过 HTTP 获取的生成数据，如公钥、根证书（[`fetch_with_retry`]）。
//! 前者未就绪时返回 [`OperatorError::DependencyNotReady`]，由重试策略短暂重新入队；
//! 后者在有限次数内线性退避重试，可被取消，首次成功即返回。

use kube::Resource;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::collaborators::HttpFetch;
use crate::config::FetchConfig;
use crate::crd::{is_ready, Fulcio, Managed, Trillian};
use crate::error::{OperatorError, Result};
use crate::store::ScopedStore;

/// 对外暴露地址的资源
pub trait Exposes: Managed {
    /// 已发布的地址
    fn endpoint(&self) -> Option<String>;
}

impl Exposes for Trillian {
    fn endpoint(&self) -> Option<String> {
        self.status.as_ref().and_then(|s| s.url.clone())
    }
}

impl Exposes for Fulcio {
    fn endpoint(&self) -> Option<String> {
        self.status.as_ref().and_then(|s| s.url.clone())
    }
}

/// 在命名空间中查找就绪的依赖资源并返回其地址
pub async fn resolve_dependency<D: Exposes>(store: ScopedStore<'_>, namespace: &str, selector: &str) -> Result<String> {
    let kind = D::kind(&()).to_string();
    let candidates = store.list::<D>(namespace, selector).await?;
    if candidates.is_empty() {
        return Err(OperatorError::DependencyNotReady {
            kind,
            reason: format!("命名空间 {namespace} 中没有匹配的实例"),
        });
    }

    match candidates.iter().filter(|c| is_ready(*c)).find_map(Exposes::endpoint) {
        Some(endpoint) => {
            debug!(kind = %kind, endpoint = %endpoint, "依赖已解析");
            Ok(endpoint)
        }
        None => Err(OperatorError::DependencyNotReady {
            kind,
            reason: "实例尚未就绪".to_string(),
        }),
    }
}

/// 网络探测重试预算
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    /// 最大尝试次数
    pub attempts: u32,
    /// 线性退避基数
    pub backoff: Duration,
}

impl FetchPolicy {
    /// 从配置创建
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            backoff: config.backoff(),
        }
    }
}

/// 获取 URL 内容，非 200 与传输错误都会重试直到预算耗尽
pub async fn fetch_with_retry(
    http: &dyn HttpFetch,
    url: &str,
    policy: &FetchPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let mut last_error = String::new();
    for attempt in 1..=policy.attempts {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OperatorError::Cancelled),
            response = http.get(url) => response,
        };
        match response {
            Ok(response) if response.status == 200 => return Ok(response.body),
            Ok(response) => last_error = format!("HTTP {}", response.status),
            Err(e) => last_error = e,
        }

        warn!(url = %url, attempt, "探测失败: {}", last_error);
        if attempt < policy.attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OperatorError::Cancelled),
                _ = tokio::time::sleep(policy.backoff * attempt) => {}
            }
        }
    }

    Err(OperatorError::FetchExhausted {
        url: url.to_string(),
        attempts: policy.attempts,
        last_error,
    })
}
