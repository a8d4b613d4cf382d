//! 配置管理模块
//!
//! 加载 Operator 的配置：先取内置默认值，再叠加可选的 YAML/JSON 配置文件，
//! 最后叠加 `SIGIL__` 前缀的环境变量（例如 `SIGIL__RETRY__TRANSIENT_SECS=10`）。

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Operator 配置结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// 日志级别
    pub log_level: String,
    /// 只监听该命名空间，缺省时监听全部命名空间
    #[serde(default)]
    pub namespace: Option<String>,
    /// 指标服务器配置
    pub metrics: MetricsConfig,
    /// 重新入队间隔
    pub retry: RetryConfig,
    /// 网络探测配置
    pub fetch: FetchConfig,
    /// 工作负载镜像
    pub images: ImageConfig,
    /// 外部工具路径
    pub tools: ToolConfig,
}

/// 指标服务器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// 监听地址
    pub listen_address: String,
    /// 监听端口
    pub port: u16,
}

/// 重新入队间隔（秒）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 乐观并发冲突
    pub conflict_secs: u64,
    /// 暂时性错误
    pub transient_secs: u64,
    /// 依赖尚未就绪
    pub dependency_secs: u64,
    /// 稳定状态下的周期性重新协调
    pub resync_secs: u64,
}

/// 网络探测配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// 最大尝试次数
    pub attempts: u32,
    /// 线性退避基数（秒），第 n 次失败后等待 n × 基数
    pub backoff_secs: u64,
}

impl FetchConfig {
    /// 退避基数
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

/// 工作负载镜像
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Trillian 数据库
    pub trillian_db: String,
    /// Trillian 日志服务
    pub trillian_server: String,
    /// Trillian 签名器
    pub trillian_signer: String,
    /// Fulcio 服务
    pub fulcio: String,
    /// Rekor 服务
    pub rekor_server: String,
    /// Redis
    pub redis: String,
    /// Redis 回填任务
    pub backfill_redis: String,
    /// CT 日志服务
    pub ctlog: String,
}

/// 外部工具路径
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// openssl 可执行文件
    pub openssl: PathBuf,
    /// Trillian `createtree` 可执行文件
    pub createtree: PathBuf,
}

impl OperatorConfig {
    /// 加载配置，`path` 为空时只使用默认值与环境变量
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&create_default_config()).context("构建默认配置失败")?);

        if let Some(path) = path {
            let file = path.to_str().ok_or_else(|| anyhow!("配置路径无效"))?;
            let format = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => return Err(anyhow!("不支持的配置文件格式，仅支持 YAML 或 JSON")),
            };
            builder = builder.add_source(File::with_name(file).format(format));
            info!("加载配置文件: {:?}", path);
        }

        builder
            .add_source(Environment::with_prefix("SIGIL").prefix_separator("__").separator("__"))
            .build()
            .context("构建配置失败")?
            .try_deserialize::<OperatorConfig>()
            .context("配置格式错误")
    }
}

/// 创建默认配置
pub fn create_default_config() -> OperatorConfig {
    OperatorConfig {
        log_level: "info".to_string(),
        namespace: None,
        metrics: MetricsConfig {
            listen_address: "0.0.0.0".to_string(),
            port: 8080,
        },
        retry: RetryConfig {
            conflict_secs: 1,
            transient_secs: 5,
            dependency_secs: 10,
            resync_secs: 300,
        },
        fetch: FetchConfig {
            attempts: 5,
            backoff_secs: 1,
        },
        images: ImageConfig {
            trillian_db: "docker.io/library/mariadb:10.11".to_string(),
            trillian_server: "gcr.io/trillian-opensource-ci/log_server:v1.6.0".to_string(),
            trillian_signer: "gcr.io/trillian-opensource-ci/log_signer:v1.6.0".to_string(),
            fulcio: "ghcr.io/sigstore/fulcio:v1.4.5".to_string(),
            rekor_server: "ghcr.io/sigstore/rekor/rekor-server:v1.3.6".to_string(),
            redis: "docker.io/library/redis:7.2".to_string(),
            backfill_redis: "ghcr.io/sigstore/rekor/backfill-redis:v1.3.6".to_string(),
            ctlog: "ghcr.io/google/certificate-transparency-go/ct_server:v1.3.1".to_string(),
        },
        tools: ToolConfig {
            openssl: PathBuf::from("openssl"),
            createtree: PathBuf::from("createtree"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults_without_file() {
        let config = OperatorConfig::load(None).unwrap();
        assert_eq!(config.retry.conflict_secs, 1);
        assert_eq!(config.retry.transient_secs, 5);
        assert_eq!(config.fetch.attempts, 5);
        assert_eq!(config.fetch.backoff(), Duration::from_secs(1));
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        fs::write(
            file.path(),
            "namespace: sigstore\nretry:\n  transient_secs: 30\nimages:\n  redis: redis:7\n",
        )
        .unwrap();

        let config = OperatorConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.namespace.as_deref(), Some("sigstore"));
        assert_eq!(config.retry.transient_secs, 30);
        assert_eq!(config.retry.conflict_secs, 1);
        assert_eq!(config.images.redis, "redis:7");
        assert_eq!(config.images.fulcio, create_default_config().images.fulcio);
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let err = OperatorConfig::load(Some(Path::new("operator.toml"))).unwrap_err();
        assert!(err.to_string().contains("不支持的配置文件格式"));
    }
}
