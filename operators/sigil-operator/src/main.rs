//! Sigil Operator 入口
//!
//! `run` 启动控制器与指标服务器，`crd` 输出全部自定义资源定义。

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sigil_operator::config::OperatorConfig;
use sigil_operator::crd::all_crds;
use sigil_operator::metrics::{self, Metrics};
use sigil_operator::SigilOperator;

/// Sigil Operator 命令行
#[derive(Debug, Parser)]
#[command(name = "sigil-operator", version, about = "管理签名与透明日志组件的 Kubernetes Operator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 启动 Operator
    Run {
        /// 配置文件路径（YAML 或 JSON）
        #[arg(short, long, env = "SIGIL_CONFIG")]
        config: Option<PathBuf>,
    },
    /// 以 YAML 输出全部 CRD
    Crd,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => run(config).await,
        Commands::Crd => print_crds(),
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

fn print_crds() -> Result<()> {
    let documents = all_crds()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("序列化 CRD 失败")?;
    print!("{}", documents.join("---\n"));
    Ok(())
}

async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = OperatorConfig::load(config_path.as_deref())?;
    init_tracing(&config.log_level);

    let addr: SocketAddr = format!("{}:{}", config.metrics.listen_address, config.metrics.port)
        .parse()
        .context("指标监听地址无效")?;
    let shutdown = CancellationToken::new();
    let metrics = Arc::new(Metrics::new().context("注册指标失败")?);

    let operator = SigilOperator::new(config, metrics.clone(), shutdown.clone()).await?;
    let server = tokio::spawn(metrics::serve(metrics, addr, shutdown.clone()));
    operator.start().await?;

    tokio::signal::ctrl_c().await.context("监听退出信号失败")?;
    info!("收到退出信号，正在停止");

    operator.stop().await?;
    match server.await {
        Ok(Err(e)) => error!("指标服务器退出: {}", e),
        Err(e) => error!("指标服务器任务异常: {}", e),
        Ok(Ok(())) => {}
    }
    info!("Sigil Operator 已退出");
    Ok(())
}
