//! 外部协作方
//!
//! 密钥生成、日志树创建与 HTTP 获取都不是协调逻辑本身，协调器只关心它们的成败。
//! 默认实现分别调用 `openssl`、Trillian 的 `createtree` 与 reqwest；测试使用 mock。

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{OperatorError, Result};

/// 签名密钥对（PEM）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// 私钥
    pub private_pem: Vec<u8>,
    /// 公钥
    pub public_pem: Vec<u8>,
}

/// 自签 CA（PEM）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateAuthority {
    /// 私钥
    pub private_pem: Vec<u8>,
    /// 公钥
    pub public_pem: Vec<u8>,
    /// 证书
    pub certificate_pem: Vec<u8>,
}

/// CA 证书主题
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    /// 通用名
    pub common_name: String,
    /// 组织名
    pub organization: String,
    /// 邮箱
    pub email: Option<String>,
}

impl Subject {
    /// openssl `-subj` 形式
    pub fn to_openssl(&self) -> String {
        let mut subject = format!("/CN={}/O={}", self.common_name, self.organization);
        if let Some(email) = &self.email {
            subject.push_str(&format!("/emailAddress={email}"));
        }
        subject
    }
}

/// 密钥材料生成
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyMaterial: Send + Sync {
    /// 生成签名密钥对
    async fn signer_key(&self) -> Result<KeyPair>;

    /// 生成自签 CA
    async fn certificate_authority(&self, subject: &Subject) -> Result<CertificateAuthority>;
}

/// 日志树创建
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TreeProvisioner: Send + Sync {
    /// 在 Trillian 中创建日志树，返回树 ID
    async fn create_tree(&self, admin_server: &str, display_name: &str) -> Result<i64>;
}

/// HTTP 响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// 状态码
    pub status: u16,
    /// 响应体
    pub body: Vec<u8>,
}

/// HTTP 获取
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// 发起 GET 请求，传输错误以字符串返回
    async fn get(&self, url: &str) -> std::result::Result<FetchResponse, String>;
}

/// 调用 openssl 生成密钥材料
pub struct OpensslKeyMaterial {
    binary: PathBuf,
}

impl OpensslKeyMaterial {
    /// 创建新的 openssl 密钥生成器
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    async fn run(&self, args: &[&str], input: Option<&[u8]>) -> Result<Vec<u8>> {
        debug!("执行 openssl {}", args.join(" "));
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OperatorError::Collaborator(format!("启动 openssl 失败: {e}")))?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin
                .write_all(input)
                .await
                .map_err(|e| OperatorError::Collaborator(format!("写入 openssl 输入失败: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| OperatorError::Collaborator(format!("等待 openssl 失败: {e}")))?;
        if !output.status.success() {
            return Err(OperatorError::Collaborator(format!(
                "openssl {} 失败: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn private_key(&self) -> Result<Vec<u8>> {
        self.run(&["ecparam", "-genkey", "-name", "prime256v1", "-noout"], None)
            .await
    }

    async fn public_key(&self, private_pem: &[u8]) -> Result<Vec<u8>> {
        self.run(&["ec", "-pubout"], Some(private_pem)).await
    }
}

#[async_trait]
impl KeyMaterial for OpensslKeyMaterial {
    async fn signer_key(&self) -> Result<KeyPair> {
        let private_pem = self.private_key().await?;
        let public_pem = self.public_key(&private_pem).await?;
        Ok(KeyPair {
            private_pem,
            public_pem,
        })
    }

    async fn certificate_authority(&self, subject: &Subject) -> Result<CertificateAuthority> {
        let private_pem = self.private_key().await?;
        let public_pem = self.public_key(&private_pem).await?;
        let subject = subject.to_openssl();
        let certificate_pem = self
            .run(
                &[
                    "req",
                    "-x509",
                    "-new",
                    "-key",
                    "/dev/stdin",
                    "-days",
                    "3650",
                    "-subj",
                    &subject,
                    "-addext",
                    "basicConstraints=critical,CA:TRUE",
                    "-addext",
                    "keyUsage=critical,keyCertSign,cRLSign",
                ],
                Some(&private_pem),
            )
            .await?;
        Ok(CertificateAuthority {
            private_pem,
            public_pem,
            certificate_pem,
        })
    }
}

/// 调用 Trillian `createtree` 创建日志树
pub struct CommandTreeProvisioner {
    binary: PathBuf,
}

impl CommandTreeProvisioner {
    /// 创建新的日志树创建器
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

#[async_trait]
impl TreeProvisioner for CommandTreeProvisioner {
    async fn create_tree(&self, admin_server: &str, display_name: &str) -> Result<i64> {
        let output = Command::new(&self.binary)
            .arg(format!("--admin_server={admin_server}"))
            .arg(format!("--display_name={display_name}"))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OperatorError::Collaborator(format!("启动 createtree 失败: {e}")))?;
        if !output.status.success() {
            return Err(OperatorError::Collaborator(format!(
                "createtree 失败: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_tree_id(&output.stdout)
    }
}

/// 解析 `createtree` 输出的树 ID
pub fn parse_tree_id(stdout: &[u8]) -> Result<i64> {
    let text = String::from_utf8_lossy(stdout);
    let line = text.lines().rev().find(|line| !line.trim().is_empty()).unwrap_or_default();
    line.trim()
        .parse::<i64>()
        .map_err(|_| OperatorError::Collaborator(format!("无法解析日志树 ID: {:?}", line.trim())))
}

/// 基于 reqwest 的 HTTP 获取
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    /// 创建新的 HTTP 客户端
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OperatorError::Collaborator(format!("创建 HTTP 客户端失败: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetch {
    async fn get(&self, url: &str) -> std::result::Result<FetchResponse, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(FetchResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tree_id_takes_last_line() {
        assert_eq!(parse_tree_id(b"I0101 created\n4752826563465424738\n").unwrap(), 4752826563465424738);
        assert!(parse_tree_id(b"not-a-number\n").is_err());
        assert!(parse_tree_id(b"").is_err());
    }

    #[test]
    fn test_subject_formatting() {
        let subject = Subject {
            common_name: "fulcio.local".into(),
            organization: "Sigil".into(),
            email: Some("admin@sigil.dev".into()),
        };
        assert_eq!(subject.to_openssl(), "/CN=fulcio.local/O=Sigil/emailAddress=admin@sigil.dev");
    }

    #[tokio::test]
    async fn test_missing_binary_is_collaborator_error() {
        let keys = OpensslKeyMaterial::new(PathBuf::from("/nonexistent/openssl"));
        let err = keys.signer_key().await.unwrap_err();
        assert!(matches!(err, OperatorError::Collaborator(_)));
    }
}
