use std::time::Duration;

use log::debug;
use reqwest::redirect::Policy;
use reqwest::Client;
use tokio::time::timeout;

use crate::error::Result;
use crate::model::{Candidate, ValidationResult};
use crate::state::ProbeState;

/// 依次尝试的协议
const SCHEMES: [&str; 2] = ["https", "http"];

/// 构建所有HTTP探测共用的连接池客户端
pub fn build_probe_client() -> Result<Client> {
    let client = Client::builder()
        .danger_accept_invalid_certs(true) // 接受无效证书
        .redirect(Policy::limited(10))
        .build()?;
    Ok(client)
}

/// 200/301/302 视为存活
pub fn is_live_status(status: u16) -> bool {
    matches!(status, 200 | 301 | 302)
}

/// 域名存活验证器
#[derive(Clone)]
pub struct DomainVerifier {
    client: Client,
    state: ProbeState,
    timeout_duration: Duration,
}

impl DomainVerifier {
    pub fn new(client: Client, state: ProbeState, timeout_duration: Duration) -> Self {
        DomainVerifier {
            client,
            state,
            timeout_duration,
        }
    }

    /// 验证单个候选域名
    ///
    /// 先HTTPS后HTTP，任意一次返回存活状态码即判定存活，不再尝试其余协议。
    /// 网络错误和超时都只算作这一次未存活。运行被中断而未能完成判定时返回 None。
    pub async fn verify_domain(&self, candidate: &str) -> Option<ValidationResult> {
        let _permit = self.state.slot().await?;

        for scheme in SCHEMES {
            if !self.state.pace().await {
                return None;
            }
            let url = format!("{}://{}", scheme, candidate);
            if let Some(status) = self.test_http(&url).await {
                if is_live_status(status) {
                    return Some(ValidationResult {
                        candidate: Candidate::from(candidate),
                        live: true,
                    });
                }
            }
        }

        Some(ValidationResult {
            candidate: Candidate::from(candidate),
            live: false,
        })
    }

    /// 发起一次GET请求，返回最终状态码
    async fn test_http(&self, url: &str) -> Option<u16> {
        let request = self.client.get(url).timeout(self.timeout_duration).send();
        match timeout(self.timeout_duration, request).await {
            Ok(Ok(response)) => {
                let status = response.status().as_u16();
                debug!("{} -> {}", url, status);
                Some(status)
            }
            Ok(Err(e)) => {
                debug!("{} 请求失败: {}", url, e);
                None
            }
            Err(_) => {
                debug!("{} 请求超时", url);
                None
            }
        }
    }
}
