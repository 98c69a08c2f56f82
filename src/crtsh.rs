use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::error::Result;
use crate::model::{Candidate, CertificateEntry, DomainReport};
use crate::state::RunFlag;

/// 证书透明日志查询配置
#[derive(Debug, Clone)]
pub struct CrtShConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// 最大尝试次数 (包括第一次)
    pub max_retries: usize,
    /// 退避基准延迟，每次重试翻倍
    pub base_delay: Duration,
}

impl Default for CrtShConfig {
    fn default() -> Self {
        CrtShConfig {
            base_url: "https://crt.sh/".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// crt.sh 查询客户端
#[derive(Clone)]
pub struct CrtShClient {
    client: Client,
    config: CrtShConfig,
}

impl CrtShClient {
    pub fn new(config: CrtShConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("rsubrecon/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// 复用外部传入的连接池
    pub fn with_client(client: Client, config: CrtShConfig) -> Self {
        CrtShClient { client, config }
    }

    /// 查询 `%.<domain>` 的全部证书记录，传输层失败时指数退避重试
    ///
    /// 运行被中断后不再重试，直接返回最后一次的错误。
    pub async fn query_domain(
        &self,
        domain: &str,
        running: &RunFlag,
    ) -> std::result::Result<Vec<CertificateEntry>, reqwest::Error> {
        let query = format!("%.{}", domain);
        let query = query.as_str();
        retry_with_backoff(
            self.config.max_retries,
            self.config.base_delay,
            running,
            is_transient,
            move |attempt| {
                debug!("查询证书日志 {} (第 {} 次)", query, attempt + 1);
                self.fetch(query)
            },
        )
        .await
    }

    async fn fetch(&self, query: &str) -> std::result::Result<Vec<CertificateEntry>, reqwest::Error> {
        self.client
            .get(&self.config.base_url)
            .query(&[("q", query), ("output", "json")])
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<CertificateEntry>>()
            .await
    }

    /// 查询单个根域名并生成报告，失败时记录到报告的 `error` 字段
    pub async fn report(&self, domain: &str, running: &RunFlag) -> DomainReport {
        match self.query_domain(domain, running).await {
            Ok(entries) => {
                let subdomains = extract_subdomains(&entries, domain);
                let report = DomainReport::found(subdomains, entries);
                info!(
                    "{}: 发现 {} 个子域名, {} 张证书",
                    domain,
                    report.subdomains().len(),
                    report.certificate_count()
                );
                report
            }
            Err(e) => {
                warn!("{}: 证书日志查询失败: {}", domain, e);
                DomainReport::failed(e.to_string())
            }
        }
    }

    /// 依次查询一批根域名，每完成一个就通过 `tx` 发送
    ///
    /// 单个域名失败不会中断整批；`running` 停止后不再发起新的查询。
    pub async fn query_batch(
        &self,
        domains: Vec<String>,
        running: Arc<RunFlag>,
        tx: mpsc::Sender<(String, DomainReport)>,
    ) {
        for domain in domains {
            if !running.is_running() {
                info!("已中断，跳过剩余域名");
                break;
            }
            let report = self.report(&domain, &running).await;
            if tx.send((domain, report)).await.is_err() {
                break;
            }
        }
    }

    /// 在后台任务中执行 `query_batch`，返回报告流
    pub fn stream_reports(
        &self,
        domains: Vec<String>,
        running: Arc<RunFlag>,
    ) -> mpsc::Receiver<(String, DomainReport)> {
        let (tx, rx) = mpsc::channel(16);
        let source = self.clone();
        tokio::spawn(async move {
            source.query_batch(domains, running, tx).await;
        });
        rx
    }
}

/// 连接、超时等传输层错误才值得重试
fn is_transient(err: &reqwest::Error) -> bool {
    !(err.is_status() || err.is_decode() || err.is_builder())
}

/// 指数退避重试：第 n 次失败后等待 `base_delay * 2^(n-1)`
///
/// 每次重试前和每次退避结束后检查 `running`，已中断时返回最后一次的错误；
/// 退避等待期间被中断会立即醒来。
pub async fn retry_with_backoff<T, E, F, Fut>(
    max_attempts: usize,
    base_delay: Duration,
    running: &RunFlag,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> std::result::Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < max_attempts && is_retryable(&e) => {
                if !running.is_running() {
                    info!("已中断，放弃重试: {}", e);
                    return Err(e);
                }
                let delay = base_delay * 2u32.pow(attempt as u32);
                warn!("请求失败 ({}/{}): {}，{:?} 后重试", attempt + 1, max_attempts, e, delay);
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = running.stopped() => {}
                }
                if !running.is_running() {
                    info!("已中断，放弃重试: {}", e);
                    return Err(e);
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// 从证书记录中提取根域名下的唯一子域名
pub fn extract_subdomains(entries: &[CertificateEntry], root_domain: &str) -> BTreeSet<Candidate> {
    let root = root_domain.trim().to_lowercase();
    let suffix = format!(".{}", root);
    let mut subdomains = BTreeSet::new();

    for name_value in entries.iter().filter_map(|e| e.name_value.as_deref()) {
        for name in name_value.split('\n') {
            let name = name.trim().to_lowercase();
            let name = name.strip_prefix("*.").unwrap_or(&name);
            if name.ends_with(&suffix) {
                subdomains.insert(name.to_string());
            }
        }
    }

    subdomains
}
