use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::task::JoinSet;

use crate::banner::BannerProbe;
use crate::crtsh::{CrtShClient, CrtShConfig};
use crate::dictionary;
use crate::dns_resolver::DnsResolver;
use crate::enrich::HostEnricher;
use crate::error::{ReconError, Result};
use crate::governor::{OpsecConfig, RateGovernor, MAX_SAMPLE_WINDOW};
use crate::input::Method;
use crate::model::{Candidate, DomainReport, HostRecord, ValidationResult};
use crate::output::{ResultStore, SavedPaths};
use crate::state::{ProbeState, RunFlag, RunState, Stage};
use crate::verify::{build_probe_client, DomainVerifier};

/// 侦察配置
#[derive(Debug, Clone)]
pub struct ReconConfig {
    /// 目标根域名列表
    pub domains: Vec<String>,
    /// 侦察方式
    pub method: Method,
    /// 字典文件路径 (字典模式必填)
    pub wordlist: Option<PathBuf>,
    /// 输出文件基础名 (不含扩展名)
    pub output: String,
    /// 是否额外输出CSV
    pub csv: bool,
    /// banner抓取端口
    pub ports: Vec<u16>,
    /// 同时在途的探测数上限
    pub concurrency: usize,
    pub http_timeout: Duration,
    pub dns_timeout: Duration,
    pub banner_timeout: Duration,
    pub banner_max_bytes: usize,
    pub crtsh: CrtShConfig,
    pub opsec: OpsecConfig,
}

impl Default for ReconConfig {
    fn default() -> Self {
        ReconConfig {
            domains: Vec::new(),
            method: Method::Crtsh,
            wordlist: None,
            output: "results".to_string(),
            csv: false,
            ports: vec![80, 443, 22, 21],
            concurrency: 30,
            http_timeout: Duration::from_secs(5),
            dns_timeout: Duration::from_secs(5),
            banner_timeout: Duration::from_secs(4),
            banner_max_bytes: 128,
            crtsh: CrtShConfig::default(),
            opsec: OpsecConfig::default(),
        }
    }
}

impl ReconConfig {
    /// 预检：在任何网络活动之前发现配置错误
    pub fn validate(&self) -> Result<()> {
        if self.domains.is_empty() {
            return Err(ReconError::Config("至少需要一个目标域名".to_string()));
        }
        if let Some(bad) = self
            .domains
            .iter()
            .find(|d| d.is_empty() || d.contains(char::is_whitespace) || d.contains('/'))
        {
            return Err(ReconError::Config(format!("无效的域名: {:?}", bad)));
        }
        if self.concurrency == 0 {
            return Err(ReconError::Config("并发数必须大于0".to_string()));
        }
        if !(self.opsec.max_rps.is_finite() && self.opsec.max_rps > 0.0) {
            return Err(ReconError::Config(format!("无效的速率上限: {}", self.opsec.max_rps)));
        }
        if self.opsec.sample_window.is_zero() || self.opsec.sample_window > MAX_SAMPLE_WINDOW {
            return Err(ReconError::Config(format!(
                "采样窗口必须在 (0, {}] 秒之间",
                MAX_SAMPLE_WINDOW.as_secs()
            )));
        }
        if self.output.trim().is_empty() {
            return Err(ReconError::Config("输出文件名不能为空".to_string()));
        }

        if self.method == Method::Wordlist {
            let path = self
                .wordlist
                .as_ref()
                .ok_or_else(|| ReconError::Config("字典模式需要指定 --wordlist".to_string()))?;
            if !path.is_file() {
                return Err(ReconError::Wordlist {
                    path: path.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "文件不存在"),
                });
            }
        }
        Ok(())
    }
}

/// 字典模式的运行结果
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub candidates: usize,
    pub validated: usize,
    pub live: usize,
    /// 按完成顺序排列
    pub records: Vec<HostRecord>,
    pub interrupted: bool,
    pub saved: SavedPaths,
}

/// 证书日志模式的运行结果
#[derive(Debug, Clone)]
pub struct CrtShSummary {
    pub reports: BTreeMap<String, DomainReport>,
    pub interrupted: bool,
    pub saved: SavedPaths,
}

impl CrtShSummary {
    pub fn failed(&self) -> usize {
        self.reports.values().filter(|r| r.error().is_some()).count()
    }

    pub fn subdomain_count(&self) -> usize {
        self.reports.values().map(|r| r.subdomains().len()).sum()
    }
}

/// 侦察引擎
pub struct ReconEngine {
    config: ReconConfig,
    running: Arc<RunFlag>,
}

impl ReconEngine {
    /// 校验配置并创建引擎
    pub fn new(config: ReconConfig) -> Result<Self> {
        config.validate()?;
        Ok(ReconEngine {
            config,
            running: Arc::new(RunFlag::new()),
        })
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    /// 中断标志，`stop()` 后不再发起新的探测
    pub fn running(&self) -> Arc<RunFlag> {
        self.running.clone()
    }

    fn probe_state(&self) -> ProbeState {
        ProbeState::new(
            self.config.concurrency,
            RateGovernor::new(self.config.opsec.clone()),
            self.running.clone(),
        )
    }

    fn store(&self) -> ResultStore {
        ResultStore::new(&self.config.output, self.config.csv)
    }

    /// 字典模式：加载 → 验证 → 富化 → 保存
    pub async fn run_wordlist(&self) -> Result<RunSummary> {
        let wordlist = self
            .config
            .wordlist
            .as_ref()
            .ok_or_else(|| ReconError::Config("字典模式需要指定 --wordlist".to_string()))?;
        let candidates = dictionary::load_candidates(wordlist, &self.config.domains)?;

        let state = self.probe_state();
        let verifier = DomainVerifier::new(build_probe_client()?, state.clone(), self.config.http_timeout);
        let enricher = HostEnricher::new(
            DnsResolver::new(self.config.dns_timeout),
            BannerProbe {
                timeout: self.config.banner_timeout,
                max_bytes: self.config.banner_max_bytes,
            },
            self.config.ports.clone(),
            state,
        );

        run_pipeline(
            candidates,
            self.running.clone(),
            move |candidate| {
                let verifier = verifier.clone();
                async move { verifier.verify_domain(&candidate).await }
            },
            move |host| {
                let enricher = enricher.clone();
                async move { enricher.enrich(&host).await }
            },
            &self.store(),
        )
        .await
    }

    /// 证书日志模式：逐个域名查询，每完成一个就回调 `on_report`
    pub async fn run_crtsh<F>(&self, mut on_report: F) -> Result<CrtShSummary>
    where
        F: FnMut(&str, &DomainReport),
    {
        let client = CrtShClient::new(self.config.crtsh.clone())?;
        info!("开始查询证书透明日志: {:?}", self.config.domains);

        let mut rx = client.stream_reports(self.config.domains.clone(), self.running.clone());
        let mut reports = BTreeMap::new();
        while let Some((domain, report)) = rx.recv().await {
            on_report(&domain, &report);
            reports.insert(domain, report);
        }

        let interrupted = !self.running.is_running();
        let saved = self.store().save_reports(&reports)?;
        Ok(CrtShSummary {
            reports,
            interrupted,
            saved,
        })
    }
}

/// 字典模式的阶段编排
///
/// `validate` 和 `enrich` 是单个候选/主机的探测函数，由调用方注入。
/// 加载阶段之后的错误都只影响单个主机，只有保存失败会返回错误。
pub async fn run_pipeline<V, VFut, E, EFut>(
    candidates: Vec<Candidate>,
    running: Arc<RunFlag>,
    validate: V,
    enrich: E,
    store: &ResultStore,
) -> Result<RunSummary>
where
    V: FnMut(Candidate) -> VFut,
    VFut: Future<Output = Option<ValidationResult>> + Send + 'static,
    E: FnMut(Candidate) -> EFut,
    EFut: Future<Output = Option<HostRecord>> + Send + 'static,
{
    let mut run = RunState::new();
    let total = candidates.len();

    run.advance(Stage::Validating);
    info!("验证 {} 个候选子域名 (HTTP 200/301/302)...", total);
    let results = validate_candidates(candidates, &running, validate).await;
    let live: Vec<Candidate> = results
        .iter()
        .filter(|r| r.live)
        .map(|r| r.candidate.clone())
        .collect();
    info!("发现 {} 个存活子域名", live.len());

    run.advance(Stage::Enriching);
    let live_count = live.len();
    let records = enrich_hosts(live, &running, enrich).await;

    run.advance(Stage::Persisting);
    let interrupted = !running.is_running();
    if interrupted {
        warn!("运行被中断，仅保存已完成的 {} 条记录", records.len());
    }
    let saved = store.save_hosts(&records)?;

    run.advance(Stage::Done);
    Ok(RunSummary {
        candidates: total,
        validated: results.len(),
        live: live_count,
        records,
        interrupted,
        saved,
    })
}

/// 并发验证全部候选，按完成顺序收集结果
pub async fn validate_candidates<F, Fut>(
    candidates: Vec<Candidate>,
    running: &RunFlag,
    mut validate: F,
) -> Vec<ValidationResult>
where
    F: FnMut(Candidate) -> Fut,
    Fut: Future<Output = Option<ValidationResult>> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for candidate in candidates {
        if !running.is_running() {
            break;
        }
        tasks.spawn(validate(candidate));
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(result)) => results.push(result),
            Ok(None) => {}
            Err(e) => warn!("验证任务异常退出: {}", e),
        }
    }
    results
}

/// 并发富化存活主机，按完成顺序收集，不必等待最慢的主机才汇报进度
pub async fn enrich_hosts<F, Fut>(hosts: Vec<Candidate>, running: &RunFlag, mut enrich: F) -> Vec<HostRecord>
where
    F: FnMut(Candidate) -> Fut,
    Fut: Future<Output = Option<HostRecord>> + Send + 'static,
{
    let total = hosts.len();
    let mut tasks = JoinSet::new();
    for host in hosts {
        if !running.is_running() {
            break;
        }
        tasks.spawn(enrich(host));
    }

    let mut records = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(record)) => {
                info!(
                    "[{}/{}] {} -> {} 个地址",
                    records.len() + 1,
                    total,
                    record.host,
                    record.resolved_addresses.len()
                );
                records.push(record);
            }
            Ok(None) => {}
            Err(e) => warn!("富化任务异常退出: {}", e),
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn live_if(candidate: Candidate, live: bool) -> Option<ValidationResult> {
        Some(ValidationResult { candidate, live })
    }

    #[tokio::test]
    async fn test_every_candidate_validated_exactly_once() {
        let candidates: Vec<Candidate> = (0..200).map(|i| format!("h{}.example.com", i)).collect();
        let running = RunFlag::new();

        let results = validate_candidates(candidates.clone(), &running, |c| async move {
            tokio::task::yield_now().await;
            let live = c.starts_with("h1");
            live_if(c, live)
        })
        .await;

        assert_eq!(results.len(), candidates.len());
        let seen: HashSet<&str> = results.iter().map(|r| r.candidate.as_str()).collect();
        assert_eq!(seen.len(), candidates.len());
    }

    #[tokio::test]
    async fn test_only_live_hosts_are_enriched() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("run"), false);
        let enriched = Arc::new(std::sync::Mutex::new(Vec::new()));
        let enriched_log = enriched.clone();

        let summary = run_pipeline(
            vec!["a.example.com".into(), "b.example.com".into(), "c.example.com".into()],
            Arc::new(RunFlag::new()),
            |c| async move {
                let live = c != "b.example.com";
                live_if(c, live)
            },
            move |host| {
                enriched_log.lock().unwrap().push(host.clone());
                async move {
                    Some(HostRecord {
                        host,
                        resolved_addresses: Vec::new(),
                        banners: Vec::new(),
                    })
                }
            },
            &store,
        )
        .await
        .unwrap();

        assert_eq!(summary.candidates, 3);
        assert_eq!(summary.validated, 3);
        assert_eq!(summary.live, 2);
        assert_eq!(summary.records.len(), 2);
        assert!(!summary.interrupted);

        let mut enriched = enriched.lock().unwrap().clone();
        enriched.sort();
        assert_eq!(enriched, vec!["a.example.com", "c.example.com"]);
        assert_eq!(summary.saved.json, dir.path().join("run.json"));
    }

    #[tokio::test]
    async fn test_interrupted_run_keeps_completed_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("partial"), false);
        let running = Arc::new(RunFlag::new());
        let flag = running.clone();

        let summary = run_pipeline(
            vec!["a.example.com".into(), "b.example.com".into()],
            running,
            |c| async move { live_if(c, true) },
            move |host| {
                let flag = flag.clone();
                async move {
                    let record = HostRecord {
                        host,
                        resolved_addresses: Vec::new(),
                        banners: Vec::new(),
                    };
                    if record.host == "a.example.com" {
                        // 完成后收到中断
                        flag.stop();
                        return Some(record);
                    }
                    // 其余主机在发出探测前等待中断并检查标志
                    flag.stopped().await;
                    flag.is_running().then_some(record)
                }
            },
            &store,
        )
        .await
        .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.records.len(), 1);
        assert_eq!(summary.records[0].host, "a.example.com");
        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(summary.saved.json).unwrap()).unwrap();
        assert_eq!(saved.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stopped_run_issues_no_probes() {
        let running = RunFlag::new();
        running.stop();
        let calls = AtomicUsize::new(0);
        let results = validate_candidates(vec!["a.example.com".into()], &running, |c| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { live_if(c, true) }
        })
        .await;
        assert!(results.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_default_config() {
        let config = ReconConfig::default();
        assert_eq!(config.ports, vec![80, 443, 22, 21]);
        assert_eq!(config.concurrency, 30);
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.banner_timeout, Duration::from_secs(4));
        assert_eq!(config.banner_max_bytes, 128);
        assert_eq!(config.output, "results");
        assert_eq!(config.crtsh.max_retries, 3);
        assert_eq!(config.crtsh.timeout, Duration::from_secs(30));
        assert_eq!(config.opsec.max_rps, 0.8);
        assert!(config.opsec.adaptive_limit);
    }

    #[test]
    fn test_validation_rejects_bad_config() {
        let no_domains = ReconConfig::default();
        assert!(matches!(no_domains.validate(), Err(ReconError::Config(_))));

        let zero_pool = ReconConfig {
            domains: vec!["example.com".into()],
            concurrency: 0,
            ..Default::default()
        };
        assert!(zero_pool.validate().is_err());

        let bad_rate = ReconConfig {
            domains: vec!["example.com".into()],
            opsec: OpsecConfig {
                max_rps: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(bad_rate.validate().is_err());

        let huge_window = ReconConfig {
            domains: vec!["example.com".into()],
            opsec: OpsecConfig {
                sample_window: Duration::from_secs(u64::MAX),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(huge_window.validate(), Err(ReconError::Config(_))));

        let no_wordlist = ReconConfig {
            domains: vec!["example.com".into()],
            method: Method::Wordlist,
            ..Default::default()
        };
        assert!(matches!(no_wordlist.validate(), Err(ReconError::Config(_))));

        let missing_wordlist = ReconConfig {
            domains: vec!["example.com".into()],
            method: Method::Wordlist,
            wordlist: Some(PathBuf::from("/definitely/not/here.txt")),
            ..Default::default()
        };
        let err = missing_wordlist.validate().unwrap_err();
        assert!(matches!(err, ReconError::Wordlist { .. }));
        assert!(err.is_configuration());
    }
}
