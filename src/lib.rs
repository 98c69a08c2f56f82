//! # rsubrecon
//!
//! 一个基于Rust实现的异步子域名侦察工具库。
//!
//! ## 特性
//!
//! - 🔍 **被动发现**: 查询证书透明日志 (crt.sh)，失败时指数退避重试
//! - 📖 **字典发现**: 由字典拼接候选子域名，通过HTTP/HTTPS验证存活
//! - 🧬 **信息富化**: 解析A记录并抓取常见端口的TCP banner
//! - 🐢 **OPSEC限速**: 滑动窗口自适应限速，配合有界并发池控制外发探测
//! - 💾 **安全落盘**: 结果写入JSON (可选CSV)，从不覆盖已有文件
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use rsubrecon::{ReconConfig, ReconEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ReconConfig {
//!         domains: vec!["example.com".to_string()],
//!         ..Default::default()
//!     };
//!
//!     let engine = ReconEngine::new(config)?;
//!     let summary = engine
//!         .run_crtsh(|domain, report| {
//!             println!("{}: {} 个子域名", domain, report.subdomains().len());
//!         })
//!         .await?;
//!
//!     println!("结果已保存到 {}", summary.saved.json.display());
//!     Ok(())
//! }
//! ```
//!
//! ## 字典模式
//!
//! ```rust,no_run
//! use rsubrecon::{Method, ReconConfig, ReconEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ReconConfig {
//!         domains: vec!["example.com".to_string()],
//!         method: Method::Wordlist,
//!         wordlist: Some("subdomains.txt".into()),
//!         csv: true,
//!         ..Default::default()
//!     };
//!
//!     let engine = ReconEngine::new(config)?;
//!     let summary = engine.run_wordlist().await?;
//!     for record in &summary.records {
//!         println!("{} {:?}", record.host, record.resolved_addresses);
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod api;
pub mod banner;
pub mod crtsh;
pub mod dictionary;
pub mod dns_resolver;
pub mod enrich;
pub mod error;
pub mod governor;
pub mod input;
pub mod logger;
pub mod model;
pub mod output;
pub mod state;
pub mod verify;

// 重新导出主要的公共API
pub use api::{
    enrich_hosts,
    run_pipeline,
    validate_candidates,
    CrtShSummary,
    ReconConfig,
    ReconEngine,
    RunSummary,
};

// 导出其他有用的类型
pub use banner::BannerProbe;
pub use crtsh::{extract_subdomains, retry_with_backoff, CrtShClient, CrtShConfig};
pub use dns_resolver::DnsResolver;
pub use enrich::HostEnricher;
pub use error::{ReconError, Result};
pub use governor::{OpsecConfig, RateGovernor, RateLevel, MAX_SAMPLE_WINDOW};
pub use input::{Method, Opts};
pub use model::{Banner, Candidate, CertificateEntry, DomainReport, HostRecord, ValidationResult};
pub use output::{ResultStore, SavedPaths};
pub use state::{ProbeState, RunFlag, RunState, Stage};
pub use verify::{build_probe_client, DomainVerifier};
