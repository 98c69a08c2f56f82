use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::LevelFilter;

use crate::api::ReconConfig;
use crate::crtsh::CrtShConfig;
use crate::governor::OpsecConfig;

/// 侦察方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Method {
    /// 查询证书透明日志 (crt.sh)
    Crtsh,
    /// 字典拼接后验证
    Wordlist,
}

#[derive(Parser, Debug)]
#[command(name = "rsubrecon")]
#[command(author = "gelenlen")]
#[command(version)]
#[command(about = "Subdomain reconnaissance via certificate transparency logs or wordlists", long_about = None, arg_required_else_help = true)]
pub struct Opts {
    /// root domains to investigate
    #[arg(required = true)]
    pub domains: Vec<String>,

    /// reconnaissance method
    #[arg(short, long, value_enum)]
    pub method: Method,

    /// wordlist path, required by the wordlist method
    #[arg(short, long)]
    pub wordlist: Option<PathBuf>,

    /// output base name, without extension
    #[arg(short, long, default_value = "results")]
    pub output: String,

    /// also write a flattened CSV view
    #[arg(long)]
    pub csv: bool,

    /// ports probed for banners
    #[arg(short, long, value_delimiter = ',', default_value = "80,443,22,21")]
    pub ports: Vec<u16>,

    /// maximum simultaneous probes
    #[arg(short, long, default_value_t = 30)]
    pub concurrency: usize,

    /// probes per second ceiling
    #[arg(long, default_value_t = 0.8)]
    pub max_rate: f64,

    /// rate sampling window in seconds
    #[arg(long, default_value_t = 10)]
    pub window: u64,

    /// disable adaptive rate limiting
    #[arg(long)]
    pub no_adaptive: bool,

    /// certificate transparency log endpoint
    #[arg(long, default_value = "https://crt.sh/")]
    pub crtsh_url: String,

    /// verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub silent: bool,
}

impl Opts {
    pub fn log_level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::Debug
        } else if self.silent {
            LevelFilter::Warn
        } else {
            LevelFilter::Info
        }
    }

    /// 转换为引擎配置，具体取值的校验由 `ReconConfig::validate` 完成
    pub fn into_config(self) -> ReconConfig {
        let defaults = ReconConfig::default();
        ReconConfig {
            domains: self.domains.iter().map(|d| normalize_domain(d)).collect(),
            method: self.method,
            wordlist: self.wordlist,
            output: self.output,
            csv: self.csv,
            ports: self.ports,
            concurrency: self.concurrency,
            crtsh: CrtShConfig {
                base_url: self.crtsh_url,
                ..CrtShConfig::default()
            },
            opsec: OpsecConfig {
                max_rps: self.max_rate,
                sample_window: Duration::from_secs(self.window),
                adaptive_limit: !self.no_adaptive,
                ..OpsecConfig::default()
            },
            ..defaults
        }
    }
}

/// 去掉首尾空白和末尾的点，统一小写
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_lowercase()
}
