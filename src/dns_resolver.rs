use std::net::IpAddr;
use std::time::Duration;

use log::debug;
use tokio::time::timeout;
use trust_dns_resolver::config::*;
use trust_dns_resolver::TokioAsyncResolver;

/// DNS解析器，每次运行构造一次并在所有主机间共享
#[derive(Clone)]
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
    timeout_duration: Duration,
}

impl DnsResolver {
    pub fn new(timeout_duration: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout_duration;
        opts.attempts = 2;
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), opts);
        DnsResolver {
            resolver,
            timeout_duration,
        }
    }

    /// 解析A记录，解析失败或超时返回空列表
    pub async fn resolve_a_records(&self, domain: &str) -> Vec<IpAddr> {
        // 给解析器自身的重试留出余量
        let deadline = self.timeout_duration * 3;
        match timeout(deadline, self.resolver.ipv4_lookup(domain)).await {
            Ok(Ok(response)) => {
                let mut addrs: Vec<IpAddr> = Vec::new();
                for ip in response.iter().map(|a| IpAddr::V4(a.0)) {
                    if !addrs.contains(&ip) {
                        addrs.push(ip);
                    }
                }
                addrs
            }
            Ok(Err(e)) => {
                debug!("{} 解析失败: {}", domain, e);
                Vec::new()
            }
            Err(_) => {
                debug!("{} 解析超时", domain);
                Vec::new()
            }
        }
    }
}
