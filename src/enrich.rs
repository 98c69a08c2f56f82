use std::net::IpAddr;

use itertools::Itertools;
use log::debug;

use crate::banner::BannerProbe;
use crate::dns_resolver::DnsResolver;
use crate::model::{Banner, Candidate, HostRecord};
use crate::state::ProbeState;

/// 存活主机富化器：A记录解析 + 各端口banner抓取
#[derive(Clone)]
pub struct HostEnricher {
    resolver: DnsResolver,
    probe: BannerProbe,
    ports: Vec<u16>,
    state: ProbeState,
}

impl HostEnricher {
    pub fn new(resolver: DnsResolver, probe: BannerProbe, ports: Vec<u16>, state: ProbeState) -> Self {
        HostEnricher {
            resolver,
            probe,
            ports,
            state,
        }
    }

    /// 富化单个存活主机
    ///
    /// 解析失败得到空地址列表，banner抓取失败得到空字符串，记录总会生成；
    /// 只有在运行被中断、部分探测未能发出时才返回 None。
    pub async fn enrich(&self, host: &str) -> Option<HostRecord> {
        if !self.state.is_running() {
            return None;
        }
        let addrs = self.resolver.resolve_a_records(host).await;
        debug!("{} 解析到 {} 个地址", host, addrs.len());
        self.capture(host, addrs).await
    }

    /// 对每个 (地址, 端口) 并发抓取banner，按地址、端口顺序汇总
    pub async fn capture(&self, host: &str, addrs: Vec<IpAddr>) -> Option<HostRecord> {
        let pairs: Vec<(IpAddr, u16)> = addrs
            .iter()
            .copied()
            .cartesian_product(self.ports.iter().copied())
            .collect();

        let mut tasks = Vec::with_capacity(pairs.len());
        for &(addr, port) in &pairs {
            let state = self.state.clone();
            let probe = self.probe;
            tasks.push(tokio::spawn(async move {
                let _permit = state.slot().await?;
                if !state.pace().await {
                    return None;
                }
                Some(probe.grab(addr, port).await)
            }));
        }

        let mut banners = Vec::with_capacity(pairs.len());
        for ((address, port), task) in pairs.into_iter().zip(tasks) {
            let text = match task.await {
                Ok(Some(text)) => text,
                Ok(None) => return None,
                Err(e) => {
                    debug!("{}:{} banner任务异常: {}", address, port, e);
                    String::new()
                }
            };
            banners.push(Banner { address, port, text });
        }

        Some(HostRecord {
            host: Candidate::from(host),
            resolved_addresses: addrs,
            banners,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::{OpsecConfig, RateGovernor};
    use crate::state::RunFlag;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn enricher(ports: Vec<u16>, running: bool) -> HostEnricher {
        let governor = RateGovernor::new(OpsecConfig {
            adaptive_limit: false,
            ..Default::default()
        });
        let flag = Arc::new(RunFlag::new());
        if !running {
            flag.stop();
        }
        let state = ProbeState::new(8, governor, flag);
        HostEnricher::new(
            DnsResolver::new(Duration::from_secs(2)),
            BannerProbe {
                timeout: Duration::from_secs(2),
                max_bytes: 128,
            },
            ports,
            state,
        )
    }

    async fn spawn_banner_server(banner: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let _ = socket.write_all(banner).await;
                    let mut buf = [0u8; 64];
                    while let Ok(n) = socket.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                    }
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_resolution_failure_degrades_to_empty_record() {
        let record = enricher(vec![80, 443, 22, 21], true)
            .enrich("no-such-host.invalid")
            .await
            .unwrap();
        assert_eq!(record.host, "no-such-host.invalid");
        assert!(record.resolved_addresses.is_empty());
        assert!(record.banners.is_empty());
    }

    #[tokio::test]
    async fn test_banners_follow_address_port_order() {
        let ftp = spawn_banner_server(b"220 ProFTPD Server ready.\r\n").await;
        let closed = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let ssh = spawn_banner_server(b"SSH-2.0-dropbear\r\n").await;

        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        let record = enricher(vec![ftp, closed, ssh], true)
            .capture("www.example.com", vec![addr])
            .await
            .unwrap();

        assert_eq!(record.resolved_addresses, vec![addr]);
        let texts: Vec<&str> = record.banners.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, vec!["220 ProFTPD Server ready.", "", "SSH-2.0-dropbear"]);
        let ports: Vec<u16> = record.banners.iter().map(|b| b.port).collect();
        assert_eq!(ports, vec![ftp, closed, ssh]);
    }

    #[tokio::test]
    async fn test_interrupted_enrichment_is_discarded() {
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        let enricher = enricher(vec![80], false);
        assert!(enricher.capture("www.example.com", vec![addr]).await.is_none());
        assert!(enricher.enrich("www.example.com").await.is_none());
    }
}
