use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// 建立连接后发送的探测载荷
const PROBE_PAYLOAD: &[u8] = b"\r\n";

/// TCP banner 抓取参数
#[derive(Debug, Clone, Copy)]
pub struct BannerProbe {
    /// 连接和读取各自的超时
    pub timeout: Duration,
    pub max_bytes: usize,
}

impl Default for BannerProbe {
    fn default() -> Self {
        BannerProbe {
            timeout: Duration::from_secs(4),
            max_bytes: 128,
        }
    }
}

impl BannerProbe {
    /// 抓取 `addr:port` 的banner，任何失败都返回空字符串
    pub async fn grab(&self, addr: IpAddr, port: u16) -> String {
        match self.try_grab(SocketAddr::new(addr, port)).await {
            Ok(banner) => banner,
            Err(e) => {
                debug!("{}:{} banner抓取失败: {}", addr, port, e);
                String::new()
            }
        }
    }

    async fn try_grab(&self, target: SocketAddr) -> std::io::Result<String> {
        let mut stream = timeout(self.timeout, TcpStream::connect(target)).await??;
        stream.write_all(PROBE_PAYLOAD).await?;
        stream.flush().await?;

        let mut buf = vec![0u8; self.max_bytes];
        let n = timeout(self.timeout, stream.read(&mut buf)).await??;
        let _ = stream.shutdown().await;

        Ok(String::from_utf8_lossy(&buf[..n]).trim().to_string())
    }
}
