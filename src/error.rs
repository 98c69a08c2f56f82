use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// 侦察过程中可以越过编排层的错误
///
/// 单个探测的网络错误不会出现在这里，它们被吸收进数据模型
/// (未存活、空地址列表、空banner或域名报告中的 `error` 字段)。
#[derive(Debug, Error)]
pub enum ReconError {
    /// 字典文件不存在或不可读
    #[error("无法读取字典文件 {}: {source}", path.display())]
    Wordlist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 参数或配置值无效
    #[error("配置错误: {0}")]
    Config(String),

    /// HTTP客户端构建失败
    #[error("HTTP客户端初始化失败: {0}")]
    Client(#[from] reqwest::Error),

    /// 结果文件写入失败
    #[error("写入结果文件 {} 失败: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 结果序列化失败
    #[error("结果序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),

    /// 在尝试上限内找不到未被占用的输出文件名
    #[error("{base} 在 {attempts} 次尝试内没有可用的输出文件名")]
    OutputNamesExhausted { base: String, attempts: usize },
}

impl ReconError {
    /// 是否为预检阶段的配置错误（此时尚未产生任何网络流量）
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ReconError::Wordlist { .. } | ReconError::Config(_) | ReconError::Client(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ReconError>;
