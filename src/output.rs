use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::error::{ReconError, Result};
use crate::model::{DomainReport, HostRecord};

/// 探测可用文件名的次数上限
pub const MAX_NAME_ATTEMPTS: usize = 10_000;

/// 本次运行实际写入的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedPaths {
    pub json: PathBuf,
    pub csv: Option<PathBuf>,
}

/// 结果存储：每次运行写一次，从不覆盖已有文件
///
/// 依次尝试 `<base>.json`、`<base>_1.json`、`<base>_2.json` …，
/// 文件以 create-new 方式打开，写入失败时删除本次创建的文件。
#[derive(Debug, Clone)]
pub struct ResultStore {
    base: PathBuf,
    csv: bool,
    max_attempts: usize,
}

struct Claimed {
    path: PathBuf,
    file: File,
}

impl ResultStore {
    pub fn new(base: impl Into<PathBuf>, csv: bool) -> Self {
        ResultStore {
            base: base.into(),
            csv,
            max_attempts: MAX_NAME_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// 保存字典模式的主机记录
    pub fn save_hosts(&self, records: &[HostRecord]) -> Result<SavedPaths> {
        let json = serde_json::to_string_pretty(records)?;
        let csv = if self.csv { hosts_to_csv(records) } else { None };
        self.save(json, csv)
    }

    /// 保存证书日志模式的域名报告
    pub fn save_reports(&self, reports: &BTreeMap<String, DomainReport>) -> Result<SavedPaths> {
        let json = serde_json::to_string_pretty(reports)?;
        let csv = if self.csv { reports_to_csv(reports) } else { None };
        self.save(json, csv)
    }

    fn save(&self, json: String, csv: Option<String>) -> Result<SavedPaths> {
        let (json_file, csv_file) = self.claim(csv.is_some())?;

        let mut created = vec![json_file.path.clone()];
        if let Some(ref claimed) = csv_file {
            created.push(claimed.path.clone());
        }

        let result = write_claimed(json_file, json.as_bytes()).and_then(|json_path| {
            let csv_path = match (csv_file, csv) {
                (Some(claimed), Some(content)) => Some(write_claimed(claimed, content.as_bytes())?),
                _ => None,
            };
            Ok(SavedPaths {
                json: json_path,
                csv: csv_path,
            })
        });

        match result {
            Ok(saved) => {
                info!("结果已保存到: {}", saved.json.display());
                if let Some(ref csv_path) = saved.csv {
                    info!("CSV已保存到: {}", csv_path.display());
                }
                Ok(saved)
            }
            Err(e) => {
                for path in created {
                    let _ = fs::remove_file(path);
                }
                Err(e)
            }
        }
    }

    /// 找到第一个未被占用的编号并创建文件
    fn claim(&self, want_csv: bool) -> Result<(Claimed, Option<Claimed>)> {
        for n in 0..self.max_attempts {
            let json_path = numbered_path(&self.base, n, "json");
            let csv_path = numbered_path(&self.base, n, "csv");
            if want_csv && csv_path.exists() {
                continue;
            }

            let Some(json_file) = create_new(&json_path)? else {
                continue;
            };
            if !want_csv {
                return Ok((json_file, None));
            }

            match create_new(&csv_path) {
                Ok(Some(csv_file)) => return Ok((json_file, Some(csv_file))),
                Ok(None) => {
                    let _ = fs::remove_file(&json_path);
                }
                Err(e) => {
                    let _ = fs::remove_file(&json_path);
                    return Err(e);
                }
            }
        }

        Err(ReconError::OutputNamesExhausted {
            base: self.base.display().to_string(),
            attempts: self.max_attempts,
        })
    }
}

/// `<base>.<ext>` 或 `<base>_<n>.<ext>`
fn numbered_path(base: &Path, n: usize, ext: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    if n > 0 {
        name.push(format!("_{}", n));
    }
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// 以 create-new 方式打开，文件已存在时返回 None
fn create_new(path: &Path) -> Result<Option<Claimed>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(Claimed {
            path: path.to_path_buf(),
            file,
        })),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
        Err(source) => Err(ReconError::Persist {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_claimed(mut claimed: Claimed, content: &[u8]) -> Result<PathBuf> {
    claimed
        .file
        .write_all(content)
        .and_then(|_| claimed.file.sync_all())
        .map_err(|source| ReconError::Persist {
            path: claimed.path.clone(),
            source,
        })?;
    Ok(claimed.path)
}

/// 每个 (主机, 地址, 端口) 一行；没有地址的主机单独占一行
fn hosts_to_csv(records: &[HostRecord]) -> Option<String> {
    if records.is_empty() {
        return None;
    }
    let mut csv = String::from("host,ip,port,banner\n");
    for record in records {
        if record.banners.is_empty() {
            let ips = record
                .resolved_addresses
                .iter()
                .map(|ip| ip.to_string())
                .collect::<Vec<_>>();
            if ips.is_empty() {
                csv.push_str(&format!("{},,,\n", escape_csv(&record.host)));
            }
            for ip in ips {
                csv.push_str(&format!("{},{},,\n", escape_csv(&record.host), ip));
            }
            continue;
        }
        for banner in &record.banners {
            csv.push_str(&format!(
                "{},{},{},{}\n",
                escape_csv(&record.host),
                banner.address,
                banner.port,
                escape_csv(&banner.text)
            ));
        }
    }
    Some(csv)
}

fn reports_to_csv(reports: &BTreeMap<String, DomainReport>) -> Option<String> {
    let mut rows = String::new();
    for (domain, report) in reports {
        for subdomain in report.subdomains() {
            rows.push_str(&format!("{},{}\n", escape_csv(domain), escape_csv(subdomain)));
        }
    }
    if rows.is_empty() {
        None
    } else {
        Some(format!("domain,subdomain\n{}", rows))
    }
}

/// CSV转义
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
