use std::collections::BTreeSet;
use std::net::IpAddr;

use serde::ser::{SerializeSeq, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};

/// 候选子域名 (FQDN)
pub type Candidate = String;

/// 单个候选域名的HTTP存活判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub candidate: Candidate,
    pub live: bool,
}

/// 一次TCP banner抓取，`text` 为空表示没有抓到
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub address: IpAddr,
    pub port: u16,
    pub text: String,
}

/// 存活主机的富化结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostRecord {
    pub host: Candidate,
    #[serde(rename = "ips", serialize_with = "serialize_addresses")]
    pub resolved_addresses: Vec<IpAddr>,
    #[serde(serialize_with = "serialize_banner_texts")]
    pub banners: Vec<Banner>,
}

fn serialize_addresses<S: Serializer>(addrs: &[IpAddr], serializer: S) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(addrs.len()))?;
    for addr in addrs {
        seq.serialize_element(&addr.to_string())?;
    }
    seq.end()
}

fn serialize_banner_texts<S: Serializer>(banners: &[Banner], serializer: S) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(banners.len()))?;
    for banner in banners {
        seq.serialize_element(&banner.text)?;
    }
    seq.end()
}

/// 证书透明日志返回的单条记录，保留全部原始字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_value: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// 单个根域名的证书日志查询结果
///
/// 查询失败时只保留错误信息，子域名集合必然为空。
#[derive(Debug, Clone, PartialEq)]
pub struct DomainReport {
    subdomains: BTreeSet<Candidate>,
    certificates: Vec<CertificateEntry>,
    error: Option<String>,
}

impl DomainReport {
    /// 成功的查询结果，`certificates` 只保留带证书ID的条目
    pub fn found(subdomains: BTreeSet<Candidate>, entries: Vec<CertificateEntry>) -> Self {
        let certificates = entries.into_iter().filter(|e| e.id.is_some()).collect();
        DomainReport {
            subdomains,
            certificates,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        DomainReport {
            subdomains: BTreeSet::new(),
            certificates: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn subdomains(&self) -> &BTreeSet<Candidate> {
        &self.subdomains
    }

    pub fn certificates(&self) -> &[CertificateEntry] {
        &self.certificates
    }

    pub fn certificate_count(&self) -> usize {
        self.certificates.len()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl Serialize for DomainReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.error {
            Some(error) => {
                let mut state = serializer.serialize_struct("DomainReport", 2)?;
                state.serialize_field("error", error)?;
                state.serialize_field("subdomains", &self.subdomains)?;
                state.end()
            }
            None => {
                let mut state = serializer.serialize_struct("DomainReport", 4)?;
                state.serialize_field("subdomains", &self.subdomains)?;
                state.serialize_field("count", &self.subdomains.len())?;
                state.serialize_field("certificates", &self.certificates)?;
                state.serialize_field("cert_count", &self.certificates.len())?;
                state.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_host_record_schema() {
        let record = HostRecord {
            host: "www.example.com".to_string(),
            resolved_addresses: vec!["93.184.216.34".parse().unwrap()],
            banners: vec![
                Banner {
                    address: "93.184.216.34".parse().unwrap(),
                    port: 22,
                    text: "SSH-2.0-OpenSSH_9.6".to_string(),
                },
                Banner {
                    address: "93.184.216.34".parse().unwrap(),
                    port: 21,
                    text: String::new(),
                },
            ],
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "host": "www.example.com",
                "ips": ["93.184.216.34"],
                "banners": ["SSH-2.0-OpenSSH_9.6", ""],
            })
        );
    }

    #[test]
    fn test_failed_report_has_no_subdomains() {
        let report = DomainReport::failed("connection refused");
        assert!(report.subdomains().is_empty());
        assert_eq!(report.error(), Some("connection refused"));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value, json!({"error": "connection refused", "subdomains": []}));
    }

    #[test]
    fn test_found_report_counts_only_identified_certificates() {
        let entries: Vec<CertificateEntry> = serde_json::from_value(json!([
            {"id": 7, "name_value": "a.example.com", "issuer_name": "C=US, O=Let's Encrypt"},
            {"name_value": "b.example.com"},
        ]))
        .unwrap();
        let subs: BTreeSet<String> = ["a.example.com", "b.example.com"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let report = DomainReport::found(subs, entries);
        assert_eq!(report.certificate_count(), 1);
        assert!(report.error().is_none());

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["count"], 2);
        assert_eq!(value["cert_count"], 1);
        assert_eq!(value["certificates"][0]["issuer_name"], "C=US, O=Let's Encrypt");
        assert!(value.get("error").is_none());
    }
}
