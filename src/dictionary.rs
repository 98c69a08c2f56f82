use std::fs::File;
use std::io::{self, BufRead};
use std::path::Path;

use itertools::Itertools;
use log::debug;

use crate::error::{ReconError, Result};
use crate::model::Candidate;

/// 从字典文件加载子域名前缀，跳过空行和 `#` 注释行
pub fn load_wordlist(path: &Path) -> Result<Vec<String>> {
    let wordlist_error = |source: io::Error| ReconError::Wordlist {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(wordlist_error)?;
    let reader = io::BufReader::new(file);
    let mut labels = Vec::new();

    for line in reader.lines() {
        let line = line.map_err(wordlist_error)?;
        if let Some(label) = parse_label(&line) {
            labels.push(label.to_string());
        }
    }

    debug!("字典 {} 读取到 {} 个前缀", path.display(), labels.len());
    Ok(labels)
}

fn parse_label(line: &str) -> Option<&str> {
    let label = line.trim();
    if label.is_empty() || label.starts_with('#') {
        None
    } else {
        Some(label)
    }
}

/// 按根域名依次拼接 `<label>.<root>`，保持字典顺序
pub fn build_candidates(labels: &[String], roots: &[String]) -> Vec<Candidate> {
    roots
        .iter()
        .cartesian_product(labels.iter())
        .map(|(root, label)| format!("{}.{}", label, root))
        .collect()
}

/// 读取字典并生成候选域名
pub fn load_candidates(path: &Path, roots: &[String]) -> Result<Vec<Candidate>> {
    let labels = load_wordlist(path)?;
    Ok(build_candidates(&labels, roots))
}
