use std::collections::VecDeque;
use std::future::{self, Future};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::{sleep, Instant};

/// OPSEC限速配置
#[derive(Debug, Clone)]
pub struct OpsecConfig {
    /// 每秒请求数上限
    pub max_rps: f64,
    /// 告警阈值 (max_rps的比例)，只用于观测
    pub warning_threshold: f64,
    /// 严重阈值 (max_rps的比例)，只用于观测
    pub critical_threshold: f64,
    /// 采样窗口
    pub sample_window: Duration,
    /// 是否启用自适应限速
    pub adaptive_limit: bool,
}

impl Default for OpsecConfig {
    fn default() -> Self {
        OpsecConfig {
            max_rps: 0.8,
            warning_threshold: 0.5,
            critical_threshold: 1.0,
            sample_window: Duration::from_secs(10),
            adaptive_limit: true,
        }
    }
}

/// 采样窗口上限，更长的窗口在构造时被截断
pub const MAX_SAMPLE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// 当前请求速率相对上限的等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RateLevel {
    Normal,
    Warning,
    Critical,
}

struct Samples {
    /// 已预约的放行时间点，按时间排序
    ///
    /// 这里存的是预约而不只是已发生的探测：被限速的调用方的放行时间晚于当前时刻，
    /// 所以队尾可能位于 `now` 之后。只有 `<= now` 的样本计入观测速率，
    /// 窗口外的样本 (`<= now - window`) 在每次访问时清除。
    times: VecDeque<Instant>,
    level: RateLevel,
}

/// 基于滑动窗口的自适应请求限速器
///
/// 每次 `acquire()` 记录一次外发探测的放行时间。窗口内的样本数已达上限时，
/// 调用方被挂起，直到最早的那个样本滑出窗口。放行时间在锁内一次性预约，
/// 所以大量并发调用方不会在同一时刻一起被放行。
pub struct RateGovernor {
    config: OpsecConfig,
    samples: Mutex<Samples>,
}

impl RateGovernor {
    pub fn new(mut config: OpsecConfig) -> Self {
        config.sample_window = config.sample_window.min(MAX_SAMPLE_WINDOW);
        RateGovernor {
            config,
            samples: Mutex::new(Samples {
                times: VecDeque::new(),
                level: RateLevel::Normal,
            }),
        }
    }

    pub fn config(&self) -> &OpsecConfig {
        &self.config
    }

    /// 记录一次外发探测，必要时等待以保持速率不超过上限
    pub async fn acquire(&self) {
        self.acquire_until(future::pending::<()>()).await;
    }

    /// 同 `acquire`，但 `cancel` 先完成时放弃等待并归还预约
    ///
    /// 返回 true 表示已放行，false 表示等待被取消。
    pub async fn acquire_until<C>(&self, cancel: C) -> bool
    where
        C: Future<Output = ()>,
    {
        let now = Instant::now();
        let release = self.reserve(now);
        if release <= now {
            return true;
        }

        let delay = release - now;
        debug!("限速: 探测延后 {:?}", delay);
        tokio::select! {
            _ = sleep(delay) => true,
            _ = cancel => {
                self.cancel_reservation(release);
                debug!("限速等待被取消");
                false
            }
        }
    }

    /// 当前窗口内的观测速率 (次/秒)
    pub fn current_rate(&self) -> f64 {
        let now = Instant::now();
        let mut samples = self.lock();
        self.purge(&mut samples, now);
        let count = samples.times.iter().filter(|t| **t <= now).count();
        count as f64 / self.window_secs()
    }

    pub fn level(&self) -> RateLevel {
        self.classify(self.current_rate())
    }

    /// 窗口内允许的最大样本数
    fn allowed(&self) -> usize {
        let allowed = (self.config.max_rps * self.window_secs()).floor();
        if allowed < 1.0 {
            1
        } else {
            allowed as usize
        }
    }

    fn window_secs(&self) -> f64 {
        self.config.sample_window.as_secs_f64().max(f64::EPSILON)
    }

    fn lock(&self) -> MutexGuard<'_, Samples> {
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn purge(&self, samples: &mut Samples, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.config.sample_window) else {
            return;
        };
        while samples.times.front().is_some_and(|t| *t <= cutoff) {
            samples.times.pop_front();
        }
    }

    fn classify(&self, rate: f64) -> RateLevel {
        let ratio = rate / self.config.max_rps;
        if ratio >= self.config.critical_threshold {
            RateLevel::Critical
        } else if ratio >= self.config.warning_threshold {
            RateLevel::Warning
        } else {
            RateLevel::Normal
        }
    }

    fn cancel_reservation(&self, release: Instant) {
        let mut samples = self.lock();
        if let Some(pos) = samples.times.iter().rposition(|t| *t == release) {
            samples.times.remove(pos);
        }
    }

    /// 记录样本并返回放行时间
    fn reserve(&self, now: Instant) -> Instant {
        let mut samples = self.lock();
        self.purge(&mut samples, now);

        let mut release = now;
        if self.config.adaptive_limit {
            if let Some(last) = samples.times.back() {
                release = release.max(*last);
            }
            let allowed = self.allowed();
            let len = samples.times.len();
            if len >= allowed {
                release = release.max(samples.times[len - allowed] + self.config.sample_window);
            }
        }
        samples.times.push_back(release);

        let observed = samples.times.iter().filter(|t| **t <= now).count();
        let level = self.classify(observed as f64 / self.window_secs());
        if level != samples.level {
            let rate = observed as f64 / self.window_secs();
            match level {
                RateLevel::Critical => error!("请求速率 {:.2}/s 达到严重阈值 (上限 {:.2}/s)", rate, self.config.max_rps),
                RateLevel::Warning => warn!("请求速率 {:.2}/s 超过告警阈值 (上限 {:.2}/s)", rate, self.config.max_rps),
                RateLevel::Normal => info!("请求速率恢复正常: {:.2}/s", rate),
            }
            samples.level = level;
        }

        release
    }
}
