//! 线程安全的运行状态管理模块
//!
//! `ProbeState` 汇集了所有并发任务共享的资源：有界并发池、OPSEC限速器
//! 和中断标志。每次运行构造一次，以克隆的方式注入到验证器和富化器中。
//! `RunState` 记录编排器所处的阶段。

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::governor::RateGovernor;

/// 中断标志
///
/// `stop()` 之后不再发起新的探测，同时唤醒所有在限速、退避或并发池上等待的任务，
/// 让它们立即放弃，而不是睡到预约时间才发现已被中断。
#[derive(Debug, Default)]
pub struct RunFlag {
    stopped: AtomicBool,
    notify: Notify,
}

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// 在 `stop()` 被调用后完成
    pub async fn stopped(&self) {
        loop {
            // 先登记再检查，避免错过检查与等待之间的 stop()
            let notified = self.notify.notified();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

/// 所有探测共享的资源
#[derive(Clone)]
pub struct ProbeState {
    /// 有界并发池，限制同时在途的外发探测数
    pub limiter: Arc<Semaphore>,
    /// 自适应限速器
    pub governor: Arc<RateGovernor>,
    pub running: Arc<RunFlag>,
}

impl ProbeState {
    pub fn new(concurrency: usize, governor: RateGovernor, running: Arc<RunFlag>) -> Self {
        ProbeState {
            limiter: Arc::new(Semaphore::new(concurrency.max(1))),
            governor: Arc::new(governor),
            running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    /// 停止发起新的探测，在途探测自然结束
    pub fn stop(&self) {
        self.running.stop();
    }

    /// 从并发池中取得一个槽位；已中断或等待期间被中断时返回 None
    pub async fn slot(&self) -> Option<OwnedSemaphorePermit> {
        if !self.is_running() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.running.stopped() => None,
            permit = self.limiter.clone().acquire_owned() => {
                let permit = permit.ok()?;
                self.is_running().then_some(permit)
            }
        }
    }

    /// 每次外发探测前调用：经过限速器，返回是否仍可发出
    ///
    /// 限速等待期间被中断时立即返回 false，预约的放行时间归还给限速器。
    pub async fn pace(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.governor.acquire_until(self.running.stopped()).await && self.is_running()
    }
}

/// 单轮字典侦察的阶段，只能单向推进
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    LoadingNames,
    Validating,
    Enriching,
    Persisting,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::LoadingNames => "加载候选域名",
            Stage::Validating => "HTTP存活验证",
            Stage::Enriching => "DNS与Banner富化",
            Stage::Persisting => "保存结果",
            Stage::Done => "完成",
        };
        f.write_str(name)
    }
}

/// 编排器的阶段状态机
#[derive(Debug)]
pub struct RunState {
    stage: Stage,
}

impl RunState {
    pub fn new() -> Self {
        RunState {
            stage: Stage::LoadingNames,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// 推进到下一阶段，拒绝回退或重复进入
    pub fn advance(&mut self, next: Stage) -> bool {
        if next <= self.stage {
            debug!("忽略非法阶段转换: {} -> {}", self.stage, next);
            return false;
        }
        info!("阶段: {} -> {}", self.stage, next);
        self.stage = next;
        true
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
