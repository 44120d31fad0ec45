use crate::registry::{ContextKey, ManagerError};
use chan_core::config::ChanConfig;
use chan_core::market::entity::Bar;
use chan_core::structure::entity::Signal;
use chan_core::structure::error::AnalysisError;
use chan_engine::AnalysisContext;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// # Summary
/// 协作式取消标记，只在两次喂数之间被检查。
///
/// # Invariants
/// - 取消作用于进行中的扫描；若在扫描开始前发出，则作用于下一次扫描。
/// - 每次扫描结束后标记复位，扫描器可继续复用。
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// 复位标记，返回复位前是否处于取消状态。
    fn reset(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }
}

/// # Summary
/// 一次扫描任务：一个标的一个级别的完整 K 线序列。
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub key: ContextKey,
    pub bars: Vec<Bar>,
}

/// # Summary
/// 扫描命中的近期买点。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanHit {
    pub key: ContextKey,
    pub signal: Signal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanFailure {
    pub key: ContextKey,
    pub error: String,
}

/// # Summary
/// 一次批量扫描的汇总结果，顺序与任务顺序一致。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    pub hits: Vec<ScanHit>,
    pub failures: Vec<ScanFailure>,
    // 完整回放成功的任务数
    pub success: usize,
    // 因取消而中止的任务数
    pub cancelled: usize,
}

/// # Summary
/// 批量扫描器：在独立线程池上为每个任务回放一个全新的分析上下文，筛选近期买点。
///
/// # Invariants
/// - 每个任务独占一个上下文，任务之间没有共享可变状态。
/// - 取消只在两次 `feed` 之间生效，不会观察到半更新的结构。
pub struct Scanner {
    config: ChanConfig,
    pool: rayon::ThreadPool,
    // 最近多少根 K 线内的买点算作命中
    recent_window: usize,
    cancel: CancelToken,
}

impl Scanner {
    /// # Summary
    /// 创建扫描器及其工作线程池。
    ///
    /// # Arguments
    /// * `threads`: 工作线程数，0 表示使用 rayon 默认值 (CPU 核数)。
    /// * `recent_window`: 命中窗口，以 K 线根数计。
    pub fn new(
        config: ChanConfig,
        threads: usize,
        recent_window: usize,
    ) -> Result<Self, ManagerError> {
        config.validate().map_err(AnalysisError::from)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("chan-scan-{}", i))
            .build()?;
        Ok(Self {
            config,
            pool,
            recent_window,
            cancel: CancelToken::new(),
        })
    }

    /// 取消标记的句柄，可在其他线程调用 `cancel()`。
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// # Summary
    /// 并行执行全部任务。
    ///
    /// # Logic
    /// 1. 在线程池内对任务做 `par_iter`，每个任务独立回放。
    /// 2. 按任务顺序汇总：成功的任务贡献命中，出错的记录失败，被取消的只计数。
    /// 3. 结束时复位取消标记。
    pub fn scan(&self, jobs: &[ScanJob]) -> ScanReport {
        info!(
            "Scanning {} series on {} threads",
            jobs.len(),
            self.pool.current_num_threads()
        );
        let outcomes: Vec<Result<Vec<ScanHit>, ManagerError>> =
            self.pool.install(|| jobs.par_iter().map(|job| self.run(job)).collect());
        if self.cancel.reset() {
            warn!("Scan cancelled, token reset for the next scan");
        }

        let mut report = ScanReport::default();
        for (job, outcome) in jobs.iter().zip(outcomes) {
            match outcome {
                Ok(hits) => {
                    report.success += 1;
                    report.hits.extend(hits);
                }
                Err(ManagerError::Cancelled) => report.cancelled += 1,
                Err(e) => {
                    warn!("Scan of {} failed: {}", job.key, e);
                    report.failures.push(ScanFailure {
                        key: job.key.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            success = report.success,
            failures = report.failures.len(),
            cancelled = report.cancelled,
            hits = report.hits.len(),
            "Scan finished"
        );
        report
    }

    fn run(&self, job: &ScanJob) -> Result<Vec<ScanHit>, ManagerError> {
        let mut ctx = AnalysisContext::with_timeframe(self.config.clone(), job.key.timeframe)?;
        for bar in &job.bars {
            if self.cancel.is_cancelled() {
                return Err(ManagerError::Cancelled);
            }
            ctx.feed(bar.clone())?;
        }
        let cutoff = ctx.bars().len().saturating_sub(self.recent_window);
        Ok(ctx
            .signals()
            .iter()
            .filter(|s| s.is_buy && s.bar >= cutoff)
            .map(|s| ScanHit {
                key: job.key.clone(),
                signal: s.clone(),
            })
            .collect())
    }
}
