use chan_core::common::{Instrument, TimeFrame};
use chan_core::config::ChanConfig;
use chan_core::market::entity::Bar;
use chan_core::structure::entity::{Signal, StructureRecord};
use chan_core::structure::error::AnalysisError;
use chan_engine::AnalysisContext;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// # Summary
/// Manager 层的统一错误类型。
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("Scan cancelled")]
    Cancelled,
}

/// # Summary
/// 分析上下文的身份：一个标的的一个级别。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextKey {
    pub instrument: Instrument,
    pub timeframe: TimeFrame,
}

impl ContextKey {
    pub fn new(instrument: Instrument, timeframe: TimeFrame) -> Self {
        Self {
            instrument,
            timeframe,
        }
    }
}

impl std::fmt::Display for ContextKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.instrument, self.timeframe)
    }
}

/// # Summary
/// 上下文注册表，宿主侧持有所有 `(标的, 级别)` 的分析上下文。
///
/// # Invariants
/// - 每个键对应唯一的上下文，首次喂数时按共享配置惰性创建。
/// - 同一上下文的写入经由 `DashMap` 的分片锁串行化，满足单写者约束；不同上下文互不影响。
pub struct ContextRegistry {
    // 创建时已校验的共享配置
    config: ChanConfig,
    contexts: DashMap<ContextKey, AnalysisContext>,
}

impl ContextRegistry {
    /// # Summary
    /// 创建注册表。
    ///
    /// # Returns
    /// 配置非法时立即返回错误，而不是推迟到首次喂数。
    pub fn new(config: ChanConfig) -> Result<Self, ManagerError> {
        config.validate().map_err(AnalysisError::from)?;
        Ok(Self {
            config,
            contexts: DashMap::new(),
        })
    }

    pub fn config(&self) -> &ChanConfig {
        &self.config
    }

    /// # Summary
    /// 向指定上下文喂入一根 K 线，不存在时先创建。
    ///
    /// # Returns
    /// 笔及以上结构是否发生变化；K 线被拒绝时上下文保持不变。
    pub fn feed(&self, key: &ContextKey, bar: Bar) -> Result<bool, ManagerError> {
        let mut ctx = self.contexts.entry(key.clone()).or_try_insert_with(|| {
            info!("Creating analysis context for {}", key);
            AnalysisContext::with_timeframe(self.config.clone(), key.timeframe)
        })?;
        let changed = ctx.feed(bar)?;
        if changed {
            debug!(key = %key, strokes = ctx.strokes().len(), "Structure updated");
        }
        Ok(changed)
    }

    /// 当前结构快照。
    pub fn snapshot(&self, key: &ContextKey) -> Option<StructureRecord> {
        self.contexts.get(key).map(|ctx| ctx.record())
    }

    pub fn signals(&self, key: &ContextKey) -> Vec<Signal> {
        self.contexts
            .get(key)
            .map(|ctx| ctx.signals().to_vec())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<ContextKey> {
        self.contexts.iter().map(|e| e.key().clone()).collect()
    }

    /// 移除上下文，返回是否存在。
    pub fn remove(&self, key: &ContextKey) -> bool {
        let removed = self.contexts.remove(key).is_some();
        if removed {
            info!("Removed analysis context for {}", key);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
