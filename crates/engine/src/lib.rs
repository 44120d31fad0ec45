//! 结构分析引擎：K 线合并、笔、线段、中枢、买卖点五个阶段，以及驱动它们的分析上下文。

pub mod bsp;
pub mod context;
pub mod macd;
pub mod merger;
pub mod multilevel;
pub mod segment;
pub mod stroke;
pub mod zone;

pub use context::AnalysisContext;
pub use multilevel::{LevelView, MultiLevelContext};
