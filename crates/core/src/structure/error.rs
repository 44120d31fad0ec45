use crate::common::TimeFrame;
use crate::market::error::DataError;
use thiserror::Error;

/// # Summary
/// 配置错误枚举，只在上下文创建时抛出，不会出现在喂数过程中。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    // 无法识别的配置项
    #[error("Unknown option: {0}")]
    UnknownOption(String),
    // 取值非法
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    // 互斥的选项组合
    #[error("Incompatible options: {0}")]
    Incompatible(String),
    // 反序列化失败
    #[error("Config parse error: {0}")]
    Parse(String),
}

/// # Summary
/// 结构分析域错误枚举。
///
/// # Invariants
/// - `InvariantViolation` 表示内部缺陷，调用方不应重试。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    // K 线被拒绝，上下文保持不变
    #[error("Data error: {0}")]
    Data(#[from] DataError),
    // 配置不合法
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    // 某一阶段检测到结构不变量被破坏
    #[error("Invariant violation in {stage}: {detail}")]
    InvariantViolation { stage: &'static str, detail: String },
    // 多级别上下文中不存在该级别
    #[error("Unknown timeframe: {0}")]
    UnknownTimeFrame(TimeFrame),
    // 引用了不存在的结构下标
    #[error("Index {index} out of range for {what}")]
    IndexOutOfRange { what: &'static str, index: usize },
}

impl AnalysisError {
    pub fn invariant(stage: &'static str, detail: impl Into<String>) -> Self {
        AnalysisError::InvariantViolation {
            stage,
            detail: detail.into(),
        }
    }
}
