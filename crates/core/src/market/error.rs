use chrono::{DateTime, Utc};
use thiserror::Error;

/// # Summary
/// 行情输入错误枚举，处理畸形或乱序的 K 线。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
/// - 返回该错误时，被拒绝的 K 线不会对任何结构产生影响。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    // 最低价高于最高价
    #[error("Inverted range at {time}: low {low} > high {high}")]
    InvertedRange {
        time: DateTime<Utc>,
        low: f64,
        high: f64,
    },
    // 时间戳未严格递增
    #[error("Non-monotonic timestamp: {time} is not after {previous}")]
    NonMonotonicTime {
        previous: DateTime<Utc>,
        time: DateTime<Utc>,
    },
    // 出现 NaN 或无穷大
    #[error("Non-finite {field} at {time}: {value}")]
    NonFinite {
        time: DateTime<Utc>,
        field: &'static str,
        value: f64,
    },
    // 开盘或收盘价落在高低点之外
    #[error("Open/close outside [low, high] at {time}")]
    OpenCloseOutOfRange { time: DateTime<Utc> },
}
