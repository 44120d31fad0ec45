use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// # Summary
/// 分析标的实体，代表一个被独立分析的证券或资产。
///
/// # Invariants
/// - `symbol` 必须是合法的交易代码。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Instrument {
    // 证券代码 (例如: sz.000001, AAPL)
    pub symbol: String,
    // 交易所代码 (可选，例如: SZ, NASDAQ)
    pub exchange: Option<String>,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: None,
        }
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.exchange {
            Some(ex) => write!(f, "{}.{}", ex, self.symbol),
            None => write!(f, "{}", self.symbol),
        }
    }
}

/// # Summary
/// K 线级别枚举，定义单根 K 线的时间跨度。
///
/// # Invariants
/// - 枚举顺序即由细到粗的级别顺序，`Ord` 依赖该顺序。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeFrame {
    // 1分钟
    Minute1,
    // 5分钟
    Minute5,
    // 15分钟
    Minute15,
    // 30分钟
    Minute30,
    // 60分钟
    Minute60,
    // 日线
    Day1,
    // 周线
    Week1,
    // 月线
    Month1,
}

impl TimeFrame {
    /// # Summary
    /// 单根 K 线覆盖的名义时长。
    ///
    /// # Logic
    /// 月线按 30 天近似，仅用于窗口估算，不参与结构计算。
    pub fn duration(&self) -> Duration {
        match self {
            TimeFrame::Minute1 => Duration::minutes(1),
            TimeFrame::Minute5 => Duration::minutes(5),
            TimeFrame::Minute15 => Duration::minutes(15),
            TimeFrame::Minute30 => Duration::minutes(30),
            TimeFrame::Minute60 => Duration::hours(1),
            TimeFrame::Day1 => Duration::days(1),
            TimeFrame::Week1 => Duration::weeks(1),
            TimeFrame::Month1 => Duration::days(30),
        }
    }
}

impl FromStr for TimeFrame {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1m" | "minute1" | "1分钟" => Ok(TimeFrame::Minute1),
            "5m" | "minute5" | "5分钟" => Ok(TimeFrame::Minute5),
            "15m" | "minute15" | "15分钟" => Ok(TimeFrame::Minute15),
            "30m" | "minute30" | "30分钟" => Ok(TimeFrame::Minute30),
            "60m" | "1h" | "minute60" | "hour1" | "60分钟" => Ok(TimeFrame::Minute60),
            "1d" | "day" | "day1" | "日线" => Ok(TimeFrame::Day1),
            "1w" | "week" | "week1" | "周线" => Ok(TimeFrame::Week1),
            "1mon" | "month" | "month1" | "月线" => Ok(TimeFrame::Month1),
            _ => Err(format!("Unknown TimeFrame: {}", s)),
        }
    }
}

impl std::fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeFrame::Minute1 => write!(f, "1m"),
            TimeFrame::Minute5 => write!(f, "5m"),
            TimeFrame::Minute15 => write!(f, "15m"),
            TimeFrame::Minute30 => write!(f, "30m"),
            TimeFrame::Minute60 => write!(f, "60m"),
            TimeFrame::Day1 => write!(f, "1d"),
            TimeFrame::Week1 => write!(f, "1w"),
            TimeFrame::Month1 => write!(f, "1mon"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_round_trip_names() {
        for tf in [
            TimeFrame::Minute1,
            TimeFrame::Minute15,
            TimeFrame::Minute60,
            TimeFrame::Day1,
            TimeFrame::Month1,
        ] {
            let parsed: TimeFrame = tf.to_string().parse().unwrap();
            assert_eq!(parsed, tf);
        }
        assert_eq!("日线".parse::<TimeFrame>().unwrap(), TimeFrame::Day1);
        assert!("2h".parse::<TimeFrame>().is_err());
    }

    #[test]
    fn test_timeframe_order_is_fine_to_coarse() {
        assert!(TimeFrame::Minute5 < TimeFrame::Minute60);
        assert!(TimeFrame::Day1 < TimeFrame::Week1);
        assert!(TimeFrame::Minute30.duration() < TimeFrame::Day1.duration());
    }
}
