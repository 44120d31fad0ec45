use crate::market::error::DataError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// # Summary
/// 单根原始 K 线，分析管线的唯一输入。
///
/// # Invariants
/// - `high` 必须大于或等于 `low`, `open`, `close`。
/// - 同一级别内时间戳严格递增，一经追加不可修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    // K 线开始时间
    pub time: DateTime<Utc>,
    // 开盘价
    pub open: f64,
    // 最高价
    pub high: f64,
    // 最低价
    pub low: f64,
    // 收盘价
    pub close: f64,
    // 成交量
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    pub fn new(
        time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// # Summary
    /// 校验单根 K 线自身的价格结构。
    ///
    /// # Logic
    /// 1. 所有价格与成交量必须是有限数。
    /// 2. `low <= high`。
    /// 3. 开盘价与收盘价必须落在 `[low, high]` 内。
    ///
    /// # Returns
    /// 合法返回 `Ok(())`，否则返回对应的 `DataError`。
    pub fn validate(&self) -> Result<(), DataError> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        if let Some(&(field, value)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(DataError::NonFinite {
                time: self.time,
                field,
                value,
            });
        }
        if self.low > self.high {
            return Err(DataError::InvertedRange {
                time: self.time,
                low: self.low,
                high: self.high,
            });
        }
        let inside = |p: f64| p >= self.low && p <= self.high;
        if !inside(self.open) || !inside(self.close) {
            return Err(DataError::OpenCloseOutOfRange { time: self.time });
        }
        Ok(())
    }

    /// # Summary
    /// 校验该 K 线能否追加在 `previous` 之后。
    ///
    /// # Arguments
    /// * `previous`: 上一根已接受 K 线的时间，首根时为 `None`。
    pub fn validate_after(&self, previous: Option<DateTime<Utc>>) -> Result<(), DataError> {
        self.validate()?;
        match previous {
            Some(prev) if self.time <= prev => Err(DataError::NonMonotonicTime {
                previous: prev,
                time: self.time,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(sec: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(sec, 0).unwrap()
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let bar = Bar::new(at(0), 10.0, 9.0, 11.0, 10.0, 1.0);
        assert!(matches!(
            bar.validate(),
            Err(DataError::InvertedRange { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_close_outside_range() {
        let bar = Bar::new(at(0), 10.0, 11.0, 9.0, 12.0, 1.0);
        assert!(matches!(
            bar.validate(),
            Err(DataError::OpenCloseOutOfRange { .. })
        ));
    }

    #[test]
    fn test_validate_after_requires_increasing_time() {
        let bar = Bar::new(at(60), 10.0, 11.0, 9.0, 10.0, 1.0);
        assert!(bar.validate_after(Some(at(0))).is_ok());
        assert!(matches!(
            bar.validate_after(Some(at(60))),
            Err(DataError::NonMonotonicTime { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_nan() {
        let bar = Bar::new(at(0), 10.0, f64::NAN, 9.0, 10.0, 1.0);
        assert!(matches!(bar.validate(), Err(DataError::NonFinite { .. })));
    }
}
