//! 测试用的确定性 K 线生成器，仅在 `test-utils` feature 下编译。

use crate::market::entity::Bar;
use chrono::{DateTime, Duration, TimeZone, Utc};

/// 第 `i` 根测试 K 线的时间：2024-01-01 起每天一根。
pub fn ts(i: usize) -> DateTime<Utc> {
    let base = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default();
    base + Duration::days(i64::try_from(i).unwrap_or_default())
}

/// 以 `(low, high)` 构造 K 线，开盘取低点、收盘取高点。
pub fn bars_from_ranges(ranges: &[(f64, f64)]) -> Vec<Bar> {
    ranges
        .iter()
        .enumerate()
        .map(|(i, &(low, high))| Bar::new(ts(i), low, high, low, high, 1.0))
        .collect()
}

/// 以收盘价序列构造 K 线，开盘价为前一根收盘价。
pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    let mut prev = closes.first().copied().unwrap_or_default();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = prev;
            prev = close;
            Bar::new(ts(i), open, open.max(close), open.min(close), close, 1.0)
        })
        .collect()
}

/// # Summary
/// 在相邻拐点之间线性插值生成折线行情。
///
/// # Arguments
/// * `pivots`: 依次经过的拐点价格。
/// * `steps`: 每一段走势包含的 K 线数量。
///
/// # Returns
/// 每根 K 线覆盖上一插值点到当前插值点的区间，拐点处恰好形成分型。
pub fn zigzag(pivots: &[f64], steps: u32) -> Vec<Bar> {
    let mut points = Vec::new();
    if let Some(&first) = pivots.first() {
        points.push(first);
    }
    for pair in pivots.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        for k in 1..=steps {
            points.push(a + (b - a) * f64::from(k) / f64::from(steps));
        }
    }
    points
        .windows(2)
        .enumerate()
        .map(|(i, w)| {
            let (open, close) = (w[0], w[1]);
            Bar::new(ts(i), open, open.max(close), open.min(close), close, 1.0)
        })
        .collect()
}

/// # Summary
/// 由种子决定的随机游走行情，同一种子总是生成相同序列。
pub fn random_walk(seed: u64, len: usize) -> Vec<Bar> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut next = move || {
        // xorshift64*
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        let x = state.wrapping_mul(0x2545F4914F6CDD1D);
        f64::from(u32::try_from(x >> 40).unwrap_or_default()) / f64::from(1u32 << 24)
    };
    let mut close = 100.0;
    (0..len)
        .map(|i| {
            let open = close;
            close = open + (next() - 0.5) * 4.0;
            let high = open.max(close) + next();
            let low = open.min(close) - next();
            Bar::new(ts(i), open, high, low, close, 1.0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_bars_are_valid() {
        for bar in zigzag(&[10.0, 20.0, 12.0, 25.0], 5)
            .iter()
            .chain(random_walk(7, 200).iter())
            .chain(bars_from_closes(&[1.0, 2.0, 1.5]).iter())
        {
            assert!(bar.validate().is_ok());
        }
    }

    #[test]
    fn test_random_walk_is_deterministic() {
        assert_eq!(random_walk(42, 50), random_walk(42, 50));
        assert_ne!(random_walk(42, 50), random_walk(43, 50));
    }
}
