use chan_core::config::{MacdAlgo, MacdConfig};
use chan_core::structure::entity::{Direction, MacdPoint};

fn alpha(period: u32) -> f64 {
    2.0 / (f64::from(period) + 1.0)
}

/// # Summary
/// 增量 MACD 计算器，作为背驰判断的动量代理。
///
/// # Invariants
/// - `points` 与已接收的原始 K 线一一对应。
/// - 柱值 = 2 × (DIF − DEA)。
#[derive(Debug, Clone)]
pub struct MacdCalculator {
    fast_alpha: f64,
    slow_alpha: f64,
    signal_alpha: f64,
    // (快线 EMA, 慢线 EMA, DEA)
    state: Option<(f64, f64, f64)>,
    points: Vec<MacdPoint>,
}

impl MacdCalculator {
    pub fn new(config: &MacdConfig) -> Self {
        Self {
            fast_alpha: alpha(config.fast),
            slow_alpha: alpha(config.slow),
            signal_alpha: alpha(config.signal),
            state: None,
            points: Vec::new(),
        }
    }

    /// # Summary
    /// 以收盘价推进一步。
    ///
    /// # Logic
    /// 1. 首根 K 线以收盘价初始化两条 EMA，DIF 与 DEA 均为 0。
    /// 2. 之后按 `ema += alpha × (x − ema)` 递推。
    pub fn update(&mut self, close: f64) -> MacdPoint {
        let (fast, slow, dea) = match self.state {
            None => (close, close, 0.0),
            Some((fast, slow, dea)) => {
                let fast = fast + self.fast_alpha * (close - fast);
                let slow = slow + self.slow_alpha * (close - slow);
                let dif = fast - slow;
                (fast, slow, dea + self.signal_alpha * (dif - dea))
            }
        };
        self.state = Some((fast, slow, dea));
        let dif = fast - slow;
        let point = MacdPoint {
            dif,
            dea,
            macd: 2.0 * (dif - dea),
        };
        self.points.push(point);
        point
    }

    pub fn points(&self) -> &[MacdPoint] {
        &self.points
    }

    /// # Summary
    /// 计算一段波动的力度。
    ///
    /// # Logic
    /// 取 `[begin_bar, end_bar]` 区间内的柱值：
    /// - `Area`: 与波动同向的柱值绝对值之和；
    /// - `FullArea`: 全部柱值绝对值之和；
    /// - `Peak`: 同向柱值绝对值的最大值；
    /// - `Diff`: 柱值最大值与最小值之差。
    ///
    /// # Returns
    /// 非负的力度值，区间越界部分被忽略。
    pub fn strength(
        &self,
        algo: MacdAlgo,
        begin_bar: usize,
        end_bar: usize,
        direction: Direction,
    ) -> f64 {
        let end = end_bar.saturating_add(1).min(self.points.len());
        let Some(window) = self.points.get(begin_bar.min(end)..end) else {
            return 0.0;
        };
        let along = |m: f64| match direction {
            Direction::Up => m.max(0.0),
            Direction::Down => (-m).max(0.0),
        };
        let hist = window.iter().map(|p| p.macd);
        match algo {
            MacdAlgo::Area => hist.map(along).sum(),
            MacdAlgo::FullArea => hist.map(f64::abs).sum(),
            MacdAlgo::Peak => hist.map(along).fold(0.0, f64::max),
            MacdAlgo::Diff => {
                let (lo, hi) = hist.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), m| {
                    (lo.min(m), hi.max(m))
                });
                if hi >= lo { hi - lo } else { 0.0 }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_price_has_zero_momentum() {
        let mut macd = MacdCalculator::new(&MacdConfig::default());
        for _ in 0..50 {
            let p = macd.update(10.0);
            assert_eq!(p.macd, 0.0);
        }
    }

    #[test]
    fn test_rising_price_has_positive_histogram() {
        let mut macd = MacdCalculator::new(&MacdConfig::default());
        let mut last = None;
        for i in 0..30u32 {
            last = Some(macd.update(10.0 + f64::from(i)));
        }
        let last = last.unwrap();
        assert!(last.dif > 0.0);
        assert!(last.macd > 0.0);
        assert!((last.macd - 2.0 * (last.dif - last.dea)).abs() < 1e-12);
    }

    #[test]
    fn test_strength_algorithms() {
        let mut macd = MacdCalculator::new(&MacdConfig::default());
        for close in [10.0, 11.0, 12.0, 11.0, 9.0, 8.0] {
            macd.update(close);
        }
        let hist: Vec<f64> = macd.points().iter().map(|p| p.macd).collect();
        let up_area: f64 = hist.iter().filter(|m| **m > 0.0).sum();
        let full: f64 = hist.iter().map(|m| m.abs()).sum();

        assert!((macd.strength(MacdAlgo::Area, 0, 5, Direction::Up) - up_area).abs() < 1e-12);
        assert!((macd.strength(MacdAlgo::FullArea, 0, 5, Direction::Up) - full).abs() < 1e-12);
        assert!(macd.strength(MacdAlgo::Peak, 0, 5, Direction::Down) > 0.0);
        assert!(macd.strength(MacdAlgo::Diff, 0, 5, Direction::Up) > 0.0);
        // 越界区间被截断
        assert_eq!(macd.strength(MacdAlgo::Area, 10, 20, Direction::Up), 0.0);
    }
}
