use chan_core::market::entity::Bar;
use chan_core::structure::entity::{MergeDirection, MergedCandle};
use tracing::debug;

/// # Summary
/// 单根 K 线并入后的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    // 追加了一根新的合并 K 线
    Appended(usize),
    // 修改了最后一根合并 K 线
    Revised(usize),
}

/// # Summary
/// 包含关系处理器，把原始 K 线折叠为互不包含的合并 K 线序列。
///
/// # Invariants
/// - 相邻合并 K 线互不包含，因此高点与低点同时严格递增或严格递减。
/// - 只有最后一根合并 K 线会被修改。
#[derive(Debug, Default, Clone)]
pub struct BarMerger {
    candles: Vec<MergedCandle>,
}

impl BarMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn candles(&self) -> &[MergedCandle] {
        &self.candles
    }

    /// # Summary
    /// 并入一根已校验的原始 K 线。
    ///
    /// # Logic
    /// 1. 首根 K 线直接成为方向未定的合并 K 线。
    /// 2. 与最后一根合并 K 线存在包含关系时，按已确立的方向取极值合并：
    ///    向上取高高 (高点取大、低点取大)，向下取低低；方向未定时按向上处理。
    /// 3. 否则根据高低点的相对位置确立方向并追加新的合并 K 线。
    ///
    /// # Arguments
    /// * `bar_idx`: 该 K 线在原始序列中的下标。
    /// * `bar`: 原始 K 线。
    pub fn feed(&mut self, bar_idx: usize, bar: &Bar) -> MergeOutcome {
        let Some(last) = self.candles.last_mut() else {
            self.candles.push(new_candle(0, bar_idx, bar, MergeDirection::Undetermined));
            return MergeOutcome::Appended(0);
        };

        if last.is_inclusive(bar.high, bar.low) {
            match last.direction {
                MergeDirection::Up | MergeDirection::Undetermined => {
                    if bar.high > last.high {
                        last.high = bar.high;
                        last.high_bar = bar_idx;
                    }
                    if bar.low > last.low {
                        last.low = bar.low;
                        last.low_bar = bar_idx;
                    }
                }
                MergeDirection::Down => {
                    if bar.high < last.high {
                        last.high = bar.high;
                        last.high_bar = bar_idx;
                    }
                    if bar.low < last.low {
                        last.low = bar.low;
                        last.low_bar = bar_idx;
                    }
                }
            }
            last.end_bar = bar_idx;
            last.end_time = bar.time;
            return MergeOutcome::Revised(last.idx);
        }

        let direction = if bar.high > last.high {
            MergeDirection::Up
        } else {
            MergeDirection::Down
        };
        let idx = self.candles.len();
        debug!(idx, ?direction, "Merged candle appended");
        self.candles.push(new_candle(idx, bar_idx, bar, direction));
        MergeOutcome::Appended(idx)
    }
}

fn new_candle(idx: usize, bar_idx: usize, bar: &Bar, direction: MergeDirection) -> MergedCandle {
    MergedCandle {
        idx,
        high: bar.high,
        low: bar.low,
        direction,
        begin_bar: bar_idx,
        end_bar: bar_idx,
        high_bar: bar_idx,
        low_bar: bar_idx,
        begin_time: bar.time,
        end_time: bar.time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chan_core::test_utils::bars_from_ranges;

    fn merge(ranges: &[(f64, f64)]) -> Vec<MergedCandle> {
        let mut merger = BarMerger::new();
        for (i, bar) in bars_from_ranges(ranges).iter().enumerate() {
            merger.feed(i, bar);
        }
        merger.candles().to_vec()
    }

    #[test]
    fn test_inclusion_merges_upward_with_high_high() {
        // 前两根确立向上，第三根被第二根包含
        let candles = merge(&[(10.0, 12.0), (11.0, 13.0), (11.5, 12.5)]);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].high, 13.0);
        assert_eq!(candles[1].low, 11.5);
        assert_eq!(candles[1].begin_bar, 1);
        assert_eq!(candles[1].end_bar, 2);
        assert_eq!(candles[1].low_bar, 2);
        assert_eq!(candles[1].high_bar, 1);
    }

    #[test]
    fn test_inclusion_merges_downward_with_low_low() {
        let candles = merge(&[(10.0, 12.0), (9.0, 11.0), (8.0, 11.5)]);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].direction, MergeDirection::Down);
        assert_eq!(candles[1].high, 11.0);
        assert_eq!(candles[1].low, 8.0);
    }

    #[test]
    fn test_three_bar_scenario_touching_low_stays_separate() {
        // [9, 11] 与 [11, 13] 只在 11 处接触，互不包含，三根 K 线各自成为合并 K 线
        let candles = merge(&[(10.0, 12.0), (11.0, 13.0), (9.0, 11.0)]);
        let bounds: Vec<(f64, f64)> = candles.iter().map(|c| (c.low, c.high)).collect();
        assert_eq!(bounds, vec![(10.0, 12.0), (11.0, 13.0), (9.0, 11.0)]);
        let spans: Vec<(usize, usize)> =
            candles.iter().map(|c| (c.begin_bar, c.end_bar)).collect();
        assert_eq!(spans, vec![(0, 0), (1, 1), (2, 2)]);
        assert_eq!(candles[0].direction, MergeDirection::Undetermined);
        assert_eq!(candles[1].direction, MergeDirection::Up);
        assert_eq!(candles[2].direction, MergeDirection::Down);
    }

    #[test]
    fn test_equal_ranges_merge() {
        let mut merger = BarMerger::new();
        let bars = bars_from_ranges(&[(10.0, 12.0), (10.0, 12.0)]);
        assert_eq!(merger.feed(0, &bars[0]), MergeOutcome::Appended(0));
        assert_eq!(merger.feed(1, &bars[1]), MergeOutcome::Revised(0));
    }
}
