use crate::merger::MergeOutcome;
use chan_core::market::entity::Bar;
use chan_core::structure::entity::{Direction, Fractal, FractalKind, MergedCandle, Stroke};
use tracing::debug;

/// # Summary
/// 检查第 `m` 根合并 K 线是否构成分型。
///
/// # Logic
/// 1. 顶分型：中间 K 线高点严格高于左右两根，低点严格高于左侧。
/// 2. 严格模式下低点还须严格高于右侧；宽松模式允许与右侧相等。
/// 3. 底分型为镜像条件。
///
/// # Returns
/// 左右邻居不全时返回 `None`。
pub fn detect_fractal(
    candles: &[MergedCandle],
    bars: &[Bar],
    m: usize,
    strict: bool,
) -> Option<Fractal> {
    let left = candles.get(m.checked_sub(1)?)?;
    let mid = candles.get(m)?;
    let right = candles.get(m + 1)?;

    let is_top = mid.high > left.high
        && mid.high > right.high
        && mid.low > left.low
        && (mid.low > right.low || (!strict && mid.low >= right.low));
    let is_bottom = mid.low < left.low
        && mid.low < right.low
        && mid.high < left.high
        && (mid.high < right.high || (!strict && mid.high <= right.high));

    let kind = match (is_top, is_bottom) {
        (true, false) => FractalKind::Top,
        (false, true) => FractalKind::Bottom,
        _ => return None,
    };
    let bar = mid.extreme_bar(kind);
    Some(Fractal {
        kind,
        candle: m,
        price: mid.extreme_price(kind),
        bar,
        time: bars.get(bar).map_or(mid.begin_time, |b| b.time),
    })
}

/// # Summary
/// 笔构造器：消费分型，维护方向交替的笔序列。
///
/// # Invariants
/// - 只有最后一笔可被延伸或撤销，之前的笔均已确认。
/// - 每次笔序列发生变化 `revision` 递增，下游据此决定是否重算。
#[derive(Debug, Clone)]
pub struct StrokeBuilder {
    strict: bool,
    strokes: Vec<Stroke>,
    // 成第一笔之前观察到的最极端顶/底分型
    seed_top: Option<Fractal>,
    seed_bottom: Option<Fractal>,
    revision: u64,
}

impl StrokeBuilder {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            strokes: Vec::new(),
            seed_top: None,
            seed_bottom: None,
            revision: 0,
        }
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// 成笔所需的最小跨度 (合并 K 线下标差)。
    pub fn min_span(&self) -> usize {
        if self.strict { 4 } else { 3 }
    }

    /// # Summary
    /// 处理合并器的一次输出。
    ///
    /// # Logic
    /// 只有追加新合并 K 线时，倒数第二根才具备左右邻居，才检查分型；
    /// 修改最后一根合并 K 线不会改变倒数第二根的分型属性。
    ///
    /// # Returns
    /// 笔序列是否发生变化。
    pub fn feed(&mut self, candles: &[MergedCandle], bars: &[Bar], outcome: MergeOutcome) -> bool {
        let MergeOutcome::Appended(n) = outcome else {
            return false;
        };
        let Some(fractal) = n
            .checked_sub(1)
            .and_then(|m| detect_fractal(candles, bars, m, self.strict))
        else {
            return false;
        };
        let before = self.revision;
        self.on_fractal(candles, fractal);
        self.revision != before
    }

    fn on_fractal(&mut self, candles: &[MergedCandle], fractal: Fractal) {
        let Some(last) = self.strokes.last() else {
            self.on_seed_fractal(candles, fractal);
            return;
        };
        let end = end_fractal(last);
        let begin_price = last.begin_price;

        if fractal.kind == end.kind {
            if fractal.exceeds(end.price) {
                self.extend_last(fractal);
            }
            return;
        }

        if self.can_link(candles, &end, &fractal) {
            if let Some(last) = self.strokes.last_mut() {
                last.confirmed = true;
            }
            self.push_stroke(end, fractal);
        } else if self.strokes.len() == 1 && fractal.exceeds(begin_price) {
            // 唯一的一笔起点被突破且无法反向成笔：撤销该笔，回到寻找起点的状态
            debug!(idx = 0, "First stroke withdrawn");
            self.strokes.clear();
            self.revision += 1;
            match fractal.kind {
                FractalKind::Top => {
                    self.seed_top = Some(fractal);
                    self.seed_bottom = Some(end);
                }
                FractalKind::Bottom => {
                    self.seed_bottom = Some(fractal);
                    self.seed_top = Some(end);
                }
            }
        }
    }

    fn on_seed_fractal(&mut self, candles: &[MergedCandle], fractal: Fractal) {
        let opposite = match fractal.kind {
            FractalKind::Top => self.seed_bottom,
            FractalKind::Bottom => self.seed_top,
        };
        if let Some(begin) = opposite
            && self.can_link(candles, &begin, &fractal)
        {
            self.seed_top = None;
            self.seed_bottom = None;
            self.push_stroke(begin, fractal);
            return;
        }
        let slot = match fractal.kind {
            FractalKind::Top => &mut self.seed_top,
            FractalKind::Bottom => &mut self.seed_bottom,
        };
        if slot.is_none_or(|seed| fractal.exceeds(seed.price)) {
            *slot = Some(fractal);
        }
    }

    /// # Summary
    /// 判断 `begin` 与 `end` 两个相反分型能否连成一笔。
    ///
    /// # Logic
    /// 1. 跨度不小于 `min_span`。
    /// 2. 严格模式：终点极值越过起点分型三根 K 线的范围，起点极值也越过终点分型三根 K 线的范围；
    ///    宽松模式只比较两根分型 K 线。
    /// 3. 起止之间不存在比终点更极端的 K 线。
    fn can_link(&self, candles: &[MergedCandle], begin: &Fractal, end: &Fractal) -> bool {
        if begin.kind == end.kind || end.candle < begin.candle + self.min_span() {
            return false;
        }
        let window = |i: usize| {
            if self.strict {
                candles.get(i.saturating_sub(1)..=i + 1)
            } else {
                candles.get(i..=i)
            }
        };
        let (Some(begin_window), Some(end_window)) = (window(begin.candle), window(end.candle))
        else {
            return false;
        };
        let Some(between) = candles.get(begin.candle + 1..end.candle) else {
            return false;
        };

        match end.kind {
            FractalKind::Top => {
                end.price > begin_window.iter().map(|c| c.high).fold(f64::MIN, f64::max)
                    && begin.price < end_window.iter().map(|c| c.low).fold(f64::MAX, f64::min)
                    && between.iter().all(|c| c.high <= end.price)
            }
            FractalKind::Bottom => {
                end.price < begin_window.iter().map(|c| c.low).fold(f64::MAX, f64::min)
                    && begin.price > end_window.iter().map(|c| c.high).fold(f64::MIN, f64::max)
                    && between.iter().all(|c| c.low >= end.price)
            }
        }
    }

    fn push_stroke(&mut self, begin: Fractal, end: Fractal) {
        let idx = self.strokes.len();
        let direction = end.kind.ending_direction();
        debug!(idx, ?direction, begin = begin.price, end = end.price, "Stroke appended");
        self.strokes.push(Stroke {
            idx,
            direction,
            begin: begin.candle,
            end: end.candle,
            begin_price: begin.price,
            end_price: end.price,
            begin_bar: begin.bar,
            end_bar: end.bar,
            begin_time: begin.time,
            end_time: end.time,
            confirmed: false,
        });
        self.revision += 1;
    }

    fn extend_last(&mut self, fractal: Fractal) {
        if let Some(last) = self.strokes.last_mut() {
            debug!(idx = last.idx, from = last.end_price, to = fractal.price, "Stroke extended");
            last.end = fractal.candle;
            last.end_price = fractal.price;
            last.end_bar = fractal.bar;
            last.end_time = fractal.time;
            self.revision += 1;
        }
    }
}

fn end_fractal(stroke: &Stroke) -> Fractal {
    Fractal {
        kind: match stroke.direction {
            Direction::Up => FractalKind::Top,
            Direction::Down => FractalKind::Bottom,
        },
        candle: stroke.end,
        price: stroke.end_price,
        bar: stroke.end_bar,
        time: stroke.end_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merger::BarMerger;
    use chan_core::test_utils::{bars_from_ranges, zigzag};

    fn build(bars: &[Bar], strict: bool) -> (StrokeBuilder, Vec<usize>) {
        let mut merger = BarMerger::new();
        let mut builder = StrokeBuilder::new(strict);
        let mut counts = Vec::new();
        for (i, bar) in bars.iter().enumerate() {
            let outcome = merger.feed(i, bar);
            builder.feed(merger.candles(), &bars[..=i], outcome);
            counts.push(builder.strokes().len());
        }
        (builder, counts)
    }

    #[test]
    fn test_monotonic_rise_has_no_stroke() {
        let ranges: Vec<(f64, f64)> = (0..8u32)
            .map(|i| (10.0 + f64::from(i), 12.0 + f64::from(i)))
            .collect();
        let (builder, _) = build(&bars_from_ranges(&ranges), true);
        assert!(builder.strokes().is_empty());
        assert_eq!(builder.revision(), 0);
    }

    #[test]
    fn test_zigzag_strokes_alternate() {
        let bars = zigzag(&[10.0, 20.0, 12.0, 22.0, 14.0, 24.0, 16.0], 5);
        let (builder, _) = build(&bars, true);
        let strokes = builder.strokes();
        assert_eq!(strokes.len(), 4);
        assert_eq!(strokes[0].direction, Direction::Down);
        assert_eq!(strokes[0].begin_price, 20.0);
        assert_eq!(strokes[0].end_price, 12.0);
        assert_eq!(strokes[3].end_price, 24.0);
        for pair in strokes.windows(2) {
            assert_ne!(pair[0].direction, pair[1].direction);
            assert_eq!(pair[0].end, pair[1].begin);
            assert!(pair[0].confirmed);
        }
        assert!(!strokes[3].confirmed);
    }

    #[test]
    fn test_strict_span_rejects_short_swings() {
        // 每段只有 3 根合并 K 线的间距：宽松成 4 笔，严格只保留大级别的一笔
        let bars = zigzag(&[10.0, 20.0, 12.0, 22.0, 14.0, 24.0, 16.0], 4);
        let (loose, _) = build(&bars, false);
        assert_eq!(loose.strokes().len(), 4);

        let (strict, _) = build(&bars, true);
        assert_eq!(strict.strokes().len(), 1);
        assert_eq!(strict.strokes()[0].direction, Direction::Up);
        assert_eq!(strict.strokes()[0].begin_price, 12.0);
        assert_eq!(strict.strokes()[0].end_price, 24.0);
    }

    #[test]
    fn test_only_stroke_is_withdrawn_when_its_begin_is_broken() {
        let bars = bars_from_ranges(&[
            (10.0, 12.0),
            (12.0, 14.0),
            (14.0, 16.0),
            (16.0, 20.0),
            (15.0, 18.0),
            (13.0, 16.0),
            (11.0, 14.0),
            (9.0, 12.0),
            (10.0, 13.0),
            (12.0, 22.0),
            (18.0, 21.0),
            (15.0, 19.0),
            (13.0, 17.0),
            (11.0, 15.0),
            (12.0, 16.0),
        ]);
        let (builder, counts) = build(&bars, false);
        // 第 9 根 K 线 (下标 8) 确认底分型后成笔
        assert_eq!(counts[8], 1);
        // 新高 22 突破唯一一笔的起点 20 且无法反向成笔
        assert_eq!(counts[11], 0);
        let strokes = builder.strokes();
        assert_eq!(strokes.len(), 1);
        assert_eq!(strokes[0].begin_price, 22.0);
        assert_eq!(strokes[0].end_price, 11.0);
    }

    #[test]
    fn test_fractal_needs_three_merged_candles() {
        let bars = bars_from_ranges(&[(10.0, 12.0), (11.0, 14.0), (11.0, 13.0)]);
        let mut merger = BarMerger::new();
        for (i, bar) in bars.iter().enumerate() {
            merger.feed(i, bar);
        }
        // 第三根被第二根包含，合并后只剩两根，不构成分型
        assert!(detect_fractal(merger.candles(), &bars, 1, false).is_none());

        let bars = bars_from_ranges(&[(10.0, 12.0), (11.0, 14.0), (10.5, 13.0)]);
        let mut merger = BarMerger::new();
        for (i, bar) in bars.iter().enumerate() {
            merger.feed(i, bar);
        }
        let fractal = detect_fractal(merger.candles(), &bars, 1, true).unwrap();
        assert_eq!(fractal.kind, FractalKind::Top);
        assert_eq!(fractal.price, 14.0);
    }
}
