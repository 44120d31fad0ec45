use crate::bsp::{SignalBook, SignalInput};
use crate::macd::MacdCalculator;
use crate::merger::BarMerger;
use crate::segment::SegmentBuilder;
use crate::stroke::StrokeBuilder;
use crate::zone::ZoneBuilder;
use chan_core::common::TimeFrame;
use chan_core::config::ChanConfig;
use chan_core::market::entity::Bar;
use chan_core::structure::entity::{
    MacdPoint, MergedCandle, Segment, Signal, Stroke, StructureRecord, Zone, ZoneLevel,
};
use chan_core::structure::error::AnalysisError;
use chan_core::structure::port::Swing;
use tracing::{debug, warn};

/// # Summary
/// 单一级别的分析上下文：持有该级别的全部结构，并按 K 线增量驱动五个阶段。
///
/// # Invariants
/// - 单写者：同一上下文的 K 线按时间严格递增顺序喂入。
/// - 被拒绝的 K 线不改变任何结构。
/// - 已确认的笔、线段、中枢、买卖点一经确认永不修改或撤回。
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    config: ChanConfig,
    timeframe: Option<TimeFrame>,
    bars: Vec<Bar>,
    macd: MacdCalculator,
    merger: BarMerger,
    strokes: StrokeBuilder,
    segments: SegmentBuilder,
    zones: ZoneBuilder,
    signals: SignalBook,
}

impl AnalysisContext {
    /// # Summary
    /// 校验配置并创建空上下文。
    ///
    /// # Returns
    /// 配置非法时返回 `AnalysisError::Config`。
    pub fn new(config: ChanConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self {
            timeframe: None,
            bars: Vec::new(),
            macd: MacdCalculator::new(&config.macd),
            merger: BarMerger::new(),
            strokes: StrokeBuilder::new(config.bi_strict),
            segments: SegmentBuilder::new(config.seg_algo),
            zones: ZoneBuilder::from_config(&config),
            signals: SignalBook::new(),
            config,
        })
    }

    pub fn with_timeframe(config: ChanConfig, timeframe: TimeFrame) -> Result<Self, AnalysisError> {
        let mut ctx = Self::new(config)?;
        ctx.timeframe = Some(timeframe);
        Ok(ctx)
    }

    pub fn config(&self) -> &ChanConfig {
        &self.config
    }

    pub fn timeframe(&self) -> Option<TimeFrame> {
        self.timeframe
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn merged(&self) -> &[MergedCandle] {
        self.merger.candles()
    }

    pub fn strokes(&self) -> &[Stroke] {
        self.strokes.strokes()
    }

    pub fn segments(&self) -> &[Segment] {
        self.segments.segments()
    }

    pub fn zones(&self) -> &[Zone] {
        self.zones.zones()
    }

    pub fn signals(&self) -> &[Signal] {
        self.signals.signals()
    }

    pub fn macd(&self) -> &[MacdPoint] {
        self.macd.points()
    }

    /// # Summary
    /// 喂入一根 K 线，依次驱动合并、成笔、线段、中枢、买卖点。
    ///
    /// # Logic
    /// 1. 校验 K 线 (区间、有限值、时间递增)，失败时记录告警并原样返回，上下文不变。
    /// 2. 更新 MACD 与合并 K 线，再由合并结果驱动成笔。
    /// 3. 笔序列变化时，依次重算线段、中枢与买卖点的未确认尾部；
    ///    买卖点只重算稳定边界之后的部分。
    /// 4. 检查结构不变量，被破坏时返回 `InvariantViolation`。
    ///
    /// # Returns
    /// 笔及以上结构是否发生变化。
    pub fn feed(&mut self, bar: Bar) -> Result<bool, AnalysisError> {
        if let Err(e) = bar.validate_after(self.bars.last().map(|b| b.time)) {
            warn!(timeframe = ?self.timeframe, time = %bar.time, error = %e, "Bar rejected");
            return Err(e.into());
        }

        let bar_idx = self.bars.len();
        self.macd.update(bar.close);
        let outcome = self.merger.feed(bar_idx, &bar);
        self.bars.push(bar);
        let changed = self
            .strokes
            .feed(self.merger.candles(), &self.bars, outcome);

        if changed {
            self.segments.update(self.strokes.strokes());
            match self.zones.level() {
                ZoneLevel::Stroke => {
                    self.zones.update(self.strokes.strokes(), self.segments.segments())
                }
                ZoneLevel::Segment => self.zones.update(self.segments.segments(), &[]),
            };
            let from = self.signals.settled();
            let replaced = self.update_signals();
            let tail = self.tail_signals(from);
            log_signal_changes(&replaced, tail);
            check_signals(&replaced, tail)?;
        }
        self.check_structures()?;
        Ok(changed)
    }

    /// # Summary
    /// 批量喂入 K 线，等价于逐根调用 `feed`。
    ///
    /// # Returns
    /// `trigger_step` 开启时每根 K 线之后输出一份快照，否则只在最后输出一份。
    pub fn load(
        &mut self,
        bars: impl IntoIterator<Item = Bar>,
    ) -> Result<Vec<StructureRecord>, AnalysisError> {
        let mut records = Vec::new();
        for bar in bars {
            self.feed(bar)?;
            if self.config.trigger_step {
                records.push(self.record());
            }
        }
        if !self.config.trigger_step {
            records.push(self.record());
        }
        Ok(records)
    }

    /// 当前完整结构快照。
    pub fn record(&self) -> StructureRecord {
        StructureRecord {
            timeframe: self.timeframe,
            bar_count: self.bars.len(),
            merged: self.merged().to_vec(),
            strokes: self.strokes().to_vec(),
            segments: self.segments().to_vec(),
            zones: self.zones().to_vec(),
            signals: self.signals().to_vec(),
            macd: self.macd().to_vec(),
        }
    }

    fn update_signals(&mut self) -> Vec<Signal> {
        let (zones, segments) = (self.zones.zones(), self.segments.segments());
        let frontier = self.zones.frontier();
        match self.zones.level() {
            ZoneLevel::Stroke => self.signals.update(
                &SignalInput {
                    level: ZoneLevel::Stroke,
                    swings: self.strokes.strokes(),
                    zones,
                    segments,
                    macd: &self.macd,
                    frontier,
                },
                &self.config,
            ),
            ZoneLevel::Segment => self.signals.update(
                &SignalInput {
                    level: ZoneLevel::Segment,
                    swings: segments,
                    zones,
                    segments,
                    macd: &self.macd,
                    frontier,
                },
                &self.config,
            ),
        }
    }

    /// 波动下标不小于 `from` 的信号。
    fn tail_signals(&self, from: usize) -> &[Signal] {
        let signals = self.signals();
        signals
            .get(signals.partition_point(|s| s.swing < from)..)
            .unwrap_or_default()
    }

    fn check_structures(&self) -> Result<(), AnalysisError> {
        if let [.., a, b] = self.merged()
            && (a.is_inclusive(b.high, b.low) || a.end_bar + 1 != b.begin_bar)
        {
            return Err(AnalysisError::invariant(
                "merger",
                format!("merged candles {} and {} overlap by inclusion", a.idx, b.idx),
            ));
        }

        if let [.., a, b] = self.strokes()
            && (a.direction == b.direction || a.end != b.begin || !a.confirmed)
        {
            return Err(AnalysisError::invariant(
                "stroke",
                format!("strokes {} and {} do not alternate", a.idx, b.idx),
            ));
        }

        for w in self.segments().windows(2) {
            let (a, b) = (&w[0], &w[1]);
            if a.direction == b.direction
                || a.end_stroke + 1 != b.begin_stroke
                || (b.confirmed && !a.confirmed)
            {
                return Err(AnalysisError::invariant(
                    "segment",
                    format!("segments {} and {} are not chained", a.idx, b.idx),
                ));
            }
        }

        match self.zones.level() {
            ZoneLevel::Stroke => check_zones(self.zones(), self.strokes()),
            ZoneLevel::Segment => check_zones(self.zones(), self.segments()),
        }
    }
}

fn log_signal_changes(previous: &[Signal], current: &[Signal]) {
    for s in current {
        match previous.iter().find(|p| p.key() == s.key()) {
            None => debug!(
                swing = s.swing,
                kind = %s.kind,
                is_buy = s.is_buy,
                price = s.price,
                "Signal emitted"
            ),
            Some(p) if s.confirmed && !p.confirmed => {
                debug!(swing = s.swing, kind = %s.kind, is_buy = s.is_buy, "Signal confirmed")
            }
            Some(_) => {}
        }
    }
    for p in previous
        .iter()
        .filter(|p| !current.iter().any(|s| s.key() == p.key()))
    {
        debug!(swing = p.swing, kind = %p.kind, is_buy = p.is_buy, "Signal retracted");
    }
}

/// 已确认的买卖点必须原样保留。
fn check_signals(previous: &[Signal], current: &[Signal]) -> Result<(), AnalysisError> {
    for p in previous.iter().filter(|p| p.confirmed) {
        let kept = current
            .binary_search_by_key(&p.key(), Signal::key)
            .ok()
            .and_then(|i| current.get(i));
        if kept != Some(p) {
            return Err(AnalysisError::invariant(
                "bsp",
                format!("confirmed signal {} at swing {} was revised", p.kind, p.swing),
            ));
        }
    }
    Ok(())
}

/// 中枢边界必须等于成员区间的交集。
fn check_zones<S: Swing>(zones: &[Zone], swings: &[S]) -> Result<(), AnalysisError> {
    for zone in zones.iter().filter(|z| !z.confirmed) {
        let mut low = f64::MIN;
        let mut high = f64::MAX;
        for &m in &zone.members {
            let swing = swings.get(m).ok_or(AnalysisError::IndexOutOfRange {
                what: "zone member",
                index: m,
            })?;
            low = low.max(swing.low());
            high = high.min(swing.high());
        }
        if zone.members.len() < 3 || low != zone.low || high != zone.high || zone.low >= zone.high {
            return Err(AnalysisError::invariant(
                "zone",
                format!(
                    "zone {} bounds [{}, {}] differ from member intersection",
                    zone.idx, zone.low, zone.high
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp::classify;
    use chan_core::config::{SegAlgo, ZsAlgo};
    use chan_core::market::error::DataError;
    use chan_core::structure::entity::BspType;
    use chan_core::structure::error::ConfigError;
    use chan_core::test_utils::{bars_from_closes, bars_from_ranges, random_walk, ts, zigzag};

    /// 对当前结构从头识别买卖点。
    fn classify_from_scratch(ctx: &AnalysisContext) -> Vec<Signal> {
        let (zones, segments) = (ctx.zones(), ctx.segments());
        let frontier = ctx.zones.frontier();
        match ctx.zones.level() {
            ZoneLevel::Stroke => classify(
                &SignalInput {
                    level: ZoneLevel::Stroke,
                    swings: ctx.strokes(),
                    zones,
                    segments,
                    macd: &ctx.macd,
                    frontier,
                },
                &ctx.config,
            ),
            ZoneLevel::Segment => classify(
                &SignalInput {
                    level: ZoneLevel::Segment,
                    swings: segments,
                    zones,
                    segments,
                    macd: &ctx.macd,
                    frontier,
                },
                &ctx.config,
            ),
        }
    }

    #[test]
    fn test_rejected_bar_leaves_context_unchanged() -> anyhow::Result<()> {
        let mut ctx = AnalysisContext::new(ChanConfig::default())?;
        ctx.load(zigzag(&[10.0, 20.0, 12.0, 22.0, 14.0], 5))?;
        let before = ctx.record();

        let bad = Bar::new(ts(1000), 10.0, 9.0, 11.0, 10.0, 0.0);
        let err = ctx.feed(bad).unwrap_err();
        assert!(matches!(err, AnalysisError::Data(DataError::InvertedRange { .. })));
        assert_eq!(ctx.record(), before);

        let stale = Bar::new(ts(0), 10.0, 11.0, 9.0, 10.0, 0.0);
        let err = ctx.feed(stale).unwrap_err();
        assert!(matches!(err, AnalysisError::Data(DataError::NonMonotonicTime { .. })));
        assert_eq!(ctx.record(), before);
        Ok(())
    }

    #[test]
    fn test_invalid_config_rejected_at_creation() {
        let config = ChanConfig {
            zs_level: ZoneLevel::Segment,
            ..ChanConfig::default()
        };
        let err = AnalysisContext::new(config).unwrap_err();
        assert!(matches!(err, AnalysisError::Config(ConfigError::Incompatible(_))));
    }

    #[test]
    fn test_step_replay_yields_record_per_bar() -> anyhow::Result<()> {
        let config = ChanConfig {
            trigger_step: true,
            ..ChanConfig::default()
        };
        let bars = bars_from_ranges(&[(10.0, 12.0), (11.0, 13.0), (11.5, 12.5), (12.0, 14.0)]);
        let mut ctx = AnalysisContext::with_timeframe(config, TimeFrame::Day1)?;
        let records = ctx.load(bars)?;
        assert_eq!(records.len(), 4);
        assert_eq!(records[2].merged.len(), 2);
        assert_eq!(records[3].bar_count, 4);
        assert_eq!(records[3].timeframe, Some(TimeFrame::Day1));
        Ok(())
    }

    #[test]
    fn test_batch_load_yields_final_record() -> anyhow::Result<()> {
        let mut ctx = AnalysisContext::new(ChanConfig::default())?;
        let records = ctx.load(zigzag(&[10.0, 20.0, 12.0, 22.0, 14.0, 24.0, 16.0], 5))?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].strokes.len(), 4);
        assert_eq!(records[0].macd.len(), records[0].bar_count);
        Ok(())
    }

    #[test]
    fn test_incremental_signals_match_full_classification() -> anyhow::Result<()> {
        let unlimited = ChanConfig {
            divergence_rate: f64::INFINITY,
            ..ChanConfig::default()
        };
        let configs = [
            unlimited.clone(),
            ChanConfig::default(),
            ChanConfig {
                bsp2_follow_1: true,
                bsp3_follow_1: true,
                bs_type: vec![BspType::T2, BspType::T3a, BspType::T3b],
                ..unlimited.clone()
            },
            ChanConfig {
                seg_algo: SegAlgo::Break,
                zs_algo: ZsAlgo::OverSeg,
                max_bsp2s_lv: Some(1),
                ..unlimited.clone()
            },
            ChanConfig {
                zs_algo: ZsAlgo::Auto,
                zs_level: ZoneLevel::Segment,
                ..unlimited
            },
        ];
        for config in configs {
            for seed in [3, 9] {
                let mut ctx = AnalysisContext::new(config.clone())?;
                for (i, bar) in random_walk(seed, 3000).into_iter().enumerate() {
                    ctx.feed(bar)?;
                    if i % 25 == 0 {
                        assert_eq!(ctx.signals(), classify_from_scratch(&ctx).as_slice());
                    }
                }
                assert_eq!(ctx.signals(), classify_from_scratch(&ctx).as_slice());
                assert!(ctx.signals.settled() <= ctx.strokes().len());
            }
        }
        Ok(())
    }

    #[test]
    fn test_signal_recompute_window_advances() -> anyhow::Result<()> {
        let config = ChanConfig {
            divergence_rate: f64::INFINITY,
            ..ChanConfig::default()
        };
        let mut ctx = AnalysisContext::new(config)?;
        let mut settled = 0;
        for bar in random_walk(9, 3000) {
            ctx.feed(bar)?;
            assert!(ctx.signals.settled() >= settled);
            settled = ctx.signals.settled();
        }
        assert!(settled > 0);
        assert!(ctx.signals().iter().all(|s| s.swing >= settled || s.confirmed));
        Ok(())
    }

    #[test]
    fn test_macd_tracks_closes() -> anyhow::Result<()> {
        let closes: Vec<f64> = (0..40u32)
            .map(|i| if i < 25 { 10.0 + f64::from(i) } else { 58.0 - f64::from(i) })
            .collect();
        let mut ctx = AnalysisContext::new(ChanConfig::default())?;
        ctx.load(bars_from_closes(&closes))?;

        let mut expected = MacdCalculator::new(&ChanConfig::default().macd);
        for &close in &closes {
            expected.update(close);
        }
        assert_eq!(ctx.macd(), expected.points());
        assert!(ctx.macd()[24].dif > 0.0);
        assert!(ctx.macd()[39].macd < 0.0);
        Ok(())
    }
}
