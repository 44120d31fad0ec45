use crate::context::AnalysisContext;
use chan_core::common::TimeFrame;
use chan_core::config::ChanConfig;
use chan_core::market::entity::Bar;
use chan_core::structure::entity::{MergedCandle, Segment, Signal, Stroke, Zone, ZoneLevel};
use chan_core::structure::error::{AnalysisError, ConfigError};
use chan_core::structure::port::Swing;
use chrono::{DateTime, Utc};

/// # Summary
/// 子级别在某个时间窗口 `[begin, end)` 内的只读结构视图。
///
/// # Invariants
/// - 各序列只包含完全落在窗口内的结构，且保持原有顺序与下标。
#[derive(Debug, Clone, Copy)]
pub struct LevelView<'a> {
    pub timeframe: TimeFrame,
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub merged: &'a [MergedCandle],
    pub strokes: &'a [Stroke],
    pub segments: &'a [Segment],
    pub zones: &'a [Zone],
    pub signals: &'a [Signal],
}

/// 按时间截取有序序列：起点不早于 `begin`、终点早于 `end` 的连续片段。
fn within<'a, T>(
    items: &'a [T],
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    first: impl Fn(&T) -> DateTime<Utc>,
    last: impl Fn(&T) -> DateTime<Utc>,
) -> &'a [T] {
    let lo = items.partition_point(|x| first(x) < begin);
    let hi = items.partition_point(|x| last(x) < end);
    items.get(lo..hi.max(lo)).unwrap_or_default()
}

/// # Summary
/// 多级别分析上下文：每个级别独立维护，级别之间只通过时间区间关联 (区间套)。
///
/// # Invariants
/// - 级别由粗到细排列且互不重复。
/// - 父级别的一段波动只以时间窗口引用子级别，不持有子级别结构。
#[derive(Debug, Clone)]
pub struct MultiLevelContext {
    levels: Vec<AnalysisContext>,
}

impl MultiLevelContext {
    /// # Summary
    /// 以同一份配置为每个级别创建上下文。
    ///
    /// # Arguments
    /// * `timeframes`: 参与分析的级别，顺序任意，重复项被忽略。
    pub fn new(config: &ChanConfig, timeframes: &[TimeFrame]) -> Result<Self, AnalysisError> {
        let mut ordered = timeframes.to_vec();
        ordered.sort_unstable_by(|a, b| b.cmp(a));
        ordered.dedup();
        if ordered.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "timeframes".to_string(),
                value: "[]".to_string(),
            }
            .into());
        }
        let levels = ordered
            .into_iter()
            .map(|tf| AnalysisContext::with_timeframe(config.clone(), tf))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { levels })
    }

    /// 由粗到细的级别列表。
    pub fn timeframes(&self) -> Vec<TimeFrame> {
        self.levels.iter().filter_map(AnalysisContext::timeframe).collect()
    }

    fn position(&self, timeframe: TimeFrame) -> Result<usize, AnalysisError> {
        self.levels
            .iter()
            .position(|c| c.timeframe() == Some(timeframe))
            .ok_or(AnalysisError::UnknownTimeFrame(timeframe))
    }

    pub fn level(&self, timeframe: TimeFrame) -> Result<&AnalysisContext, AnalysisError> {
        let pos = self.position(timeframe)?;
        self.levels
            .get(pos)
            .ok_or(AnalysisError::UnknownTimeFrame(timeframe))
    }

    /// 向指定级别喂入一根 K 线，各级别互不影响。
    pub fn feed(&mut self, timeframe: TimeFrame, bar: Bar) -> Result<bool, AnalysisError> {
        let pos = self.position(timeframe)?;
        match self.levels.get_mut(pos) {
            Some(ctx) => ctx.feed(bar),
            None => Err(AnalysisError::UnknownTimeFrame(timeframe)),
        }
    }

    /// 紧邻的更细一级。
    pub fn child_of(&self, timeframe: TimeFrame) -> Option<TimeFrame> {
        let pos = self.position(timeframe).ok()?;
        self.levels.get(pos + 1).and_then(AnalysisContext::timeframe)
    }

    fn child_window<S: Swing>(
        &self,
        parent: TimeFrame,
        swing: &S,
    ) -> Result<LevelView<'_>, AnalysisError> {
        let pos = self.position(parent)?;
        let child = self.levels.get(pos + 1).ok_or(AnalysisError::IndexOutOfRange {
            what: "child level",
            index: pos + 1,
        })?;
        let timeframe = child.timeframe().ok_or(AnalysisError::UnknownTimeFrame(parent))?;
        // 父级别 K 线的时间戳是其周期的起点，终点那根 K 线覆盖到下一个周期之前
        let (begin, end) = (swing.begin_time(), swing.end_time() + parent.duration());
        Ok(LevelView {
            timeframe,
            begin,
            end,
            merged: within(child.merged(), begin, end, |c| c.begin_time, |c| c.end_time),
            strokes: within(child.strokes(), begin, end, |s| s.begin_time, |s| s.end_time),
            segments: within(child.segments(), begin, end, |s| s.begin_time, |s| s.end_time),
            zones: within(child.zones(), begin, end, |z| z.begin_time, |z| z.end_time),
            signals: within(child.signals(), begin, end, |s| s.time, |s| s.time),
        })
    }

    /// # Summary
    /// 父级别一笔所覆盖时间窗口内的子级别结构。
    ///
    /// # Returns
    /// 父级别不存在、已是最细级别或笔下标越界时返回错误。
    pub fn child_view(
        &self,
        parent: TimeFrame,
        stroke_idx: usize,
    ) -> Result<LevelView<'_>, AnalysisError> {
        let stroke = self
            .level(parent)?
            .strokes()
            .get(stroke_idx)
            .ok_or(AnalysisError::IndexOutOfRange {
                what: "stroke",
                index: stroke_idx,
            })?;
        self.child_window(parent, stroke)
    }

    /// # Summary
    /// 区间套：在父级别信号所在波动的时间窗口内，寻找子级别的同向信号。
    pub fn drill_down(
        &self,
        parent: TimeFrame,
        signal: &Signal,
    ) -> Result<Vec<&Signal>, AnalysisError> {
        let ctx = self.level(parent)?;
        let out_of_range = AnalysisError::IndexOutOfRange {
            what: "signal swing",
            index: signal.swing,
        };
        let view = match signal.level {
            ZoneLevel::Stroke => {
                let swing = ctx.strokes().get(signal.swing).ok_or(out_of_range)?;
                self.child_window(parent, swing)?
            }
            ZoneLevel::Segment => {
                let swing = ctx.segments().get(signal.swing).ok_or(out_of_range)?;
                self.child_window(parent, swing)?
            }
        };
        Ok(view.signals.iter().filter(|s| s.is_buy == signal.is_buy).collect())
    }
}
