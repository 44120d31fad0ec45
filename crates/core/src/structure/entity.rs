use crate::common::TimeFrame;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// # Summary
/// 笔与线段的方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 向上
    Up,
    /// 向下
    Down,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// # Summary
/// 合并 K 线相对前一根的方向；首根合并 K 线尚无方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeDirection {
    Up,
    Down,
    Undetermined,
}

/// # Summary
/// 包含关系处理后的合并 K 线。
///
/// # Invariants
/// - 相邻两根合并 K 线之间不存在包含关系。
/// - `begin_bar..=end_bar` 是连续的原始 K 线区间，`high_bar`/`low_bar` 落在其中。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedCandle {
    // 在合并 K 线序列中的位置
    pub idx: usize,
    pub high: f64,
    pub low: f64,
    pub direction: MergeDirection,
    // 覆盖的首根原始 K 线下标
    pub begin_bar: usize,
    // 覆盖的末根原始 K 线下标
    pub end_bar: usize,
    // 取得最高价的原始 K 线下标
    pub high_bar: usize,
    // 取得最低价的原始 K 线下标
    pub low_bar: usize,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl MergedCandle {
    /// 两个价格区间是否存在包含关系 (含边界相等)。
    pub fn is_inclusive(&self, high: f64, low: f64) -> bool {
        (self.high >= high && self.low <= low) || (self.high <= high && self.low >= low)
    }

    /// 分型极值所在的原始 K 线。
    pub fn extreme_bar(&self, kind: FractalKind) -> usize {
        match kind {
            FractalKind::Top => self.high_bar,
            FractalKind::Bottom => self.low_bar,
        }
    }

    pub fn extreme_price(&self, kind: FractalKind) -> f64 {
        match kind {
            FractalKind::Top => self.high,
            FractalKind::Bottom => self.low,
        }
    }
}

/// # Summary
/// 分型种类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FractalKind {
    Top,
    Bottom,
}

impl FractalKind {
    /// 以该分型为终点的笔的方向。
    pub fn ending_direction(self) -> Direction {
        match self {
            FractalKind::Top => Direction::Up,
            FractalKind::Bottom => Direction::Down,
        }
    }
}

/// # Summary
/// 由三根相邻合并 K 线确定的分型，仅在成笔过程中临时使用。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fractal {
    pub kind: FractalKind,
    // 中间那根合并 K 线的下标
    pub candle: usize,
    // 顶分型取最高价，底分型取最低价
    pub price: f64,
    // 极值所在的原始 K 线及其时间
    pub bar: usize,
    pub time: DateTime<Utc>,
}

impl Fractal {
    /// 同类分型中 `self` 是否比 `other` 更极端。
    pub fn exceeds(&self, other_price: f64) -> bool {
        match self.kind {
            FractalKind::Top => self.price > other_price,
            FractalKind::Bottom => self.price < other_price,
        }
    }
}

/// # Summary
/// 笔：连接一对相反分型的方向性波动。
///
/// # Invariants
/// - 相邻笔方向交替，且前一笔的终点即后一笔的起点。
/// - 只有最后一笔可能 `confirmed == false`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub idx: usize,
    pub direction: Direction,
    // 起点合并 K 线下标
    pub begin: usize,
    // 终点合并 K 线下标
    pub end: usize,
    pub begin_price: f64,
    pub end_price: f64,
    // 起止分型极值所在的原始 K 线
    pub begin_bar: usize,
    pub end_bar: usize,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub confirmed: bool,
}

impl Stroke {
    /// 笔跨越的合并 K 线数量 (终点下标 - 起点下标)。
    pub fn span(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }
}

/// # Summary
/// 线段：由至少三笔构成的更高一级波动。
///
/// # Invariants
/// - 相邻线段方向交替，`begin_stroke..=end_stroke` 首尾相接覆盖笔序列。
/// - 已确认线段只依赖已确认的笔。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub idx: usize,
    pub direction: Direction,
    pub begin_stroke: usize,
    pub end_stroke: usize,
    pub begin_price: f64,
    pub end_price: f64,
    pub begin_bar: usize,
    pub end_bar: usize,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub confirmed: bool,
}

impl Segment {
    pub fn stroke_count(&self) -> usize {
        self.end_stroke + 1 - self.begin_stroke
    }
}

/// # Summary
/// 中枢所依据的波动级别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ZoneLevel {
    /// 以笔构造中枢
    #[default]
    Stroke,
    /// 以线段构造中枢
    Segment,
}

/// # Summary
/// 中枢：至少三段连续波动价格重叠形成的区间。
///
/// # Invariants
/// - `[low, high]` 恒等于 `members` 中所有波动区间的交集，且 `low < high`。
/// - `members` 严格递增，前三个成员是连续的三段波动。
/// - `peak_low`/`peak_high` 为成员波动的最低/最高点。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub idx: usize,
    pub level: ZoneLevel,
    // 首个成员波动下标
    pub begin: usize,
    // 末个成员波动下标
    pub end: usize,
    pub members: Vec<usize>,
    pub low: f64,
    pub high: f64,
    pub peak_low: f64,
    pub peak_high: f64,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    // 离开中枢的那一段波动 (若已离开)
    pub exit: Option<usize>,
    pub confirmed: bool,
    // 成员多于三段 (被延伸或合并过)
    pub extended: bool,
}

impl Zone {
    /// 价格区间是否与中枢正向重叠 (仅接触边界不算)。
    pub fn overlaps(&self, low: f64, high: f64) -> bool {
        low.max(self.low) < high.min(self.high)
    }

    pub fn is_closed(&self) -> bool {
        self.exit.is_some()
    }
}

/// # Summary
/// 买卖点类型，封闭集合。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BspType {
    #[serde(rename = "1")]
    T1,
    #[serde(rename = "1p")]
    T1p,
    #[serde(rename = "2")]
    T2,
    #[serde(rename = "2s")]
    T2s,
    #[serde(rename = "3a")]
    T3a,
    #[serde(rename = "3b")]
    T3b,
}

impl BspType {
    pub const ALL: [BspType; 6] = [
        BspType::T1,
        BspType::T1p,
        BspType::T2,
        BspType::T2s,
        BspType::T3a,
        BspType::T3b,
    ];
}

impl FromStr for BspType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(BspType::T1),
            "1p" => Ok(BspType::T1p),
            "2" => Ok(BspType::T2),
            "2s" => Ok(BspType::T2s),
            "3a" => Ok(BspType::T3a),
            "3b" => Ok(BspType::T3b),
            other => Err(format!("Unknown bs_type: {}", other)),
        }
    }
}

impl std::fmt::Display for BspType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BspType::T1 => "1",
            BspType::T1p => "1p",
            BspType::T2 => "2",
            BspType::T2s => "2s",
            BspType::T3a => "3a",
            BspType::T3b => "3b",
        };
        write!(f, "{}", s)
    }
}

/// # Summary
/// 买卖点：在某一波动终点识别出的分类信号。
///
/// # Invariants
/// - `swing` 指向 `level` 对应序列 (笔或线段) 中的下标。
/// - 一经确认不再撤回。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub swing: usize,
    pub level: ZoneLevel,
    pub kind: BspType,
    pub is_buy: bool,
    // 信号所在波动终点的价格与原始 K 线
    pub price: f64,
    pub bar: usize,
    pub time: DateTime<Utc>,
    // 判定所依据的中枢
    pub zone: Option<usize>,
    // 离开段力度 / 进入段力度，仅一类点携带
    pub divergence: Option<f64>,
    pub confirmed: bool,
}

impl Signal {
    /// 同一信号的身份键：波动、类型、方向。
    pub fn key(&self) -> (usize, BspType, bool) {
        (self.swing, self.kind, self.is_buy)
    }
}

/// # Summary
/// 单根 K 线上的 MACD 动量值。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdPoint {
    pub dif: f64,
    pub dea: f64,
    pub macd: f64,
}

/// # Summary
/// 某一级别在某一时刻的完整结构快照，供外部协作方消费。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureRecord {
    pub timeframe: Option<TimeFrame>,
    // 已接收的原始 K 线数量
    pub bar_count: usize,
    pub merged: Vec<MergedCandle>,
    pub strokes: Vec<Stroke>,
    pub segments: Vec<Segment>,
    pub zones: Vec<Zone>,
    pub signals: Vec<Signal>,
    pub macd: Vec<MacdPoint>,
}
