use crate::macd::MacdCalculator;
use crate::segment::beyond;
use chan_core::config::ChanConfig;
use chan_core::structure::entity::{BspType, Direction, Segment, Signal, Zone, ZoneLevel};
use chan_core::structure::port::Swing;
use std::collections::BTreeMap;

/// 波动在 `direction` 方向上到达的价格。
fn reach<S: Swing>(swing: &S, direction: Direction) -> f64 {
    match direction {
        Direction::Up => swing.high(),
        Direction::Down => swing.low(),
    }
}

fn overlap<S: Swing>(a: &S, b: &S) -> bool {
    a.low().max(b.low()) < a.high().min(b.high())
}

/// # Summary
/// 单一级别上识别买卖点所需的结构输入。
///
/// # Invariants
/// - `swings` 与 `zones` 属于同一级别 `level`。
/// - `frontier` 之前开始的中枢均已确认，新中枢只会从 `frontier` 及之后开始。
pub struct SignalInput<'a, S> {
    pub level: ZoneLevel,
    pub swings: &'a [S],
    pub zones: &'a [Zone],
    // 笔级别时用作二类点锚点的线段
    pub segments: &'a [Segment],
    pub macd: &'a MacdCalculator,
    pub frontier: usize,
}

type SignalKey = (usize, BspType, bool);

impl<S: Swing> SignalInput<'_, S> {
    fn strength(&self, config: &ChanConfig, i: usize) -> f64 {
        self.swings.get(i).map_or(0.0, |s| {
            self.macd
                .strength(config.macd_algo, s.begin_bar(), s.end_bar(), s.direction())
        })
    }

    fn swing_ok(&self, i: usize) -> bool {
        self.swings.get(i).is_some_and(Swing::is_confirmed)
    }

    /// # Summary
    /// 计算稳定边界：下标小于该值的波动上的买卖点已完全由已确认结构决定。
    ///
    /// # Logic
    /// 取以下三者的最小值：
    /// 1. 第一段未确认波动；
    /// 2. 中枢前沿，其之前开始的中枢均已确认且不会再出现新中枢；
    /// 3. 以线段终点作二类点锚点时，第一个未确认线段的起点 (全部确认时为最后线段之后)。
    fn stable_bound(&self, config: &ChanConfig) -> usize {
        let swings = self.swings.partition_point(Swing::is_confirmed);
        let mut bound = swings.min(self.frontier);
        if !config.bsp2_follow_1 && self.level == ZoneLevel::Stroke {
            let open = self.segments.partition_point(|s| s.confirmed);
            let segments = match self.segments.get(open) {
                Some(s) => s.begin_stroke,
                None => self.segments.last().map_or(0, |s| s.end_stroke + 1),
            };
            bound = bound.min(segments);
        }
        bound
    }
}

/// # Summary
/// 一次重算中新产生的信号，只收集下标不小于 `from` 的部分。
struct Batch {
    from: usize,
    signals: BTreeMap<SignalKey, Signal>,
}

impl Batch {
    fn new(from: usize) -> Self {
        Self {
            from,
            signals: BTreeMap::new(),
        }
    }

    fn emit<S: Swing>(
        &mut self,
        input: &SignalInput<'_, S>,
        i: usize,
        kind: BspType,
        zone: Option<usize>,
        divergence: Option<f64>,
        confirmed: bool,
    ) {
        if i < self.from {
            return;
        }
        let Some(swing) = input.swings.get(i) else {
            return;
        };
        let signal = Signal {
            swing: i,
            level: input.level,
            kind,
            is_buy: swing.direction() == Direction::Down,
            price: swing.end_price(),
            bar: swing.end_bar(),
            time: swing.end_time(),
            zone,
            divergence,
            confirmed,
        };
        self.signals
            .entry(signal.key())
            .and_modify(|existing| existing.confirmed |= confirmed)
            .or_insert(signal);
    }

    fn first_classes(&self) -> impl Iterator<Item = &Signal> {
        self.signals.values().filter(|s| s.kind == BspType::T1)
    }
}

/// 某一方向上最早的一类点，及最早的已确认一类点。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Earliest {
    any: Option<usize>,
    confirmed: Option<usize>,
}

impl Earliest {
    fn mark(&mut self, signal: &Signal) {
        self.any = Some(self.any.map_or(signal.swing, |a| a.min(signal.swing)));
        if signal.confirmed {
            self.confirmed = Some(self.confirmed.map_or(signal.swing, |c| c.min(signal.swing)));
        }
    }
}

/// 进入中枢的同向波动：中枢首段之前最近的一段与 `direction` 同向的波动。
fn entry_swing<S: Swing>(swings: &[S], zone: &Zone, direction: Direction) -> Option<usize> {
    (1..=2)
        .filter_map(|k| zone.begin.checked_sub(k))
        .find(|&e| swings.get(e).is_some_and(|s| s.direction() == direction))
}

/// 以 `pos` 号中枢结尾、沿 `direction` 依次错开排列的中枢数量。
fn trend_len(zones: &[Zone], pos: usize, direction: Direction) -> u32 {
    let stepping = |prev: &Zone, cur: &Zone| match direction {
        Direction::Down => prev.low >= cur.high,
        Direction::Up => prev.high <= cur.low,
    };
    let run = zones.get(..=pos).map_or(0, |z| {
        z.windows(2)
            .rev()
            .take_while(|w| stepping(&w[0], &w[1]))
            .count()
    });
    u32::try_from(run + 1).unwrap_or(u32::MAX)
}

/// # Summary
/// 一类点与类一买卖点。
///
/// # Logic
/// 对每段波动 `i >= from`，取首段早于 `i - 2` 的最近中枢 `Z` (中枢按起点有序，二分查找)：
/// 1. 一类点：`i` 的极值越过 `Z` 在 `i` 之前所有成员的极值，且相对进入段满足背驰，
///    趋势中错开排列的中枢数不少于 `min_zs_cnt`；开启 `bs1_peak` 时还需是进入段以来的绝对极值。
/// 2. 类一：一类条件不满足，但 `i` 相对前一同向波动创新极值且满足背驰。
fn first_class<S: Swing>(input: &SignalInput<'_, S>, config: &ChanConfig, out: &mut Batch) {
    let rate = config.divergence_rate;
    let diverges = |out_strength: f64, in_strength: f64| {
        rate.is_infinite() || out_strength <= rate * in_strength
    };
    let ratio = |out_strength: f64, in_strength: f64| {
        (in_strength > 0.0).then(|| out_strength / in_strength)
    };

    for (i, swing) in input.swings.iter().enumerate().skip(out.from) {
        let d = swing.direction();
        let Some(pos) = input
            .zones
            .partition_point(|z| z.begin + 2 < i)
            .checked_sub(1)
        else {
            continue;
        };
        let Some(zone) = input.zones.get(pos) else {
            continue;
        };
        let settled = zone.confirmed && i <= input.frontier && input.swing_ok(i);
        let extreme = swing.extreme();
        let prior = zone
            .members
            .iter()
            .filter(|&&m| m < i)
            .filter_map(|&m| input.swings.get(m))
            .map(|s| reach(s, d))
            .reduce(|a, b| if beyond(d, a, b) { a } else { b });

        if prior.is_some_and(|p| beyond(d, extreme, p))
            && let Some(entry) = entry_swing(input.swings, zone, d)
        {
            let (s_out, s_in) = (input.strength(config, i), input.strength(config, entry));
            let peak_ok = !config.bs1_peak
                || input
                    .swings
                    .get(entry..i)
                    .is_some_and(|w| w.iter().all(|s| !beyond(d, reach(s, d), extreme)));
            if diverges(s_out, s_in)
                && trend_len(input.zones, pos, d) >= config.min_zs_cnt
                && peak_ok
            {
                let divergence = ratio(s_out, s_in);
                out.emit(input, i, BspType::T1, Some(zone.idx), divergence, settled);
                continue;
            }
        }

        if let Some(prev) = i.checked_sub(2).and_then(|p| input.swings.get(p))
            && beyond(d, extreme, prev.extreme())
        {
            let (s_out, s_prev) = (input.strength(config, i), input.strength(config, i - 2));
            if diverges(s_out, s_prev) {
                let divergence = ratio(s_out, s_prev);
                out.emit(input, i, BspType::T1p, Some(zone.idx), divergence, settled);
            }
        }
    }
}

/// # Summary
/// 从锚点 `j` 出发识别二类点及其后的类二点链。
///
/// # Logic
/// 1. 锚点之后的第一次同向回抽未越过锚点极值即为二类点。
/// 2. 此后每次同向回抽若仍未越过锚点极值、与上一次回抽重叠，且其间反弹未越过锚点后的首个反弹，
///    即为下一级类二点，链长受 `max_bsp2s_lv` 限制。
///
/// # Returns
/// 该锚点之后是否仍可能产生信号：链条在 `settled` 之前的波动上终止，或达到链长上限时返回 `false`。
fn second_class_chain<S: Swing>(
    input: &SignalInput<'_, S>,
    config: &ChanConfig,
    settled: usize,
    (j, anchor_ok): (usize, bool),
    out: &mut Batch,
) -> bool {
    let (Some(anchor), Some(rebound)) = (input.swings.get(j), input.swings.get(j + 1)) else {
        return true;
    };
    let d = anchor.direction();
    let (floor, ceiling) = (anchor.extreme(), rebound.extreme());
    let k = j + 2;
    let Some(retest) = input.swings.get(k) else {
        return true;
    };
    if beyond(d, retest.extreme(), floor) {
        return k >= settled;
    }
    out.emit(input, k, BspType::T2, None, None, anchor_ok && input.swing_ok(k));

    let (mut prev, mut level, mut n) = (k, 1u32, k + 2);
    while config.max_bsp2s_lv.is_none_or(|max| level <= max) {
        let (Some(bounce), Some(next), Some(last)) = (
            input.swings.get(n - 1),
            input.swings.get(n),
            input.swings.get(prev),
        ) else {
            return true;
        };
        if beyond(d, next.extreme(), floor)
            || beyond(d.opposite(), bounce.extreme(), ceiling)
            || !overlap(next, last)
        {
            return n >= settled;
        }
        out.emit(input, n, BspType::T2s, None, None, anchor_ok && input.swing_ok(n));
        prev = n;
        n += 2;
        level += 1;
    }
    false
}

/// # Summary
/// 三类点。
///
/// # Logic
/// 1. `3a`：中枢的离开波动完全处于中枢之外，且方向与突破方向相反 (向上突破后的回调为买点)。
/// 2. `3b`：后一个中枢整体位于前一个中枢之外，后一个中枢中第一段未回到前中枢的回调成员。
/// 3. 开启 `bsp3_follow_1` 时，要求中枢开始前已有同向一类点。
/// 4. 只检查离开波动或后继中枢成员可能落在 `from` 之后的中枢。
fn third_class<S: Swing>(
    input: &SignalInput<'_, S>,
    config: &ChanConfig,
    frozen: &[Earliest; 2],
    out: &mut Batch,
) {
    let mut earliest = *frozen;
    for signal in out.first_classes() {
        earliest[usize::from(signal.is_buy)].mark(signal);
    }
    let follow = |zone: &Zone, is_buy: bool| -> Option<bool> {
        if !config.bsp3_follow_1 {
            return Some(true);
        }
        let side = earliest[usize::from(is_buy)];
        side.any.filter(|&a| a <= zone.begin)?;
        Some(side.confirmed.is_some_and(|c| c <= zone.begin))
    };

    let skip = input
        .zones
        .partition_point(|z| z.end + 1 < out.from)
        .saturating_sub(1);
    let mut found: Vec<(usize, BspType, Option<usize>, bool)> = Vec::new();
    for (pos, zone) in input.zones.iter().enumerate().skip(skip) {
        if let Some(e) = zone.exit
            && let Some(swing) = input.swings.get(e)
        {
            let is_buy = swing.direction() == Direction::Down;
            let outside = if is_buy {
                swing.low() >= zone.high
            } else {
                swing.high() <= zone.low
            };
            if outside && let Some(follow_ok) = follow(zone, is_buy) {
                let confirmed = zone.confirmed && input.swing_ok(e) && follow_ok;
                found.push((e, BspType::T3a, Some(zone.idx), confirmed));
            }
        }

        let Some(next) = input.zones.get(pos + 1) else {
            continue;
        };
        let is_buy = if next.low >= zone.high {
            true
        } else if next.high <= zone.low {
            false
        } else {
            continue;
        };
        let retest = next
            .members
            .iter()
            .copied()
            .filter(|&m| Some(m) != zone.exit)
            .find(|&m| {
                input.swings.get(m).is_some_and(|s| {
                    if is_buy {
                        s.direction() == Direction::Down && s.low() > zone.high
                    } else {
                        s.direction() == Direction::Up && s.high() < zone.low
                    }
                })
            });
        if let Some(m) = retest
            && let Some(follow_ok) = follow(zone, is_buy)
        {
            let confirmed = zone.confirmed && next.confirmed && input.swing_ok(m) && follow_ok;
            found.push((m, BspType::T3b, Some(next.idx), confirmed));
        }
    }

    for (i, kind, zone, confirmed) in found {
        out.emit(input, i, kind, zone, None, confirmed);
    }
}

/// # Summary
/// 单一级别的买卖点簿，增量维护信号序列。
///
/// # Invariants
/// - `signals` 按 (波动下标, 类型, 方向) 排序，只含 `bs_type` 允许的类型。
/// - 波动下标小于 `settled` 的信号永不改变，之后每次只重算其后的尾部。
/// - 增量结果与对同一结构从头识别的结果完全一致。
#[derive(Debug, Clone, Default)]
pub struct SignalBook {
    signals: Vec<Signal>,
    // 稳定边界 (波动下标)
    settled: usize,
    // 稳定部分中每个方向最早的一类点，下标 0 为卖、1 为买
    earliest: [Earliest; 2],
    // 位于稳定部分、类二点链尚未终止的锚点
    anchors: BTreeMap<usize, bool>,
}

impl SignalBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// 下标小于该值的波动上的买卖点已不再变化。
    pub fn settled(&self) -> usize {
        self.settled
    }

    /// # Summary
    /// 结构变化后重算买卖点尾部。
    ///
    /// # Logic
    /// 1. 从上一次的稳定边界开始，依次识别一类、二类、三类点；二类与三类依赖未过滤的一类点。
    /// 2. 二类点锚点：稳定部分中仍可延伸的锚点、新的一类点，以及 (未要求跟随一类点时) 笔级别的线段终点。
    /// 3. 信号确认当且仅当其依赖的波动与中枢均已确认，且依赖 "最近中枢" 的判定位于中枢前沿之内。
    /// 4. 替换旧尾部并按 `bs_type` 过滤，再把新稳定边界之前的一类点与锚点并入稳定部分。
    ///
    /// # Returns
    /// 被替换掉的旧尾部信号。
    pub fn update<S: Swing>(
        &mut self,
        input: &SignalInput<'_, S>,
        config: &ChanConfig,
    ) -> Vec<Signal> {
        let from = self.settled;
        let settled = input.stable_bound(config).max(from);
        let mut out = Batch::new(from);

        first_class(input, config, &mut out);

        let mut anchors = self.anchors.clone();
        for signal in out.first_classes() {
            *anchors.entry(signal.swing).or_insert(false) |= signal.confirmed;
        }
        if !config.bsp2_follow_1 && input.level == ZoneLevel::Stroke {
            let skip = input.segments.partition_point(|s| s.end_stroke < from);
            for segment in input.segments.iter().skip(skip) {
                *anchors.entry(segment.end_stroke).or_insert(false) |= segment.confirmed;
            }
        }
        let mut open = BTreeMap::new();
        for (j, anchor_ok) in anchors {
            if second_class_chain(input, config, settled, (j, anchor_ok), &mut out) && j < settled {
                open.insert(j, anchor_ok);
            }
        }
        self.anchors = open;

        third_class(input, config, &self.earliest, &mut out);

        for signal in out.first_classes().filter(|s| s.swing < settled) {
            self.earliest[usize::from(signal.is_buy)].mark(signal);
        }
        let keep = self.signals.partition_point(|s| s.swing < from);
        let replaced = self.signals.split_off(keep);
        self.signals
            .extend(out.signals.into_values().filter(|s| config.emits(s.kind)));
        self.settled = settled;
        replaced
    }
}

/// # Summary
/// 对一个级别的结构从头识别全部买卖点。
///
/// # Returns
/// 按 (波动下标, 类型, 方向) 排序的信号列表。
pub fn classify<S: Swing>(input: &SignalInput<'_, S>, config: &ChanConfig) -> Vec<Signal> {
    let mut book = SignalBook::new();
    book.update(input, config);
    book.signals
}
