use chan_core::config::SegAlgo;
use chan_core::structure::entity::{Direction, Segment, Stroke};
use chan_core::structure::port::Swing;
use tracing::debug;

/// `a` 是否在 `direction` 方向上越过 `b`。
pub(crate) fn beyond(direction: Direction, a: f64, b: f64) -> bool {
    match direction {
        Direction::Up => a > b,
        Direction::Down => a < b,
    }
}

/// # Summary
/// 特征序列元素：一笔或若干笔合并而成的伪 K 线。
#[derive(Debug, Clone, Copy, PartialEq)]
struct FeatureElement {
    high: f64,
    low: f64,
    // 末笔下标
    last: usize,
    // 提供合并方向极值的那一笔
    peak: usize,
}

/// # Summary
/// 从 `from` 开始每隔一笔取一笔构成特征序列，并按 `direction` 处理包含关系。
///
/// # Logic
/// 向上处理取高高，向下处理取低低；`peak` 记录提供高点 (向上) 或低点 (向下) 的笔。
fn feature_sequence(strokes: &[Stroke], from: usize, direction: Direction) -> Vec<FeatureElement> {
    let mut elements: Vec<FeatureElement> = Vec::new();
    for (k, stroke) in strokes.iter().enumerate().skip(from).step_by(2) {
        let (high, low) = (stroke.high(), stroke.low());
        if let Some(last) = elements.last_mut() {
            let inclusive = (last.high >= high && last.low <= low)
                || (last.high <= high && last.low >= low);
            if inclusive {
                match direction {
                    Direction::Up => {
                        if high > last.high {
                            last.peak = k;
                        }
                        last.high = last.high.max(high);
                        last.low = last.low.max(low);
                    }
                    Direction::Down => {
                        if low < last.low {
                            last.peak = k;
                        }
                        last.high = last.high.min(high);
                        last.low = last.low.min(low);
                    }
                }
                last.last = k;
                continue;
            }
        }
        elements.push(FeatureElement {
            high,
            low,
            last: k,
            peak: k,
        });
    }
    elements
}

/// 特征序列中第 `i` 个元素是否构成 `direction` 方向线段的终结分型 (向上为顶，向下为底)。
fn is_turning(elements: &[FeatureElement], i: usize, direction: Direction) -> bool {
    let (Some(prev), Some(mid), Some(next)) = (
        i.checked_sub(1).and_then(|j| elements.get(j)),
        elements.get(i),
        elements.get(i + 1),
    ) else {
        return false;
    };
    match direction {
        Direction::Up => mid.high > prev.high && mid.high > next.high,
        Direction::Down => mid.low < prev.low && mid.low < next.low,
    }
}

/// 线段结束位置及其是否已确认。
type SegmentEnd = Option<(usize, bool)>;

/// # Summary
/// 线段构造器。
///
/// # Invariants
/// - 已确认线段构成前缀，且永不修改。
/// - 相邻线段方向交替、首尾相接。
/// - 未确认线段之后的线段全部未确认。
#[derive(Debug, Clone)]
pub struct SegmentBuilder {
    algo: SegAlgo,
    segments: Vec<Segment>,
}

impl SegmentBuilder {
    pub fn new(algo: SegAlgo) -> Self {
        Self {
            algo,
            segments: Vec::new(),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// # Summary
    /// 笔序列变化后重算未确认的线段尾部。
    ///
    /// # Logic
    /// 1. 保留已确认的线段前缀。
    /// 2. 从最后一个已确认线段的下一笔开始，按配置算法依次寻找线段终点。
    /// 3. 找不到终点时，若剩余笔数不少于三笔，输出一个以最极端同向笔为终点的未确认线段。
    ///
    /// # Returns
    /// 线段序列是否发生变化。
    pub fn update(&mut self, strokes: &[Stroke]) -> bool {
        let keep = self.segments.iter().take_while(|s| s.confirmed).count();
        let mut rebuilt: Vec<Segment> = self.segments[..keep].to_vec();

        let (mut begin, mut direction) = match rebuilt.last() {
            Some(last) => (last.end_stroke + 1, last.direction.opposite()),
            None => match strokes.first() {
                Some(first) => (0, first.direction),
                None => {
                    let changed = !self.segments.is_empty();
                    self.segments.clear();
                    return changed;
                }
            },
        };
        let mut all_confirmed = true;

        while begin + 2 < strokes.len() {
            let found = match self.algo {
                SegAlgo::Chan => find_end_by_feature(strokes, begin, direction),
                SegAlgo::OnePlusOne => find_end_one_plus_one(strokes, begin, direction),
                SegAlgo::Break => find_end_by_break(strokes, begin, direction),
            };
            let Some((end, confirmed)) = found.or_else(|| tail_end(strokes, begin, direction))
            else {
                break;
            };
            all_confirmed &= confirmed;
            let idx = rebuilt.len();
            if all_confirmed && self.segments.get(idx).is_none_or(|old| !old.confirmed) {
                debug!(idx, ?direction, begin, end, "Segment closed");
            }
            rebuilt.push(make_segment(idx, strokes, begin, end, direction, all_confirmed));
            begin = end + 1;
            direction = direction.opposite();
        }

        let changed = rebuilt != self.segments;
        self.segments = rebuilt;
        changed
    }
}

fn make_segment(
    idx: usize,
    strokes: &[Stroke],
    begin: usize,
    end: usize,
    direction: Direction,
    confirmed: bool,
) -> Segment {
    let first = &strokes[begin];
    let last = &strokes[end];
    Segment {
        idx,
        direction,
        begin_stroke: begin,
        end_stroke: end,
        begin_price: first.begin_price,
        end_price: last.end_price,
        begin_bar: first.begin_bar,
        end_bar: last.end_bar,
        begin_time: first.begin_time,
        end_time: last.end_time,
        confirmed,
    }
}

/// # Summary
/// 尚未被破坏的线段尾部：取 `begin + 2` 之后最极端的同向笔为终点。
fn tail_end(strokes: &[Stroke], begin: usize, direction: Direction) -> SegmentEnd {
    let origin = strokes.get(begin)?.begin_price;
    let mut best: Option<usize> = None;
    for j in (begin + 2..strokes.len()).step_by(2) {
        if best.is_none_or(|b| beyond(direction, strokes[j].end_price, strokes[b].end_price)) {
            best = Some(j);
        }
    }
    let end = best?;
    beyond(direction, strokes[end].end_price, origin).then_some((end, false))
}

/// # Summary
/// 特征序列分型破坏法。
///
/// # Logic
/// 1. 以反向笔构造特征序列，按线段方向处理包含。
/// 2. 自左向右寻找第一个终结分型 (向上线段找顶，向下线段找底)，分型顶点前一笔即线段终点。
/// 3. 第一、二元素间无缺口：分型第三元素之后的同向笔 (守卫笔) 不创新高/新低即成立，
///    守卫笔已确认时线段确认；守卫笔越过顶点则放弃该分型继续寻找。
/// 4. 有缺口：顶点之后的新线段特征序列须先出现反向分型，且在此之前不能越过顶点。
fn find_end_by_feature(strokes: &[Stroke], begin: usize, direction: Direction) -> SegmentEnd {
    let origin = strokes.get(begin)?.begin_price;
    let elements = feature_sequence(strokes, begin + 1, direction);

    for i in 1..elements.len() {
        if !is_turning(&elements, i, direction) {
            continue;
        }
        let (prev, mid, next) = (elements[i - 1], elements[i], elements[i + 1]);
        let peak = mid.peak.checked_sub(1)?;
        let peak_price = strokes[peak].end_price;
        if peak < begin + 2 || !beyond(direction, peak_price, origin) {
            continue;
        }

        let gap = match direction {
            Direction::Up => prev.high < mid.low,
            Direction::Down => prev.low > mid.high,
        };
        if !gap {
            let guard = next.last + 1;
            match strokes.get(guard) {
                None => return Some((peak, false)),
                Some(g) if beyond(direction, g.end_price, peak_price) => continue,
                Some(g) => return Some((peak, g.confirmed)),
            }
        }

        match confirm_gap_break(strokes, peak, direction) {
            GapOutcome::Confirmed(confirmed) => return Some((peak, confirmed)),
            GapOutcome::Cancelled => continue,
            GapOutcome::Pending => return None,
        }
    }
    None
}

enum GapOutcome {
    Confirmed(bool),
    Cancelled,
    Pending,
}

/// # Summary
/// 有缺口时的第二种破坏：顶点之后反向线段的特征序列必须出现分型。
fn confirm_gap_break(strokes: &[Stroke], peak: usize, direction: Direction) -> GapOutcome {
    let peak_price = strokes[peak].end_price;
    let reverse = direction.opposite();
    // 第一个越过顶点的同向笔，之后的笔不再参与
    let limit = (peak + 2..strokes.len())
        .step_by(2)
        .find(|&k| beyond(direction, strokes[k].end_price, peak_price))
        .unwrap_or(strokes.len());
    let Some(within) = strokes.get(..limit) else {
        return GapOutcome::Pending;
    };
    let elements = feature_sequence(within, peak + 2, reverse);
    match (1..elements.len()).find(|&j| is_turning(&elements, j, reverse)) {
        Some(j) => {
            let last = elements[j + 1].last;
            GapOutcome::Confirmed(strokes[last].confirmed)
        }
        None if limit < strokes.len() => GapOutcome::Cancelled,
        None => GapOutcome::Pending,
    }
}

/// # Summary
/// "1+1" 线段：顶点之后一个更低的高点加一个更低的低点即成段，无需特征序列。
///
/// # Logic
/// 对每个刷新线段极值的同向笔 `p`：`p+2` 不越过顶点，且 `p+3` 越过 `p+1` 的终点，
/// 则线段在 `p` 结束，`p+3` 确认时线段确认。
fn find_end_one_plus_one(strokes: &[Stroke], begin: usize, direction: Direction) -> SegmentEnd {
    let reverse = direction.opposite();
    let mut extreme = strokes.get(begin)?.end_price;
    for p in (begin + 2..strokes.len()).step_by(2) {
        let peak_price = strokes[p].end_price;
        if !beyond(direction, peak_price, extreme) {
            continue;
        }
        extreme = peak_price;
        let (Some(first), Some(middle), Some(second)) =
            (strokes.get(p + 1), strokes.get(p + 2), strokes.get(p + 3))
        else {
            return None;
        };
        if !beyond(direction, middle.end_price, peak_price)
            && beyond(reverse, second.end_price, first.end_price)
        {
            return Some((p, second.confirmed));
        }
    }
    None
}

/// # Summary
/// 破坏法：顶点之后某一反向笔跌破 (升破) 顶点所在笔的起点即成段。
///
/// # Logic
/// 破坏笔之后的同向笔不越过顶点时成立，该笔确认时线段确认；越过则以其为新顶点继续。
fn find_end_by_break(strokes: &[Stroke], begin: usize, direction: Direction) -> SegmentEnd {
    let reverse = direction.opposite();
    let mut extreme = strokes.get(begin)?.end_price;
    for p in (begin + 2..strokes.len()).step_by(2) {
        let peak_price = strokes[p].end_price;
        if !beyond(direction, peak_price, extreme) {
            continue;
        }
        extreme = peak_price;
        let threshold = strokes[p].begin_price;
        let mut q = p + 1;
        while let Some(candidate) = strokes.get(q) {
            let guard = strokes.get(q + 1);
            if beyond(reverse, candidate.end_price, threshold) {
                match guard {
                    None => return Some((p, false)),
                    Some(g) if !beyond(direction, g.end_price, peak_price) => {
                        return Some((p, g.confirmed));
                    }
                    Some(_) => break,
                }
            }
            if guard.is_some_and(|g| beyond(direction, g.end_price, peak_price)) {
                break;
            }
            q += 2;
        }
    }
    None
}
