use chan_core::config::{ChanConfig, ZsAlgo};
use chan_core::structure::entity::{Segment, Zone, ZoneLevel};
use chan_core::structure::port::Swing;
use tracing::debug;

/// # Summary
/// 扫描阶段的中枢草稿。
#[derive(Debug, Clone, PartialEq)]
struct Draft {
    members: Vec<usize>,
    low: f64,
    high: f64,
    // 离开中枢的波动
    exit: Option<usize>,
    // 使中枢闭合的波动：normal 下即离开波动，over_seg 下为其后一段
    closer: Option<usize>,
    // 下一次搜索的起点
    resume: usize,
}

/// # Summary
/// 中枢搜索的分组区间 `[start, end)`。
#[derive(Debug, Clone, Copy)]
struct Group {
    start: usize,
    end: usize,
    // 分组边界已固定 (对应线段已确认)
    settled: bool,
    // 线段的第一笔与线段同向，中枢从第二笔开始
    skip_first: bool,
}

fn overlap_bounds<S: Swing>(swings: &[S]) -> Option<(f64, f64)> {
    let low = swings.iter().map(Swing::low).fold(f64::MIN, f64::max);
    let high = swings.iter().map(Swing::high).fold(f64::MAX, f64::min);
    (!swings.is_empty() && low < high).then_some((low, high))
}

/// # Summary
/// 在 `[start, end)` 内顺序寻找中枢。
///
/// # Logic
/// 1. 连续三段波动区间的交集为正时开启中枢，边界取交集。
/// 2. 对之后的每段波动先做离开检查，再做延伸检查：
///    - 完全位于边界之外 (含贴边) 视为离开；`Normal` 立即闭合，`OverSeg` 需下一段仍在外部才闭合，
///      若下一段重新进入，则离开的那段视为区间外的游离波动；
///    - 与边界正向重叠则成为成员，边界收缩为交集。
/// 3. 闭合后从离开波动处继续搜索下一个中枢。
fn scan<S: Swing>(swings: &[S], start: usize, end: usize, algo: ZsAlgo) -> Vec<Draft> {
    let mut drafts = Vec::new();
    let mut i = start;
    while i + 2 < end {
        let Some((mut low, mut high)) = swings.get(i..i + 3).and_then(overlap_bounds) else {
            i += 1;
            continue;
        };
        let mut members = vec![i, i + 1, i + 2];
        let (mut exit, mut closer, mut pending) = (None, None, None);

        for (j, swing) in swings.iter().enumerate().take(end).skip(i + 3) {
            if swing.low() >= high || swing.high() <= low {
                match (algo, pending) {
                    (ZsAlgo::OverSeg, None) => {
                        pending = Some(j);
                        continue;
                    }
                    (ZsAlgo::OverSeg, Some(p)) => {
                        exit = Some(p);
                        closer = Some(j);
                    }
                    _ => {
                        exit = Some(j);
                        closer = Some(j);
                    }
                }
                break;
            }
            pending = None;
            low = low.max(swing.low());
            high = high.min(swing.high());
            members.push(j);
        }

        let resume = exit.unwrap_or(end);
        drafts.push(Draft {
            members,
            low,
            high,
            exit,
            closer,
            resume,
        });
        i = resume;
    }
    drafts
}

/// # Summary
/// 合并相邻且边界仍然重叠的中枢。
fn combine(drafts: Vec<Draft>) -> Vec<Draft> {
    let mut merged: Vec<Draft> = Vec::with_capacity(drafts.len());
    for draft in drafts {
        if let Some(prev) = merged.last_mut()
            && prev.low.max(draft.low) < prev.high.min(draft.high)
        {
            prev.low = prev.low.max(draft.low);
            prev.high = prev.high.min(draft.high);
            prev.members.extend(draft.members);
            prev.exit = draft.exit;
            prev.closer = draft.closer;
            prev.resume = draft.resume;
            continue;
        }
        merged.push(draft);
    }
    merged
}

/// # Summary
/// 中枢构造器，对笔或线段序列通用。
///
/// # Invariants
/// - 已确认中枢构成前缀，且永不修改。
/// - 中枢边界恒为成员波动区间的交集。
#[derive(Debug, Clone)]
pub struct ZoneBuilder {
    level: ZoneLevel,
    algo: ZsAlgo,
    combine: bool,
    zones: Vec<Zone>,
    // 最后一个已确认中枢之后的搜索起点
    frontier: usize,
}

impl ZoneBuilder {
    pub fn new(level: ZoneLevel, algo: ZsAlgo, combine: bool) -> Self {
        Self {
            level,
            algo: algo.resolve(level),
            combine,
            zones: Vec::new(),
            frontier: 0,
        }
    }

    pub fn from_config(config: &ChanConfig) -> Self {
        Self::new(config.zs_level, config.zs_algo, config.zs_combine)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn level(&self) -> ZoneLevel {
        self.level
    }

    /// 最后一个已确认中枢之后的搜索起点 (波动下标)。
    pub fn frontier(&self) -> usize {
        self.frontier
    }

    /// 笔级别的 normal 中枢不跨越线段边界。
    fn grouped(&self) -> bool {
        self.level == ZoneLevel::Stroke && self.algo == ZsAlgo::Normal
    }

    fn groups(&self, len: usize, segments: &[Segment]) -> Vec<Group> {
        if !self.grouped() {
            return vec![Group {
                start: 0,
                end: len,
                settled: false,
                skip_first: false,
            }];
        }
        let mut groups: Vec<Group> = segments
            .iter()
            .map(|s| Group {
                start: s.begin_stroke,
                end: (s.end_stroke + 1).min(len),
                settled: s.confirmed,
                skip_first: true,
            })
            .collect();
        let covered = segments.last().map_or(0, |s| s.end_stroke + 1);
        if covered < len {
            groups.push(Group {
                start: covered,
                end: len,
                settled: false,
                skip_first: !segments.is_empty(),
            });
        }
        groups
    }

    /// # Summary
    /// 波动序列变化后重算未确认的中枢尾部。
    ///
    /// # Logic
    /// 1. 保留已确认中枢，从 `frontier` 开始按分组重新扫描；分组模式下跳过每个线段的第一笔。
    /// 2. 开启合并时先合并相邻重叠中枢。
    /// 3. 确认条件：
    ///    - 分组模式：所在线段已确认，成员与闭合波动均已确认；
    ///    - 非分组模式：成员与闭合波动均已确认；开启合并时还要求下一个中枢已在已确认波动上开启。
    /// 4. 一旦出现未确认中枢，其后全部未确认。
    ///
    /// # Arguments
    /// * `swings`: 笔或线段序列，与构造时的级别一致。
    /// * `segments`: 线段序列，仅在笔级别 normal 模式下用于分组。
    ///
    /// # Returns
    /// 中枢序列是否发生变化。
    pub fn update<S: Swing>(&mut self, swings: &[S], segments: &[Segment]) -> bool {
        let keep = self.zones.iter().take_while(|z| z.confirmed).count();
        let mut zones: Vec<Zone> = self.zones[..keep].to_vec();
        let mut frontier = if keep == 0 { 0 } else { self.frontier };
        let confirmed_at = |i: usize| swings.get(i).is_some_and(Swing::is_confirmed);

        let mut all_confirmed = true;
        for group in self.groups(swings.len(), segments) {
            if group.end <= frontier {
                continue;
            }
            let start = if frontier > group.start {
                frontier
            } else {
                group.start + usize::from(group.skip_first)
            };
            let mut drafts = scan(swings, start, group.end, self.algo);
            if self.combine {
                drafts = combine(drafts);
            }
            for (k, draft) in drafts.iter().enumerate() {
                let members_ok = draft.members.iter().all(|&m| confirmed_at(m));
                let settled = if self.grouped() {
                    group.settled && members_ok && draft.closer.is_none_or(confirmed_at)
                } else {
                    let next_ok = !self.combine
                        || drafts
                            .get(k + 1)
                            .is_some_and(|n| n.members.iter().take(3).all(|&m| confirmed_at(m)));
                    members_ok && draft.closer.is_some_and(confirmed_at) && next_ok
                };
                all_confirmed &= settled;
                if all_confirmed {
                    frontier = draft.resume;
                }
                let idx = zones.len();
                zones.push(self.build_zone(idx, draft, swings, all_confirmed));
            }
        }

        for zone in zones.iter().skip(keep).filter(|z| z.confirmed) {
            debug!(idx = zone.idx, low = zone.low, high = zone.high, "Zone confirmed");
        }
        self.frontier = frontier;
        let changed = zones != self.zones;
        self.zones = zones;
        changed
    }

    fn build_zone<S: Swing>(
        &self,
        idx: usize,
        draft: &Draft,
        swings: &[S],
        confirmed: bool,
    ) -> Zone {
        let begin = draft.members.first().copied().unwrap_or_default();
        let end = draft.members.last().copied().unwrap_or(begin);
        let member_swings = || draft.members.iter().filter_map(|&m| swings.get(m));
        Zone {
            idx,
            level: self.level,
            begin,
            end,
            members: draft.members.clone(),
            low: draft.low,
            high: draft.high,
            peak_low: member_swings().map(Swing::low).fold(f64::MAX, f64::min),
            peak_high: member_swings().map(Swing::high).fold(f64::MIN, f64::max),
            begin_time: swings.get(begin).map(Swing::begin_time).unwrap_or_default(),
            end_time: swings.get(end).map(Swing::end_time).unwrap_or_default(),
            exit: draft.exit,
            confirmed,
            extended: draft.members.len() > 3,
        }
    }
}
