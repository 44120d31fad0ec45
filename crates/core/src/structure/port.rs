use crate::structure::entity::{Direction, Segment, Stroke};
use chrono::{DateTime, Utc};

/// # Summary
/// 波动行为契约：笔与线段的共同抽象，中枢与买卖点构造只依赖该 trait。
///
/// # Invariants
/// - `begin_price` 与 `end_price` 的相对位置与 `direction` 一致。
pub trait Swing {
    fn direction(&self) -> Direction;

    fn begin_price(&self) -> f64;

    fn end_price(&self) -> f64;

    /// 覆盖的起止原始 K 线下标，用于动量度量与跨级别定位。
    fn begin_bar(&self) -> usize;

    fn end_bar(&self) -> usize;

    fn begin_time(&self) -> DateTime<Utc>;

    fn end_time(&self) -> DateTime<Utc>;

    fn is_confirmed(&self) -> bool;

    fn high(&self) -> f64 {
        self.begin_price().max(self.end_price())
    }

    fn low(&self) -> f64 {
        self.begin_price().min(self.end_price())
    }

    /// # Summary
    /// 该波动朝自身方向到达的极值：向上取最高点，向下取最低点。
    fn extreme(&self) -> f64 {
        match self.direction() {
            Direction::Up => self.high(),
            Direction::Down => self.low(),
        }
    }
}

impl Swing for Stroke {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn begin_price(&self) -> f64 {
        self.begin_price
    }

    fn end_price(&self) -> f64 {
        self.end_price
    }

    fn begin_bar(&self) -> usize {
        self.begin_bar
    }

    fn end_bar(&self) -> usize {
        self.end_bar
    }

    fn begin_time(&self) -> DateTime<Utc> {
        self.begin_time
    }

    fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    fn is_confirmed(&self) -> bool {
        self.confirmed
    }
}

impl Swing for Segment {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn begin_price(&self) -> f64 {
        self.begin_price
    }

    fn end_price(&self) -> f64 {
        self.end_price
    }

    fn begin_bar(&self) -> usize {
        self.begin_bar
    }

    fn end_bar(&self) -> usize {
        self.end_bar
    }

    fn begin_time(&self) -> DateTime<Utc> {
        self.begin_time
    }

    fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    fn is_confirmed(&self) -> bool {
        self.confirmed
    }
}
