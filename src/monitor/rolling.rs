use std::collections::VecDeque;

use super::types::Trend;

pub const DEFAULT_WINDOW: usize = 50;

/// Below this many samples a trend is not classified.
pub const MIN_TREND_SAMPLES: usize = 10;

/// Share of the window treated as "recent" when computing a trend, in tenths.
const RECENT_TENTHS: usize = 3;

/// Relative change between recent and older means that counts as movement.
const TREND_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

/// Fixed-size window of recent values.
#[derive(Debug, Clone)]
pub struct RollingStat {
    values: VecDeque<f64>,
    capacity: usize,
    direction: Direction,
}

impl RollingStat {
    pub fn new(capacity: usize, direction: Direction) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
            direction,
        }
    }

    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Mean of the newest 30% against the older 70%.
    pub fn trend(&self) -> Trend {
        let n = self.values.len();
        if n < MIN_TREND_SAMPLES {
            return Trend::InsufficientData;
        }

        let recent_len = ((n * RECENT_TENTHS).div_ceil(10)).clamp(1, n - 1);
        let split = n - recent_len;
        let older = mean_of(self.values.iter().take(split));
        let recent = mean_of(self.values.iter().skip(split));

        let change = if older.abs() < f64::EPSILON {
            if recent.abs() < f64::EPSILON {
                0.0
            } else {
                recent.signum()
            }
        } else {
            (recent - older) / older.abs()
        };

        let rising = change > TREND_THRESHOLD;
        let falling = change < -TREND_THRESHOLD;
        match (self.direction, rising, falling) {
            (Direction::HigherIsBetter, true, _) | (Direction::LowerIsBetter, _, true) => {
                Trend::Improving
            }
            (Direction::HigherIsBetter, _, true) | (Direction::LowerIsBetter, true, _) => {
                Trend::Degrading
            }
            _ => Trend::Stable,
        }
    }
}

fn mean_of<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
