use crate::error::{Error, Result};

/// Reconstructs counter deltas from successive raw readings of a counter that
/// wraps at a fixed bit width.
///
/// A forward step is taken modulo the counter width, so a reading that crossed
/// the maximum representable value still yields the true elapsed count. A step
/// covering more than half of the counter range is indistinguishable from the
/// counter going backwards (e.g. a concurrent reset) and is reported as an
/// anomaly instead; the tracker then re-baselines on the new reading.
#[derive(Clone, Debug)]
pub struct WrapTracker {
    mask: u64,
    last: u64,
}

impl WrapTracker {
    /// Tracker for a counter that was reset to zero.
    pub fn new(width: u8) -> Self {
        Self::starting_at(width, 0)
    }

    pub fn starting_at(width: u8, baseline: u64) -> Self {
        let mask = match width {
            64.. => u64::MAX,
            w => (1_u64 << w) - 1,
        };
        Self {
            mask,
            last: baseline & mask,
        }
    }

    pub fn last(&self) -> u64 {
        self.last
    }

    pub fn delta(&mut self, raw: u64) -> Result<i64> {
        let raw = raw & self.mask;
        let last = std::mem::replace(&mut self.last, raw);
        let diff = raw.wrapping_sub(last) & self.mask;
        if diff > self.mask >> 1 {
            return Err(Error::CounterAnomaly { last, raw });
        }
        Ok(diff as i64)
    }
}
