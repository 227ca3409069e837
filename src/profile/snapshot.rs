use arrayvec::ArrayVec;

use super::ProfileEntry;
use crate::config::{EventKind, MAX_EVENTS};

/// Number of times `parent` was seen calling `child`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Edge {
    pub parent: u64,
    pub child: u64,
    pub count: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Counters {
    /// Samples ingested, lost-tagged ones included.
    pub samples: u64,
    /// Samples lost to ring overflow or cancellation.
    pub dropped: u64,
    /// Records skipped as undecodable.
    pub malformed: u64,
    /// Samples skipped because of an implausible counter jump.
    pub anomalies: u64,
}

/// Ratios computed from the event totals of a snapshot.
///
/// A metric is `None` unless every event it needs was sampled and its
/// denominator is non-zero.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DerivedMetrics {
    /// Cycles per instruction.
    pub cycles_per_instruction: Option<f64>,
    /// Cache misses per 1000 instructions.
    pub cache_miss_per_kilo_instruction: Option<f64>,
    /// Backend stall cycles per 1000 instructions.
    pub stalls_per_kilo_instruction: Option<f64>,
    /// Mispredicted branches over executed branches.
    pub branch_miss_ratio: Option<f64>,
}

/// A point-in-time copy of the profile.
///
/// Entries are sorted by location and edges by `(parent, child)`, so equal
/// profiles compare equal.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProfileSnapshot {
    pub generation: u64,
    /// Event of each weight slot.
    pub events: ArrayVec<EventKind, MAX_EVENTS>,
    pub entries: Vec<ProfileEntry>,
    pub edges: Vec<Edge>,
    /// Summed weight of every entry, per slot.
    pub totals: [i64; MAX_EVENTS],
    pub counters: Counters,
}

impl ProfileSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.edges.is_empty()
    }

    /// Sum of the sample counts of all entries.
    pub fn total_count(&self) -> u64 {
        self.entries.iter().map(|it| it.count).sum()
    }

    pub fn entry(&self, location: u64) -> Option<&ProfileEntry> {
        self.entries
            .binary_search_by_key(&location, |it| it.location)
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Total weight of `event`, `None` if it was not sampled.
    pub fn total_of(&self, event: EventKind) -> Option<i64> {
        let slot = self.events.iter().position(|it| *it == event)?;
        Some(self.totals[slot])
    }

    pub fn derived(&self) -> DerivedMetrics {
        let ratio = |num: EventKind, den: EventKind, scale: f64| {
            let num = self.total_of(num)?;
            match self.total_of(den)? {
                0 => None,
                den => Some(num as f64 * scale / den as f64),
            }
        };

        use EventKind::*;
        DerivedMetrics {
            cycles_per_instruction: ratio(Cycles, Instructions, 1.0),
            cache_miss_per_kilo_instruction: ratio(CacheMisses, Instructions, 1000.0),
            stalls_per_kilo_instruction: ratio(StalledCyclesBackend, Instructions, 1000.0),
            branch_miss_ratio: ratio(BranchMisses, BranchInstructions, 1.0),
        }
    }
}
