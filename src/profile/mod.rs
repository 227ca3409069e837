use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as MemOrd};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use arrayvec::ArrayVec;

use crate::config::{EventKind, MAX_EVENTS};
use crate::decode::RawSample;
use crate::source::Batch;

mod snapshot;

pub use snapshot::*;

/// Aggregated state of one code location.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProfileEntry {
    /// The sampled instruction pointer.
    pub location: u64,
    /// Samples attributed to this location.
    pub count: u64,
    /// Summed counter deltas, indexed by event slot.
    pub weight: [i64; MAX_EVENTS],
    /// Timestamp of the most recent sample.
    pub last_seen: u64,
}

#[derive(Default)]
struct Table {
    entries: HashMap<u64, ProfileEntry>,
    // (parent, child) -> count
    edges: HashMap<(u64, u64), u64>,
    totals: [i64; MAX_EVENTS],
    samples: u64,
    dropped: u64,
    malformed: u64,
    anomalies: u64,
}

impl Table {
    fn ingest(&mut self, sample: &RawSample) {
        let entry = self
            .entries
            .entry(sample.ip)
            .or_insert_with(|| ProfileEntry {
                location: sample.ip,
                ..Default::default()
            });
        entry.count += 1;
        entry.last_seen = entry.last_seen.max(sample.time);
        let slot = sample.event as usize;
        if let Some(weight) = entry.weight.get_mut(slot) {
            *weight = weight.saturating_add(sample.delta);
            self.totals[slot] = self.totals[slot].saturating_add(sample.delta);
        }

        // Most recent frame first, so each frame is called by the next one.
        for pair in sample.call_chain.windows(2) {
            *self.edges.entry((pair[1], pair[0])).or_default() += 1;
        }

        self.samples += 1;
        self.dropped += sample.lost;
    }
}

/// Folds decoded samples into a profile keyed by code location.
///
/// Any number of threads may snapshot while one drain path ingests. Each
/// operation holds the table lock once and never across I/O.
pub struct Aggregator {
    events: ArrayVec<EventKind, MAX_EVENTS>,
    table: RwLock<Table>,
    // `generation << 1 | fresh`. `fresh` is set by `reset`: the next snapshot
    // reports the generation `reset` moved to instead of moving again.
    generation: AtomicU64,
}

const FRESH: u64 = 1;

impl Aggregator {
    pub fn new(events: &[EventKind]) -> Self {
        Self {
            events: events.iter().copied().take(MAX_EVENTS).collect(),
            table: RwLock::default(),
            generation: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> &[EventKind] {
        &self.events
    }

    pub fn ingest(&self, sample: &RawSample) {
        self.write().ingest(sample);
    }

    /// Ingests a whole drained batch under a single lock acquisition,
    /// including its loss and fault counters.
    pub fn ingest_batch(&self, batch: &Batch) {
        let mut table = self.write();
        for sample in &batch.samples {
            table.ingest(sample);
        }
        table.dropped += batch.lost;
        table.malformed += batch.malformed;
        table.anomalies += batch.anomalies;
    }

    /// Counts samples that were lost before reaching the profile.
    pub fn note_dropped(&self, n: u64) {
        if n > 0 {
            self.write().dropped += n;
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(MemOrd::Acquire) >> 1
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        let table = self.read();
        // Snapshots race each other under the read lock, so the step and
        // the clearing of `fresh` happen in one update.
        let prev = self
            .generation
            .fetch_update(MemOrd::AcqRel, MemOrd::Acquire, |it| {
                Some(if it & FRESH > 0 { it & !FRESH } else { it + 2 })
            })
            .unwrap_or_else(|it| it);
        let generation = if prev & FRESH > 0 {
            prev >> 1
        } else {
            (prev >> 1) + 1
        };

        let mut entries: Vec<_> = table.entries.values().cloned().collect();
        let mut edges: Vec<_> = table
            .edges
            .iter()
            .map(|(&(parent, child), &count)| Edge {
                parent,
                child,
                count,
            })
            .collect();
        let counters = Counters {
            samples: table.samples,
            dropped: table.dropped,
            malformed: table.malformed,
            anomalies: table.anomalies,
        };
        let totals = table.totals;
        drop(table);

        entries.sort_unstable_by_key(|it| it.location);
        edges.sort_unstable_by_key(|it| (it.parent, it.child));

        ProfileSnapshot {
            generation,
            events: self.events.clone(),
            entries,
            edges,
            totals,
            counters,
        }
    }

    /// Clears every entry and counter and moves to the next generation.
    pub fn reset(&self) {
        let mut table = self.write();
        *table = Table::default();
        // No snapshot runs while the write lock is held.
        let generation = (self.generation.load(MemOrd::Acquire) >> 1) + 1;
        self.generation.store(generation << 1 | FRESH, MemOrd::Release);
        drop(table);
        log::debug!("profile reset, generation {}", generation);
    }
}

#[cfg(test)]
mod test;
