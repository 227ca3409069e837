use std::sync::atomic::{AtomicBool, Ordering as MemOrd};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::CounterConfig;
use crate::env::block_signals;
use crate::error::{Error, Result};
use crate::profile::{Aggregator, ProfileSnapshot};
use crate::source::{CounterHandle, SyntheticRing, SyntheticSample};

struct Shared {
    handle: Mutex<CounterHandle>,
    aggregator: Aggregator,
    stop: AtomicBool,
}

impl Shared {
    /// Moves everything currently in the rings into the profile.
    ///
    /// Returns 0 without waiting if another path is draining right now.
    fn drain(&self) -> Result<usize> {
        let mut handle = match self.handle.try_lock() {
            Ok(handle) => handle,
            Err(TryLockError::WouldBlock) => return Ok(0),
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
        };
        let batch = handle.read()?;
        drop(handle);

        if self.stop.load(MemOrd::Acquire) {
            // Closed while reading, these never make it into the profile.
            self.aggregator.note_dropped(batch.discarded());
            return Err(Error::InvalidHandle);
        }

        if !batch.is_empty() {
            log::trace!(
                "drained {} samples, {} lost, {} malformed, {} anomalies",
                batch.samples.len(),
                batch.lost,
                batch.malformed,
                batch.anomalies
            );
        }
        self.aggregator.ingest_batch(&batch);
        Ok(batch.samples.len())
    }

    fn drain_loop(&self, interval: Duration) {
        if let Err(e) = block_signals() {
            log::warn!("drain thread keeps its signal mask: {}", e);
        }
        while !self.stop.load(MemOrd::Acquire) {
            match self.drain() {
                Ok(_) => (),
                Err(Error::InvalidHandle) => break,
                Err(e) => log::warn!("drain failed: {}", e),
            }
            thread::park_timeout(interval);
        }
    }
}

/// One open counter handle together with its profile.
///
/// Samples flow from the source into the aggregator either on
/// [`poll`][Self::poll] or on a background drain thread, depending on
/// [`CounterConfig::drain_interval`]. All methods take `&self` and may be
/// called from any thread.
pub struct Session {
    config: CounterConfig,
    shared: Arc<Shared>,
    rings: Vec<Arc<SyntheticRing>>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn open(config: CounterConfig) -> Result<Self> {
        let handle = CounterHandle::open(config.clone())?;
        let rings = handle.synthetic_rings();
        let shared = Arc::new(Shared {
            aggregator: Aggregator::new(&config.events),
            handle: Mutex::new(handle),
            stop: AtomicBool::new(false),
        });

        let drain = match config.drain_interval {
            Some(interval) => {
                let shared = Arc::clone(&shared);
                let thread = thread::Builder::new()
                    .name("pgos-drain".into())
                    .spawn(move || shared.drain_loop(interval))?;
                Some(thread)
            }
            None => None,
        };

        Ok(Self {
            config,
            shared,
            rings,
            drain: Mutex::new(drain),
        })
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.shared.stop.load(MemOrd::Acquire)
    }

    /// Drains pending samples into the profile, returns how many were ingested.
    pub fn poll(&self) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::InvalidHandle);
        }
        self.shared.drain()
    }

    /// Copies the profile, never touches the counters.
    pub fn snapshot(&self) -> ProfileSnapshot {
        self.shared.aggregator.snapshot()
    }

    pub fn reset(&self) {
        self.shared.aggregator.reset();
    }

    /// Feeds samples to a synthetic source, returns how many were accepted.
    ///
    /// Samples that do not fit are dropped and surface as lost samples on
    /// the next drain.
    pub fn inject(&self, samples: &[SyntheticSample<'_>]) -> Result<usize> {
        if self.is_closed() {
            return Err(Error::InvalidHandle);
        }
        if self.rings.is_empty() {
            return Err(Error::InvalidConfig(
                "samples can only be injected into a synthetic source".into(),
            ));
        }
        if let Some(it) = samples.iter().find(|it| it.event as usize >= self.rings.len()) {
            return Err(Error::InvalidConfig(format!(
                "event slot {} out of {}",
                it.event,
                self.rings.len()
            )));
        }

        let accepted = samples
            .iter()
            .filter(|it| self.rings[it.event as usize].push(it))
            .count();
        Ok(accepted)
    }

    /// Stops draining and releases the counters, safe to call repeatedly.
    pub fn close(&self) {
        if self.shared.stop.swap(true, MemOrd::AcqRel) {
            return;
        }

        let drain = self
            .drain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = drain {
            thread.thread().unpark();
            if thread.join().is_err() {
                log::warn!("drain thread panicked");
            }
        }

        let mut handle = self
            .shared
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Whatever is still in the rings was never read.
        if let Ok(batch) = handle.read() {
            self.shared.aggregator.note_dropped(batch.discarded());
        }
        handle.close();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod test;
