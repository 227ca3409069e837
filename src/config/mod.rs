use std::collections::HashSet;
use std::time::Duration;

use arrayvec::ArrayVec;

use crate::error::{Error, Result};

pub(crate) mod attr;
mod event;

pub use event::*;

/// Maximum number of events sampled by one handle.
pub const MAX_EVENTS: usize = 4;
/// Maximum number of call-chain entries kept per sample.
pub const MAX_CALL_CHAIN: usize = 64;
/// Largest ring buffer: 2^16 data pages.
pub const MAX_BUFFER_EXP: u8 = 16;

macro_rules! invalid {
    ($bool:expr, $($msg:tt)+) => {
        if $bool {
            return Err(Error::InvalidConfig(format!($($msg)+)));
        }
    };
}

/// Sampling configuration of a [counter handle][crate::source::CounterHandle].
///
/// Validated once at open time and immutable afterwards.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CounterConfig {
    /// Events to sample, each gets its own counter and ring buffer.
    ///
    /// The position of an event in this list is its slot in
    /// [`ProfileEntry::weight`][crate::profile::ProfileEntry::weight].
    pub events: ArrayVec<EventKind, MAX_EVENTS>,
    pub sample_on: SampleOn,
    /// The ring buffer holds 2^`buffer_exp` pages of records.
    pub buffer_exp: u8,
    /// Call-chain entries kept per sample, 0 disables call chains.
    pub call_chain_depth: u16,
    /// Width in bits at which raw counter values wrap.
    pub counter_width: u8,
    /// Process to observe, 0 is the calling process and -1 is every process.
    pub pid: i32,
    /// CPU to observe, -1 is any CPU.
    pub cpu: i32,
    /// Count only user space, this is what unprivileged processes may do.
    pub exclude_kernel: bool,
    pub source: SourceKind,
    /// Start a background drain thread waking up at this interval.
    ///
    /// Without it samples are only drained by explicit polls.
    pub drain_interval: Option<Duration>,
}

impl Default for CounterConfig {
    fn default() -> Self {
        let mut events = ArrayVec::new();
        events.push(EventKind::Cycles);
        Self {
            events,
            sample_on: SampleOn::Period(1_000_000),
            buffer_exp: 8,
            call_chain_depth: 0,
            counter_width: 64,
            pid: 0,
            cpu: -1,
            exclude_kernel: true,
            source: SourceKind::Kernel,
            drain_interval: None,
        }
    }
}

impl CounterConfig {
    pub fn validate(&self) -> Result<()> {
        invalid!(self.events.is_empty(), "no events");
        let mut seen = HashSet::new();
        for ev in &self.events {
            invalid!(!seen.insert(ev), "duplicate event {:?}", ev);
        }

        match self.sample_on {
            SampleOn::Period(0) => invalid!(true, "sample period must be non-zero"),
            SampleOn::Freq(0) => invalid!(true, "sample frequency must be non-zero"),
            _ => (),
        }

        invalid!(
            self.buffer_exp > MAX_BUFFER_EXP,
            "buffer_exp {} exceeds {}",
            self.buffer_exp,
            MAX_BUFFER_EXP
        );
        invalid!(
            self.call_chain_depth as usize > MAX_CALL_CHAIN,
            "call chain depth {} exceeds {}",
            self.call_chain_depth,
            MAX_CALL_CHAIN
        );
        invalid!(
            !(8..=64).contains(&self.counter_width),
            "counter width {} outside 8..=64",
            self.counter_width
        );
        invalid!(self.pid < -1, "invalid pid {}", self.pid);
        invalid!(self.cpu < -1, "invalid cpu {}", self.cpu);
        // https://github.com/torvalds/linux/blob/v6.13/kernel/events/core.c#L12876
        invalid!(
            self.pid == -1 && self.cpu == -1,
            "every process on every CPU is not a valid target"
        );
        invalid!(
            self.drain_interval.is_some_and(|it| it.is_zero()),
            "drain interval must be non-zero"
        );

        Ok(())
    }

    /// Mask applied to raw counter values.
    pub fn counter_mask(&self) -> u64 {
        match self.counter_width {
            64 => u64::MAX,
            w => (1_u64 << w) - 1,
        }
    }

    /// Slot of `event` in this configuration.
    pub fn slot_of(&self, event: EventKind) -> Option<usize> {
        self.events.iter().position(|it| *it == event)
    }
}

/// Controls when a sample is generated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SampleOn {
    /// Every `n` events.
    Period(u64),
    /// Roughly `n` samples per second, the kernel adjusts the period.
    Freq(u64),
}

/// Where samples come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SourceKind {
    /// `perf_event_open` counters with kernel ring buffers.
    #[default]
    Kernel,
    /// In-process ring buffers fed by [`inject`][crate::session::Session::inject],
    /// using the same record format as the kernel.
    Synthetic,
}

#[cfg(test)]
mod test;
