//! Fixed layouts shared with C callers, mirrored by `include/pgos.h`.

use arrayvec::ArrayVec;

use crate::config::{CounterConfig, EventKind, SampleOn, SourceKind, MAX_EVENTS};
use crate::error::{Error, Result};
use crate::profile::{Edge, ProfileEntry, ProfileSnapshot};

pub const PGOS_ABI_VERSION: u32 = 1;

pub const PGOS_OK: i32 = 0;
pub const PGOS_ERR_ENVIRONMENT_UNSUPPORTED: i32 = -1;
pub const PGOS_ERR_PERMISSION_DENIED: i32 = -2;
pub const PGOS_ERR_UNSUPPORTED_EVENT: i32 = -3;
pub const PGOS_ERR_COUNTER_ANOMALY: i32 = -4;
pub const PGOS_ERR_MALFORMED_RECORD: i32 = -5;
pub const PGOS_ERR_BUFFER_OVERFLOW_LOSS: i32 = -6;
pub const PGOS_ERR_INVALID_HANDLE: i32 = -7;
pub const PGOS_ERR_INVALID_CONFIG: i32 = -8;
pub const PGOS_ERR_IO: i32 = -9;
pub const PGOS_ERR_PANIC: i32 = -10;
pub const PGOS_ERR_INVALID_ARGUMENT: i32 = -11;

pub const PGOS_SOURCE_KERNEL: u32 = 0;
pub const PGOS_SOURCE_SYNTHETIC: u32 = 1;

pub fn status_of(err: &Error) -> i32 {
    match err {
        Error::EnvironmentUnsupported(_) => PGOS_ERR_ENVIRONMENT_UNSUPPORTED,
        Error::PermissionDenied(_) => PGOS_ERR_PERMISSION_DENIED,
        Error::UnsupportedEvent(_) => PGOS_ERR_UNSUPPORTED_EVENT,
        Error::CounterAnomaly { .. } => PGOS_ERR_COUNTER_ANOMALY,
        Error::MalformedRecord(_) => PGOS_ERR_MALFORMED_RECORD,
        Error::BufferOverflowLoss(_) => PGOS_ERR_BUFFER_OVERFLOW_LOSS,
        Error::InvalidHandle => PGOS_ERR_INVALID_HANDLE,
        Error::InvalidConfig(_) => PGOS_ERR_INVALID_CONFIG,
        Error::Io(_) => PGOS_ERR_IO,
    }
}

/// `struct pgos_config`.
///
/// Exactly one of `period` and `freq` is non-zero. A `counter_width` of 0
/// means 64 bits.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct PgosConfig {
    pub events: [u32; MAX_EVENTS],
    pub event_count: u32,
    pub source: u32,
    /// Config value of a raw event (code 255).
    pub raw_config: u64,
    pub period: u64,
    pub freq: u64,
    pub buffer_exp: u32,
    pub call_chain_depth: u32,
    pub counter_width: u32,
    pub exclude_kernel: u32,
    pub pid: i32,
    pub cpu: i32,
    /// 0 leaves draining to `pgos_poll`.
    pub drain_interval_ms: u64,
}

const _: () = assert!(size_of::<PgosConfig>() == 80);

macro_rules! narrow {
    ($val:expr, $name:literal) => {
        $val.try_into()
            .map_err(|_| Error::InvalidConfig(format!("{} {} out of range", $name, $val)))?
    };
}

impl TryFrom<&PgosConfig> for CounterConfig {
    type Error = Error;

    fn try_from(raw: &PgosConfig) -> Result<Self> {
        let count = raw.event_count as usize;
        if count > MAX_EVENTS {
            return Err(Error::InvalidConfig(format!(
                "{} events, at most {} are supported",
                count, MAX_EVENTS
            )));
        }
        let events = raw.events[..count]
            .iter()
            .map(|&code| {
                EventKind::from_code(code, raw.raw_config)
                    .ok_or_else(|| Error::InvalidConfig(format!("unknown event code {}", code)))
            })
            .collect::<Result<ArrayVec<_, MAX_EVENTS>>>()?;

        let sample_on = match (raw.period, raw.freq) {
            (n, 0) if n > 0 => SampleOn::Period(n),
            (0, hz) if hz > 0 => SampleOn::Freq(hz),
            _ => {
                return Err(Error::InvalidConfig(
                    "exactly one of period and freq must be set".into(),
                ))
            }
        };
        let source = match raw.source {
            PGOS_SOURCE_KERNEL => SourceKind::Kernel,
            PGOS_SOURCE_SYNTHETIC => SourceKind::Synthetic,
            n => return Err(Error::InvalidConfig(format!("unknown source {}", n))),
        };
        let counter_width: u8 = match raw.counter_width {
            0 => 64,
            n => narrow!(n, "counter width"),
        };

        let config = CounterConfig {
            events,
            sample_on,
            buffer_exp: narrow!(raw.buffer_exp, "buffer_exp"),
            call_chain_depth: narrow!(raw.call_chain_depth, "call chain depth"),
            counter_width,
            pid: raw.pid,
            cpu: raw.cpu,
            exclude_kernel: raw.exclude_kernel != 0,
            source,
            drain_interval: match raw.drain_interval_ms {
                0 => None,
                ms => Some(std::time::Duration::from_millis(ms)),
            },
        };
        config.validate()?;
        Ok(config)
    }
}

/// `struct pgos_sample`, one sample for `pgos_inject`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PgosSample {
    pub ip: u64,
    pub time: u64,
    /// Raw counter reading.
    pub value: u64,
    /// Most recent frame first, may be null when `call_chain_len` is 0.
    pub call_chain: *const u64,
    pub call_chain_len: u64,
    pub pid: u32,
    pub tid: u32,
    /// Event slot in the handle's configuration.
    pub event: u32,
    pub reserved: u32,
}

const _: () = assert!(size_of::<PgosSample>() == 56);

// A snapshot crosses the boundary as one buffer of 8-byte words:
// header, `entry_count` entries, then `edge_count` edges.

/// `struct pgos_snapshot`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PgosSnapshotHeader {
    pub abi_version: u64,
    pub generation: u64,
    pub event_count: u64,
    pub events: [u64; MAX_EVENTS],
    pub totals: [i64; MAX_EVENTS],
    pub entry_count: u64,
    pub edge_count: u64,
    pub samples: u64,
    pub dropped: u64,
    pub malformed: u64,
    pub anomalies: u64,
    /// NaN when the events it needs were not sampled.
    pub cycles_per_instruction: f64,
    pub cache_miss_per_kilo_instruction: f64,
    pub stalls_per_kilo_instruction: f64,
    pub branch_miss_ratio: f64,
}

/// `struct pgos_entry`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PgosEntry {
    pub location: u64,
    pub count: u64,
    pub last_seen: u64,
    pub weight: [i64; MAX_EVENTS],
}

/// `struct pgos_edge`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PgosEdge {
    pub parent: u64,
    pub child: u64,
    pub count: u64,
}

pub const HEADER_WORDS: usize = size_of::<PgosSnapshotHeader>() / 8;
pub const ENTRY_WORDS: usize = size_of::<PgosEntry>() / 8;
pub const EDGE_WORDS: usize = size_of::<PgosEdge>() / 8;

const _: () = assert!(HEADER_WORDS == 21);
const _: () = assert!(ENTRY_WORDS == 7);
const _: () = assert!(EDGE_WORDS == 3);

impl PgosSnapshotHeader {
    fn words(&self) -> [u64; HEADER_WORDS] {
        let mut out = [0; HEADER_WORDS];
        let mut it = out.iter_mut();
        let mut put = |v: u64| {
            if let Some(slot) = it.next() {
                *slot = v;
            }
        };
        put(self.abi_version);
        put(self.generation);
        put(self.event_count);
        self.events.iter().for_each(|&v| put(v));
        self.totals.iter().for_each(|&v| put(v as u64));
        put(self.entry_count);
        put(self.edge_count);
        put(self.samples);
        put(self.dropped);
        put(self.malformed);
        put(self.anomalies);
        put(self.cycles_per_instruction.to_bits());
        put(self.cache_miss_per_kilo_instruction.to_bits());
        put(self.stalls_per_kilo_instruction.to_bits());
        put(self.branch_miss_ratio.to_bits());
        out
    }
}

impl From<&ProfileEntry> for PgosEntry {
    fn from(entry: &ProfileEntry) -> Self {
        Self {
            location: entry.location,
            count: entry.count,
            last_seen: entry.last_seen,
            weight: entry.weight,
        }
    }
}

impl From<&Edge> for PgosEdge {
    fn from(edge: &Edge) -> Self {
        Self {
            parent: edge.parent,
            child: edge.child,
            count: edge.count,
        }
    }
}

/// Lays `snap` out as the word buffer handed to C.
pub fn flatten(snap: &ProfileSnapshot) -> Box<[u64]> {
    let derived = snap.derived();
    let mut events = [0; MAX_EVENTS];
    for (code, event) in events.iter_mut().zip(&snap.events) {
        *code = event.code() as u64;
    }
    let header = PgosSnapshotHeader {
        abi_version: PGOS_ABI_VERSION as _,
        generation: snap.generation,
        event_count: snap.events.len() as _,
        events,
        totals: snap.totals,
        entry_count: snap.entries.len() as _,
        edge_count: snap.edges.len() as _,
        samples: snap.counters.samples,
        dropped: snap.counters.dropped,
        malformed: snap.counters.malformed,
        anomalies: snap.counters.anomalies,
        cycles_per_instruction: derived.cycles_per_instruction.unwrap_or(f64::NAN),
        cache_miss_per_kilo_instruction: derived
            .cache_miss_per_kilo_instruction
            .unwrap_or(f64::NAN),
        stalls_per_kilo_instruction: derived.stalls_per_kilo_instruction.unwrap_or(f64::NAN),
        branch_miss_ratio: derived.branch_miss_ratio.unwrap_or(f64::NAN),
    };

    let len = HEADER_WORDS + snap.entries.len() * ENTRY_WORDS + snap.edges.len() * EDGE_WORDS;
    let mut buf = Vec::with_capacity(len);
    buf.extend(header.words());
    for entry in snap.entries.iter().map(PgosEntry::from) {
        buf.extend([entry.location, entry.count, entry.last_seen]);
        buf.extend(entry.weight.map(|it| it as u64));
    }
    for edge in snap.edges.iter().map(PgosEdge::from) {
        buf.extend([edge.parent, edge.child, edge.count]);
    }
    buf.into_boxed_slice()
}
