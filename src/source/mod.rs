use std::fs::File;
use std::mem;
use std::sync::Arc;

use arena::Arena;
use rb::Rb;

use crate::config::{attr, CounterConfig, EventKind, SampleOn, SourceKind};
use crate::decode::{Decoder, RawSample, Record};
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::ffi::syscall::{ioctl, perf_event_open};
use crate::ffi::{bindings as b, PAGE_SIZE};

mod arena;
mod rb;
mod synthetic;

pub use synthetic::{SyntheticRing, SyntheticSample, MAX_INJECT_FRAMES};

/// Everything drained by one [`CounterHandle::read`].
#[derive(Debug, Default)]
pub struct Batch {
    /// Decoded samples; the first sample of a stream after a gap in that
    /// stream carries the lost count.
    pub samples: Vec<RawSample>,
    /// Lost records not attached to any sample of this batch.
    pub lost: u64,
    /// Records skipped because they could not be decoded.
    pub malformed: u64,
    /// Samples skipped because of an implausible counter jump.
    pub anomalies: u64,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty() && self.lost == 0 && self.malformed == 0 && self.anomalies == 0
    }

    /// Samples this batch stands for when it is thrown away unread: the
    /// decoded ones plus every loss they or the batch carry.
    pub fn discarded(&self) -> u64 {
        let tagged: u64 = self.samples.iter().map(|it| it.lost).sum();
        self.samples.len() as u64 + tagged + self.lost
    }
}

enum Backing {
    Kernel { perf: File, arena: Arena },
    Synthetic(Arc<SyntheticRing>),
}

impl Backing {
    fn rb(&self) -> Rb<'_> {
        match self {
            // Both regions stay mapped for as long as `self` is borrowed.
            Backing::Kernel { arena, .. } => {
                let (ptr, len) = arena.data();
                unsafe { Rb::new(ptr, len, arena.head(), arena.tail()) }
            }
            Backing::Synthetic(ring) => {
                let (ptr, len) = ring.data();
                unsafe { Rb::new(ptr, len, ring.head(), ring.tail()) }
            }
        }
    }
}

struct Stream {
    event: EventKind,
    backing: Backing,
    decoder: Decoder,
    scratch: Vec<u8>,
}

/// One open sampling session: a counter and ring buffer per configured event.
///
/// Owns the kernel resources until [closed][Self::close] or dropped, and is
/// never read after close.
pub struct CounterHandle {
    config: CounterConfig,
    streams: Vec<Stream>,
    closed: bool,
}

impl CounterHandle {
    /// Opens counters for every event in `config`.
    ///
    /// Kernel sources check the host environment first, so insufficient
    /// privileges surface as [`Error::PermissionDenied`] and missing PMU
    /// support as [`Error::UnsupportedEvent`] before any sample is taken.
    pub fn open(config: CounterConfig) -> Result<Self> {
        config.validate()?;

        let data_len = (1_usize << config.buffer_exp) * *PAGE_SIZE;
        let mut streams = Vec::with_capacity(config.events.len());

        match config.source {
            SourceKind::Kernel => {
                Environment::probe()?.check(&config)?;

                for (slot, event) in config.events.iter().enumerate() {
                    let attr = attr::from(*event, &config);
                    let flags = b::PERF_FLAG_FD_CLOEXEC as _;
                    let perf = perf_event_open(&attr, config.pid, config.cpu, -1, flags)
                        .map_err(|e| Error::from_open_errno(e, *event))?;
                    // 1 metadata page + 2^exp data pages.
                    let arena = Arena::new(&perf, data_len + *PAGE_SIZE, 0)?;
                    streams.push(Stream {
                        event: *event,
                        backing: Backing::Kernel { perf, arena },
                        decoder: Decoder::new(slot as _, &config),
                        scratch: Vec::with_capacity(256),
                    });
                }

                // Enable only once every ring is mapped.
                for stream in &streams {
                    if let Backing::Kernel { perf, .. } = &stream.backing {
                        ioctl(perf, b::perf_event_ioctls_RESET)?;
                        ioctl(perf, b::perf_event_ioctls_ENABLE)?;
                    }
                }
            }
            SourceKind::Synthetic => {
                let period = match config.sample_on {
                    SampleOn::Period(n) => n,
                    SampleOn::Freq(_) => 0,
                };
                for (slot, event) in config.events.iter().enumerate() {
                    let decoder = Decoder::new(slot as _, &config);
                    let ring = SyntheticRing::new(data_len, decoder.sample_type(), period);
                    streams.push(Stream {
                        event: *event,
                        backing: Backing::Synthetic(Arc::new(ring)),
                        decoder,
                        scratch: Vec::with_capacity(256),
                    });
                }
            }
        }

        log::debug!(
            "opened {:?} counters for {:?} ({} bytes per ring)",
            config.source,
            config.events,
            data_len
        );

        Ok(Self {
            config,
            streams,
            closed: false,
        })
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Producer ends of a synthetic source, indexed by event slot.
    pub fn synthetic_rings(&self) -> Vec<Arc<SyntheticRing>> {
        self.streams
            .iter()
            .filter_map(|it| match &it.backing {
                Backing::Synthetic(ring) => Some(Arc::clone(ring)),
                Backing::Kernel { .. } => None,
            })
            .collect()
    }

    /// Drains every record currently available, never blocks.
    pub fn read(&mut self) -> Result<Batch> {
        if self.closed {
            return Err(Error::InvalidHandle);
        }

        let mut batch = Batch::default();
        for stream in &mut self.streams {
            // Loss only ever tags a sample of the stream that lost it.
            let mut pending_lost = 0;
            let rb = stream.backing.rb();
            while let Some(popped) = rb.pop(&mut stream.scratch) {
                let decoded = popped.and_then(|()| stream.decoder.decode(&stream.scratch));
                match decoded {
                    Ok(Record::Sample(mut sample)) => {
                        sample.lost = mem::take(&mut pending_lost);
                        batch.samples.push(sample);
                    }
                    Ok(Record::Lost(n)) => pending_lost += n,
                    Ok(Record::Other(_)) => (),
                    Err(Error::CounterAnomaly { last, raw }) => {
                        log::warn!("{:?} counter jumped from {} to {}", stream.event, last, raw);
                        batch.anomalies += 1;
                    }
                    Err(e) => {
                        log::warn!("skipping {:?} record: {}", stream.event, e);
                        batch.malformed += 1;
                    }
                }
            }

            if let Backing::Synthetic(ring) = &stream.backing {
                pending_lost += ring.take_lost();
            }
            batch.lost += pending_lost;
        }

        if batch.lost > 0 {
            log::warn!("{}", Error::BufferOverflowLoss(batch.lost));
        }

        Ok(batch)
    }

    /// Stops the counters and releases the rings, safe to call repeatedly.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for stream in self.streams.drain(..) {
            if let Backing::Kernel { perf, .. } = &stream.backing {
                if let Err(e) = ioctl(perf, b::perf_event_ioctls_DISABLE) {
                    log::debug!("disabling {:?} counter: {}", stream.event, e);
                }
            }
        }
        log::debug!("closed counters for {:?}", self.config.events);
    }
}

impl Drop for CounterHandle {
    fn drop(&mut self) {
        self.close();
    }
}
