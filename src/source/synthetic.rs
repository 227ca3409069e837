use std::cell::UnsafeCell;
use std::ptr::copy_nonoverlapping;
use std::sync::atomic::{AtomicU64, Ordering as MemOrd};
use std::sync::{Mutex, PoisonError};

use crate::decode::encode;

/// Call-chain frames kept when encoding an injected sample, so that one
/// record always fits in a single page.
pub const MAX_INJECT_FRAMES: usize = 256;

/// A sample handed to a synthetic source.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyntheticSample<'a> {
    /// Slot of the event in the handle's configuration.
    pub event: u8,
    pub ip: u64,
    pub pid: u32,
    pub tid: u32,
    pub time: u64,
    /// Raw counter reading at sample time.
    pub value: u64,
    /// Most recent frame first.
    pub call_chain: &'a [u64],
}

/// Producer side of an in-process ring buffer that behaves like the kernel's.
///
/// Records use the kernel layout. When the ring is full new records are
/// dropped and counted; the count is published as a `PERF_RECORD_LOST` once
/// space is available again, or picked up directly by the consumer.
pub struct SyntheticRing {
    mem: Box<[UnsafeCell<u64>]>,
    size: usize,
    head: AtomicU64,
    tail: AtomicU64,
    lost: AtomicU64,
    sample_type: u64,
    period: u64,
    // Serializes producers, the ring itself is single-producer.
    scratch: Mutex<Vec<u8>>,
}

// Bytes between `tail` and `head` are only read by the consumer, bytes
// outside are only written by the (single, locked) producer.
unsafe impl Send for SyntheticRing {}
unsafe impl Sync for SyntheticRing {}

impl SyntheticRing {
    /// `size` must be a power of two and a multiple of 8.
    pub fn new(size: usize, sample_type: u64, period: u64) -> Self {
        let mem = (0..size / 8).map(|_| UnsafeCell::new(0)).collect();
        Self {
            mem,
            size,
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            sample_type,
            period,
            scratch: Mutex::new(Vec::with_capacity(256)),
        }
    }

    pub fn data(&self) -> (*const u8, usize) {
        (UnsafeCell::raw_get(self.mem.as_ptr()) as *const u8, self.size)
    }

    pub fn head(&self) -> &AtomicU64 {
        &self.head
    }

    pub fn tail(&self) -> &AtomicU64 {
        &self.tail
    }

    /// Takes the records dropped so far that were not yet reported
    /// through a lost record.
    pub fn take_lost(&self) -> u64 {
        self.lost.swap(0, MemOrd::AcqRel)
    }

    /// Writes one sample record, returns false if it was dropped.
    pub fn push(&self, sample: &SyntheticSample<'_>) -> bool {
        let mut scratch = self.scratch.lock().unwrap_or_else(PoisonError::into_inner);
        scratch.clear();

        let frames = &sample.call_chain[..sample.call_chain.len().min(MAX_INJECT_FRAMES)];
        let len = encode::sample_size(self.sample_type, frames.len());

        let head = self.head.load(MemOrd::Relaxed);
        // Acquire pairs with the consumer's release, it is done reading
        // everything before `tail`.
        let tail = self.tail.load(MemOrd::Acquire);
        let free = self.size - head.wrapping_sub(tail) as usize;

        let lost = match self.lost.load(MemOrd::Relaxed) {
            0 if free >= len => 0,
            n if n > 0 && free >= len + encode::LOST_SIZE => self.lost.swap(0, MemOrd::AcqRel),
            _ => {
                self.lost.fetch_add(1, MemOrd::AcqRel);
                return false;
            }
        };
        // The consumer may have taken the count in between, then there is
        // nothing left to report.
        if lost > 0 {
            encode::lost(&mut scratch, 0, lost);
        }
        encode::sample(
            &mut scratch,
            self.sample_type,
            sample.ip,
            (sample.pid, sample.tid),
            sample.time,
            self.period,
            sample.value,
            frames,
        );

        self.write_at(head, &scratch);
        self.head.store(head + scratch.len() as u64, MemOrd::Release);
        true
    }

    fn write_at(&self, pos: u64, bytes: &[u8]) {
        let (data, size) = self.data();
        let data = data as *mut u8;
        let offset = (pos as usize) & (size - 1);
        let hi_len = bytes.len().min(size - offset);
        let lo_len = bytes.len() - hi_len;
        unsafe {
            copy_nonoverlapping(bytes.as_ptr(), data.add(offset), hi_len);
            copy_nonoverlapping(bytes.as_ptr().add(hi_len), data, lo_len);
        }
    }
}
