use std::marker::PhantomData;
use std::ptr::copy_nonoverlapping;
use std::sync::atomic::{AtomicU64, Ordering as MemOrd};

use crate::error::{Error, Result};

const HEADER_LEN: u64 = 8;

/// Consumer side of a single-producer ring buffer in the kernel's
/// `perf_event` layout.
///
/// `head` and `tail` are free-running byte positions, the data section has a
/// power-of-two size and positions are masked when indexing. The producer
/// (kernel or synthetic) only advances `head`, the consumer only advances
/// `tail`, which is the explicit "last consumer position".
pub(super) struct Rb<'a> {
    data: *const u8,
    size: u64,
    head: &'a AtomicU64,
    tail: &'a AtomicU64,
    _data: PhantomData<&'a [u8]>,
}

impl<'a> Rb<'a> {
    /// # Safety
    ///
    /// `data` must point to `size` bytes that stay valid for `'a`, and the
    /// producer must only publish fully written records through `head`.
    pub unsafe fn new(data: *const u8, size: usize, head: &'a AtomicU64, tail: &'a AtomicU64) -> Self {
        debug_assert!(size.is_power_of_two());
        Self {
            data,
            size: size as _,
            head,
            tail,
            _data: PhantomData,
        }
    }

    /// Copies the next record into `buf` and releases its space to the producer.
    ///
    /// Returns `None` once the ring is empty. A record whose header cannot be
    /// trusted makes the rest of the ring unparseable, so the consumer skips
    /// everything published so far and reports the record as malformed.
    pub fn pop(&self, buf: &mut Vec<u8>) -> Option<Result<()>> {
        // Thread safe since no other threads set the tail.
        let tail = self.tail.load(MemOrd::Relaxed);
        // About acquire:
        // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L720
        let head = self.head.load(MemOrd::Acquire);

        if tail == head {
            return None;
        }

        let avail = head.wrapping_sub(tail);
        if avail < HEADER_LEN || avail > self.size {
            return Some(self.skip_to(head, "ring positions are inconsistent"));
        }

        // struct perf_event_header {
        //     u32 type; # 4 bytes
        //     u16 misc; # 2 bytes
        //     u16 size; # 2 bytes
        // };
        self.copy_out(tail, HEADER_LEN as _, buf);
        let len = u16::from_ne_bytes([buf[6], buf[7]]) as u64;
        if len < HEADER_LEN || len > avail || len % 8 != 0 {
            return Some(self.skip_to(head, "record header overruns the ring"));
        }

        self.copy_out(tail, len as _, buf);
        // https://github.com/torvalds/linux/blob/v6.13/include/uapi/linux/perf_event.h#L723
        self.tail.store(tail + len, MemOrd::Release);

        Some(Ok(()))
    }

    fn skip_to(&self, head: u64, why: &'static str) -> Result<()> {
        self.tail.store(head, MemOrd::Release);
        Err(Error::MalformedRecord(why))
    }

    fn copy_out(&self, pos: u64, len: usize, buf: &mut Vec<u8>) {
        buf.clear();
        buf.reserve(len);

        let offset = (pos & (self.size - 1)) as usize;
        let hi_len = len.min(self.size as usize - offset);
        let lo_len = len - hi_len;

        unsafe {
            let buf_ptr = buf.as_mut_ptr();
            copy_nonoverlapping(self.data.add(offset), buf_ptr, hi_len);
            copy_nonoverlapping(self.data, buf_ptr.add(hi_len), lo_len);
            buf.set_len(len);
        }
    }
}
