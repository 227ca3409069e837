use std::fs::File;
use std::io::Result;
use std::ptr::{addr_of_mut, null_mut, NonNull};
use std::sync::atomic::AtomicU64;

use crate::ffi::syscall::{mmap, munmap};
use crate::ffi::{Metadata, PAGE_SIZE};

/// The metadata page plus data pages mapped from a perf event fd.
pub struct Arena {
    ptr: NonNull<u8>,
    len: usize,
}

impl Arena {
    pub fn new(file: &File, len: usize, offset: usize) -> Result<Self> {
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        // https://github.com/torvalds/linux/blob/v6.13/kernel/events/core.c#L6582
        let flags = libc::MAP_SHARED;
        let ptr: *mut u8 = unsafe { mmap(null_mut(), len, prot, flags, file, offset as _) }?;
        // `mmap` never returns null for a non-fixed mapping that succeeded.
        let ptr = NonNull::new(ptr).ok_or_else(|| std::io::Error::other("mmap returned null"))?;
        Ok(Self { ptr, len })
    }

    fn metadata(&self) -> *mut Metadata {
        self.ptr.as_ptr() as _
    }

    /// Data section: everything after the metadata page.
    pub fn data(&self) -> (*const u8, usize) {
        // https://github.com/torvalds/linux/blob/v6.13/kernel/events/core.c#L6212
        let ptr = unsafe { self.ptr.as_ptr().add(*PAGE_SIZE) };
        (ptr, self.len - *PAGE_SIZE)
    }

    pub fn head(&self) -> &AtomicU64 {
        unsafe { AtomicU64::from_ptr(addr_of_mut!((*self.metadata()).data_head)) }
    }

    pub fn tail(&self) -> &AtomicU64 {
        unsafe { AtomicU64::from_ptr(addr_of_mut!((*self.metadata()).data_tail)) }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr(), self.len) } {
            log::error!("failed to unmap sampling buffer: {}", e);
        }
    }
}

// `Arena::ptr` is valid during the lifetime of `Arena`, and the kernel is
// the only other party touching the mapping.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}
