use std::sync::LazyLock;

pub mod syscall;

pub use perf_event_open_sys::bindings;

pub static PAGE_SIZE: LazyLock<usize> = LazyLock::new(|| {
    let name = libc::_SC_PAGE_SIZE;
    let size = unsafe { libc::sysconf(name) };
    // `sysconf` only fails for unknown names, fall back to the common size anyway.
    if size > 0 {
        size as _
    } else {
        4096
    }
});

pub type Attr = bindings::perf_event_attr;
pub type Metadata = bindings::perf_event_mmap_page;

// The ring consumer reads `data_head` and `data_tail` straight off this page.
const _: () = assert!(std::mem::offset_of!(Metadata, data_head) == 1024);
