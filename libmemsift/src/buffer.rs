//! The per-session streaming arena.
//!
//! One anonymous mapping of `capacity + 2` pages serves every scan of a
//! session. The leading page receives the carry bytes prepended to a window,
//! the middle `capacity` bytes receive each chunk read, and the trailing
//! page holds the carry slot between chunks. Nothing here allocates per
//! chunk; the streamer only moves offsets.

use std::ptr;

use crate::error::Error;

pub const DEFAULT_CAPACITY: usize = 8 * 1024 * 1024;

pub struct ScanBuffer {
    base: *mut u8,
    capacity: usize,
    page_size: usize,
}

// The arena is plain private anonymous memory; the raw pointer is only a
// lifetime-erased base address.
unsafe impl Send for ScanBuffer {}
unsafe impl Sync for ScanBuffer {}

impl ScanBuffer {
    pub fn new(capacity: usize) -> Result<Self, Error> {
        let page_size = page_size();
        let total = capacity + 2 * page_size;
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANON | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(Error::OutOfMemory);
        }
        Ok(ScanBuffer {
            base: base as *mut u8,
            capacity,
            page_size,
        })
    }

    /// Chunk capacity in bytes (excludes the two guard pages).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Whole arena: leading page, chunk area, trailing page.
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base, self.capacity + 2 * self.page_size) }
    }
}

impl Drop for ScanBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.capacity + 2 * self.page_size);
        }
    }
}

pub(crate) fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_is_usable_end_to_end() {
        let mut buf = ScanBuffer::new(64).unwrap();
        let page = buf.page_size();
        let arena = buf.as_mut_slice();
        assert_eq!(arena.len(), 64 + 2 * page);
        arena[0] = 0xaa;
        arena[64 + 2 * page - 1] = 0xbb;
        assert_eq!(arena[0], 0xaa);
    }
}
