//! The native side of the interpreter: page mappings and symbol lookup.
//!
//! Everything that touches executable memory or the dynamic linker lives
//! behind [`NativeBridge`]; no other module requests exec permission.

use std::ffi::CString;

/// Capability for page-granular memory and host symbol resolution.
///
/// Variable storage and script allocations are backed by anonymous
/// read/write mappings; function trampolines are the only allocations that
/// request exec permission. Whole pages are mapped and tail bytes within a
/// page are never reclaimed separately.
pub struct NativeBridge {
    page_size: usize,
}

impl Default for NativeBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeBridge {
    pub fn new() -> Self {
        // SAFETY: sysconf with a valid name has no preconditions
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        NativeBridge {
            page_size: if page_size > 0 { page_size as usize } else { 4096 },
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Map zeroed anonymous pages covering at least `size` bytes.
    pub fn map_pages(&self, size: usize, exec: bool) -> Option<*mut u8> {
        let len = self.round_up(size);
        let prot = libc::PROT_READ | libc::PROT_WRITE | if exec { libc::PROT_EXEC } else { 0 };
        // SAFETY: anonymous private mapping, no fd involved
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                prot,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return None;
        }
        Some(ptr as *mut u8)
    }

    /// Release a mapping previously handed out by [`NativeBridge::map_pages`].
    pub fn unmap(&self, ptr: *mut u8, size: usize) {
        if ptr.is_null() {
            return;
        }
        // SAFETY: ptr/size come from a prior map_pages; munmap rounds the
        // length up to whole pages itself
        unsafe {
            libc::munmap(ptr as *mut libc::c_void, self.round_up(size));
        }
    }

    /// Resolve a symbol in the host's dynamic-symbol namespace.
    pub fn lookup_symbol(&self, name: &str) -> Option<*mut u8> {
        let name = CString::new(name).ok()?;
        // SAFETY: RTLD_DEFAULT lookup with a valid NUL-terminated name
        let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
        if addr.is_null() {
            None
        } else {
            Some(addr as *mut u8)
        }
    }

    fn round_up(&self, size: usize) -> usize {
        let size = size.max(1);
        size.div_ceil(self.page_size) * self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_is_zeroed_and_writable() {
        let bridge = NativeBridge::new();
        let ptr = bridge.map_pages(64, false).unwrap();
        // SAFETY: fresh rw mapping of at least 64 bytes
        unsafe {
            assert_eq!(std::slice::from_raw_parts(ptr, 64), &[0u8; 64][..]);
            ptr.write(0xAB);
            assert_eq!(ptr.read(), 0xAB);
        }
        bridge.unmap(ptr, 64);
    }

    #[test]
    fn test_lookup_known_symbol() {
        let bridge = NativeBridge::new();
        assert!(bridge.lookup_symbol("strlen").is_some());
        assert!(bridge.lookup_symbol("definitely_not_a_symbol_42").is_none());
    }
}
