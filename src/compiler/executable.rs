//! ExecutableBuffer — mmap'd, read-only executable code.
//!
//! Code bytes are copied into a fresh anonymous mapping, which is then
//! switched to `PROT_READ | PROT_EXEC`. The mapping is never writable again
//! and is unmapped on drop.

use crate::types::{PreluError, PreluResult};

/// An executable memory buffer backed by mmap.
pub struct ExecutableBuffer {
    ptr: *mut u8,
    /// Bytes of code actually copied in.
    code_len: usize,
    /// Mapping length (page rounded).
    map_len: usize,
}

// SAFETY: ExecutableBuffer owns its mmap'd memory exclusively. The pointer is
// never aliased and the buffer is immutable (PROT_READ|PROT_EXEC) after construction.
unsafe impl Send for ExecutableBuffer {}
unsafe impl Sync for ExecutableBuffer {}

impl ExecutableBuffer {
    /// Allocate an executable memory region and copy code into it.
    #[cfg(unix)]
    pub fn new(code: &[u8]) -> PreluResult<Self> {
        if code.is_empty() {
            return Ok(ExecutableBuffer {
                ptr: std::ptr::null_mut(),
                code_len: 0,
                map_len: 0,
            });
        }

        let page_size = page_size();
        let map_len = (code.len() + page_size - 1) & !(page_size - 1);

        // SAFETY: mmap with MAP_PRIVATE|MAP_ANONYMOUS creates a new anonymous mapping.
        // No file descriptor is used (-1). Return value is checked for MAP_FAILED.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(PreluError::ExecutableMemory(format!(
                "mmap of {map_len} bytes failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        let ptr = ptr as *mut u8;

        // SAFETY: the mapping is at least `code.len()` bytes and freshly created.
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
        }

        let ret = unsafe { libc::mprotect(ptr as *mut _, map_len, libc::PROT_READ | libc::PROT_EXEC) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::munmap(ptr as *mut _, map_len);
            }
            return Err(PreluError::ExecutableMemory(format!("mprotect failed: {err}")));
        }

        Ok(ExecutableBuffer {
            ptr,
            code_len: code.len(),
            map_len,
        })
    }

    #[cfg(not(unix))]
    pub fn new(_code: &[u8]) -> PreluResult<Self> {
        Err(PreluError::ExecutableMemory(
            "executable mappings are only implemented for unix hosts".into(),
        ))
    }

    /// Start of the code.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Length of the copied code in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.code_len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code_len == 0
    }

    /// Length of the underlying mapping (multiple of the page size).
    #[inline]
    pub fn mapped_len(&self) -> usize {
        self.map_len
    }

    /// The code bytes, readable through the RX mapping.
    pub fn as_slice(&self) -> &[u8] {
        if self.ptr.is_null() {
            return &[];
        }
        // SAFETY: the mapping is readable and holds `code_len` initialized bytes
        // for as long as `self` lives.
        unsafe { std::slice::from_raw_parts(self.ptr, self.code_len) }
    }
}

impl Drop for ExecutableBuffer {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if !self.ptr.is_null() && self.map_len > 0 {
                unsafe {
                    libc::munmap(self.ptr as *mut _, self.map_len);
                }
            }
        }
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
