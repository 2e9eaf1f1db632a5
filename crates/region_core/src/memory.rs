use std::alloc::{self, Layout};
use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::sync::OnceLock;

use tracing::{info, warn};
use zeroize::Zeroize;

// Platform-specific memory locking functions
#[cfg(any(target_os = "linux", target_os = "macos"))]
use libc::{mlock, munlock};

#[cfg(target_os = "windows")]
use windows_sys::Win32::System::Memory::{VirtualLock, VirtualUnlock};

#[cfg(target_os = "windows")]
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

use crate::types::{RegionError, Result};

// Result of the one-time locking probe
static LOCKING_AVAILABLE: OnceLock<bool> = OnceLock::new();

static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// What a wiped region held. Drives the test-only wipe log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sensitive {
    Secret,
    Key,
    Ciphertext,
    Plaintext,
}

/// Overwrite every byte of `region` with zero.
///
/// Uses volatile writes followed by a compiler fence, so the stores survive
/// even when the region is freed right afterwards.
pub fn secure_wipe(region: &mut [u8]) {
    region.zeroize();
}

pub(crate) fn wipe(kind: Sensitive, region: &mut [u8]) {
    secure_wipe(region);

    #[cfg(test)]
    wipe_log::record(kind, region);
    #[cfg(not(test))]
    let _ = kind;
}

/// Ask the OS to keep `region` out of swap.
///
/// Best effort: returns `false` and logs a warning when the request is denied
/// (typically `RLIMIT_MEMLOCK`). Callers carry on either way.
pub fn lock_in_memory(region: &[u8]) -> bool {
    if !cfg!(feature = "secure-memory") || region.is_empty() {
        return false;
    }

    match lock_memory(region.as_ptr(), region.len()) {
        Ok(()) => true,
        Err(err) => {
            warn!(
                len = region.len(),
                error = %err,
                "Could not lock memory, sensitive data may be swapped to disk"
            );
            false
        }
    }
}

/// Undo [`lock_in_memory`]. Failures are ignored.
pub fn unlock(region: &[u8]) {
    if !cfg!(feature = "secure-memory") || region.is_empty() {
        return;
    }
    let _ = unlock_memory(region.as_ptr(), region.len());
}

/// Whether this process is allowed to lock memory. Probed once, then cached.
pub fn memory_locking_available() -> bool {
    *LOCKING_AVAILABLE.get_or_init(|| {
        let probe = [0u8; 64];
        let available = cfg!(feature = "secure-memory")
            && lock_memory(probe.as_ptr(), probe.len()).is_ok();
        if available {
            let _ = unlock_memory(probe.as_ptr(), probe.len());
        }
        info!(available, "Memory locking probe");
        available
    })
}

/// Lock memory to prevent it from being swapped to disk
#[cfg(any(target_os = "linux", target_os = "macos"))]
#[allow(unsafe_code)]
fn lock_memory(ptr: *const u8, size: usize) -> std::io::Result<()> {
    let result = unsafe { mlock(ptr as *const _, size) };
    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // On Linux, also keep the pages out of core dumps
    #[cfg(target_os = "linux")]
    exclude_from_core_dumps(ptr, size);

    Ok(())
}

/// Lock memory to prevent it from being swapped to disk
#[cfg(target_os = "windows")]
#[allow(unsafe_code)]
fn lock_memory(ptr: *const u8, size: usize) -> std::io::Result<()> {
    let result = unsafe { VirtualLock(ptr as *const _, page_aligned(size)) };
    if result != 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Lock memory - stub for unsupported platforms
#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
fn lock_memory(_ptr: *const u8, _size: usize) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "memory locking not supported on this platform",
    ))
}

/// Unlock previously locked memory
#[cfg(any(target_os = "linux", target_os = "macos"))]
#[allow(unsafe_code)]
fn unlock_memory(ptr: *const u8, size: usize) -> std::io::Result<()> {
    let result = unsafe { munlock(ptr as *const _, size) };
    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Unlock previously locked memory - Windows
#[cfg(target_os = "windows")]
#[allow(unsafe_code)]
fn unlock_memory(ptr: *const u8, size: usize) -> std::io::Result<()> {
    let result = unsafe { VirtualUnlock(ptr as *const _, page_aligned(size)) };
    if result == 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Unlock previously locked memory - stub for unsupported platforms
#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
fn unlock_memory(_ptr: *const u8, _size: usize) -> std::io::Result<()> {
    Ok(())
}

/// The OS page size, queried once
#[allow(unsafe_code)]
pub(crate) fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| {
        #[cfg(unix)]
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

        #[cfg(target_os = "windows")]
        let size = unsafe {
            let mut system_info: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut system_info);
            system_info.dwPageSize as i64
        };

        #[cfg(not(any(unix, target_os = "windows")))]
        let size = 4096i64;

        if size > 0 {
            size as usize
        } else {
            4096
        }
    })
}

#[cfg(target_os = "windows")]
fn page_aligned(size: usize) -> usize {
    let page_size = page_size();
    (size + page_size - 1) & !(page_size - 1)
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn exclude_from_core_dumps(ptr: *const u8, size: usize) {
    let page_size = page_size();
    let start = (ptr as usize) & !(page_size - 1);
    let end = (ptr as usize + size + page_size - 1) & !(page_size - 1);
    unsafe {
        let _ = libc::madvise(start as *mut _, end - start, libc::MADV_DONTDUMP);
    }
}

/// Heap buffer for key material, ciphertext or plaintext.
///
/// The backing allocation is zero-initialized, optionally locked, and on drop
/// it is wiped in full (not just the logical length), unlocked and freed.
/// The allocation is never smaller than one byte, so every live buffer has a
/// distinct address.
///
/// Buffers that request locking get whole pages of their own. `munlock` is
/// page-granular and does not nest, so a shared page would be unlocked by
/// whichever neighbour is freed first.
pub(crate) struct SecureBuffer {
    ptr: NonNull<u8>,
    len: usize,
    capacity: usize,
    layout: Layout,
    locked: bool,
    kind: Sensitive,
}

// The buffer exclusively owns its allocation
#[allow(unsafe_code)]
unsafe impl Send for SecureBuffer {}

#[allow(unsafe_code)]
unsafe impl Sync for SecureBuffer {}

#[allow(unsafe_code)]
impl SecureBuffer {
    /// Allocate `len` zeroed bytes, locking them when `lock` is set
    pub(crate) fn new(len: usize, kind: Sensitive, lock: bool) -> Result<Self> {
        let capacity = len.max(1);
        let layout =
            Self::layout_for(capacity, lock).ok_or(RegionError::Allocation { requested: len })?;

        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(RegionError::Allocation { requested: len })?;

        let mut buffer = Self {
            ptr,
            len,
            capacity,
            layout,
            locked: false,
            kind,
        };
        if lock {
            buffer.locked = lock_in_memory(buffer.allocation());
        }
        Ok(buffer)
    }

    /// Page-exclusive when `lock` is set, byte-exact otherwise
    fn layout_for(capacity: usize, lock: bool) -> Option<Layout> {
        if lock {
            let page = page_size();
            let rounded = capacity.checked_add(page - 1)? / page * page;
            Layout::from_size_align(rounded, page).ok()
        } else {
            Layout::array::<u8>(capacity).ok()
        }
    }

    /// Rebuild a buffer from [`SecureBuffer::into_raw`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `into_raw` on a buffer of exactly `len` bytes
    /// created with the same `lock` choice, and must not have been rebuilt
    /// before.
    pub(crate) unsafe fn from_raw(ptr: NonNull<u8>, len: usize, kind: Sensitive, lock: bool) -> Self {
        let capacity = len.max(1);
        // `new` built this exact layout, so it cannot fail here
        let layout = Self::layout_for(capacity, lock).unwrap_or_else(Layout::new::<u8>);
        Self {
            ptr,
            len,
            capacity,
            layout,
            // The pages belong to this buffer alone; unlocking them is harmless
            // even if the original lock request was denied
            locked: lock,
            kind,
        }
    }

    /// Give up ownership without wiping. Only valid for buffers whose length
    /// was never truncated below the allocation.
    pub(crate) fn into_raw(self) -> NonNull<u8> {
        debug_assert_eq!(self.capacity, self.len.max(1));
        let this = ManuallyDrop::new(self);
        this.ptr
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.locked
    }

    /// Shrink the logical length. The tail stays allocated and is wiped on drop.
    pub(crate) fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    fn allocation(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }
}

#[allow(unsafe_code)]
impl Drop for SecureBuffer {
    fn drop(&mut self) {
        let whole =
            unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) };
        wipe(self.kind, whole);

        if self.locked {
            unlock(whole);
        }

        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// Prevent accidentally printing sensitive data
impl fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureBuffer({:?}, length={})", self.kind, self.len)
    }
}

/// Wipes a borrowed region exactly once: on demand, or when dropped.
pub(crate) struct WipeOnDrop<'a> {
    region: &'a mut [u8],
    kind: Sensitive,
    wiped: bool,
}

impl<'a> WipeOnDrop<'a> {
    pub(crate) fn new(region: &'a mut [u8], kind: Sensitive) -> Self {
        Self {
            region,
            kind,
            wiped: false,
        }
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &*self.region
    }

    pub(crate) fn wipe_now(&mut self) {
        if !self.wiped {
            wipe(self.kind, self.region);
            self.wiped = true;
        }
    }
}

impl Drop for WipeOnDrop<'_> {
    fn drop(&mut self) {
        self.wipe_now();
    }
}
