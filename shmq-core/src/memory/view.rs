//! In-process view of the shared region.
//!
//! The view pins the mapping and hands out a stable base address for as
//! long as it is alive; dropping it unmaps the region.

#[cfg(unix)]
use memmap2::MmapMut;

/// A mapped shared-memory region: stable base pointer plus length.
#[cfg(unix)]
pub struct MemoryView {
    base: *mut u8,
    len: usize,
    _mmap: MmapMut,
}

#[cfg(unix)]
impl MemoryView {
    pub fn new(mut mmap: MmapMut) -> Self {
        let base = mmap.as_mut_ptr();
        let len = mmap.len();
        Self {
            base,
            len,
            _mmap: mmap,
        }
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A mapped view of a named section. Unmapped on drop; the section itself
/// is released when the owning handle closes.
#[cfg(windows)]
pub struct MemoryView {
    base: *mut u8,
    len: usize,
}

#[cfg(windows)]
impl MemoryView {
    /// # Safety
    ///
    /// `base` must come from `MapViewOfFile` and stay unmapped by no one
    /// else; the view takes over unmapping.
    pub(crate) unsafe fn from_raw(base: *mut u8, len: usize) -> Self {
        Self { base, len }
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(windows)]
impl Drop for MemoryView {
    fn drop(&mut self) {
        use windows_sys::Win32::System::Memory::{UnmapViewOfFile, MEMORY_MAPPED_VIEW_ADDRESS};
        unsafe {
            UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                Value: self.base as _,
            });
        }
    }
}

// Safety: the view only describes a region; synchronization of its
// contents is the ring protocol's responsibility.
unsafe impl Send for MemoryView {}
unsafe impl Sync for MemoryView {}
