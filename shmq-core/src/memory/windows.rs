//! Windows backing object: a pagefile-backed named section.
//!
//! No filesystem artifact exists; the section named `CT_IP_<queue>` lives
//! as long as any process holds a handle or view, and kernel reference
//! counting reclaims it. A `create_or_override` opener cannot replace a
//! referenced section the way the POSIX side re-creates its file, so it
//! re-initializes the queue in place instead: the header and ring are
//! zeroed through the fresh view (last writer wins, as on POSIX).

use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, VirtualQuery, FILE_MAP_ALL_ACCESS,
    MEMORY_BASIC_INFORMATION, PAGE_READWRITE,
};

use crate::errors::QueueError;
use crate::memory::MemoryView;
use crate::queue::QueueOptions;

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Owns the section handle and its mapped view for the lifetime of one
/// queue endpoint.
pub struct MemoryFile {
    view: Mutex<Option<MemoryView>>,
    section: HANDLE,
    is_owner: bool,
    disposed: AtomicBool,
}

impl MemoryFile {
    /// Creates or opens the named section sized `HeaderSize + Capacity`.
    ///
    /// An existing section smaller than requested cannot back the queue
    /// and fails with `AlreadyExistsIncompatible` (sections are fixed
    /// size; even `create_or_override` cannot grow one); a larger one
    /// attaches, since the kernel rounds section sizes up to allocation
    /// granularity. A `create_or_override` opener zeroes the existing
    /// region and assumes ownership.
    pub fn create_or_open(options: &QueueOptions) -> Result<Self, QueueError> {
        let name = wide(&format!("CT_IP_{}", options.queue_name));
        let bytes_capacity = options.bytes_capacity();

        let section = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                ptr::null(),
                PAGE_READWRITE,
                (bytes_capacity as u64 >> 32) as u32,
                bytes_capacity as u32,
                name.as_ptr(),
            )
        };
        if section.is_null() {
            return Err(io::Error::last_os_error().into());
        }
        let already_exists = unsafe { GetLastError() } == ERROR_ALREADY_EXISTS;

        let address = unsafe { MapViewOfFile(section, FILE_MAP_ALL_ACCESS, 0, 0, 0) };
        if address.Value.is_null() {
            let e = io::Error::last_os_error();
            unsafe { CloseHandle(section) };
            return Err(e.into());
        }

        if already_exists {
            let mut info: MEMORY_BASIC_INFORMATION = unsafe { mem::zeroed() };
            let queried = unsafe {
                VirtualQuery(
                    address.Value,
                    &mut info,
                    mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                )
            };
            if queried != 0 && info.RegionSize < bytes_capacity {
                let actual = info.RegionSize;
                drop(unsafe { MemoryView::from_raw(address.Value as *mut u8, actual) });
                unsafe { CloseHandle(section) };
                return Err(QueueError::AlreadyExistsIncompatible {
                    expected: bytes_capacity,
                    actual,
                });
            }
        }

        let is_owner = if already_exists && options.create_or_override {
            // In-place re-initialization: zero the header and ring so the
            // queue restarts empty for every attached process.
            unsafe { ptr::write_bytes(address.Value as *mut u8, 0, bytes_capacity) };
            true
        } else {
            !already_exists
        };

        debug!(
            queue = %options.queue_name,
            bytes = bytes_capacity,
            owner = is_owner,
            "named section mapped"
        );

        Ok(Self {
            view: Mutex::new(Some(unsafe {
                MemoryView::from_raw(address.Value as *mut u8, bytes_capacity)
            })),
            section,
            is_owner,
            disposed: AtomicBool::new(false),
        })
    }

    /// Base address of the mapping, or `None` once disposed.
    pub fn base_ptr(&self) -> Option<*mut u8> {
        self.lock_view().as_ref().map(|view| view.as_ptr())
    }

    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Releases the mapping; the kernel destroys the section once the last
    /// handle and view are gone. Idempotent; never raises. Callers must
    /// not hand out addresses derived from the mapping past this point.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(self.lock_view().take());
    }

    fn lock_view(&self) -> MutexGuard<'_, Option<MemoryView>> {
        match self.view.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for MemoryFile {
    fn drop(&mut self) {
        self.dispose();
        unsafe { CloseHandle(self.section) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(name: &str, capacity: usize) -> QueueOptions {
        QueueOptions {
            queue_name: name.to_string(),
            path: std::env::temp_dir(),
            capacity,
            create_or_override: false,
        }
    }

    #[test]
    fn creator_then_attacher_share_the_section() {
        let creator = MemoryFile::create_or_open(&options("win-attach", 128)).unwrap();
        assert!(creator.is_owner());

        let attacher = MemoryFile::create_or_open(&options("win-attach", 128)).unwrap();
        assert!(!attacher.is_owner());

        // Same section: a write through one view is visible in the other.
        unsafe {
            *creator.base_ptr().unwrap() = 0x5A;
            assert_eq!(*attacher.base_ptr().unwrap(), 0x5A);
        }
    }

    #[test]
    fn override_zeroes_the_region_and_takes_ownership() {
        let first = MemoryFile::create_or_open(&options("win-override", 64)).unwrap();
        unsafe { ptr::write_bytes(first.base_ptr().unwrap(), 0xFF, 16 + 64) };

        let mut opts = options("win-override", 64);
        opts.create_or_override = true;
        let second = MemoryFile::create_or_open(&opts).unwrap();
        assert!(second.is_owner());

        // The whole region restarted empty, observed through both views.
        unsafe {
            assert_eq!(*first.base_ptr().unwrap(), 0);
            assert_eq!(*second.base_ptr().unwrap().add(16 + 63), 0);
        }
    }

    #[test]
    fn dispose_unmaps_and_is_idempotent() {
        let file = MemoryFile::create_or_open(&options("win-dispose", 64)).unwrap();
        assert!(file.base_ptr().is_some());

        file.dispose();
        file.dispose();
        assert!(file.base_ptr().is_none());
    }
}
