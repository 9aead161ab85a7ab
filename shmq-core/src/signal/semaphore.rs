//! Windows wake-up channel: a named kernel semaphore.
//!
//! Both endpoints open the same semaphore; `release` increments it and a
//! waiting subscriber's `WaitForSingleObject` decrements it. The name
//! carries a `_sem` suffix because sections and semaphores share the
//! kernel object namespace.

use std::io;
use std::ptr;
use std::time::Duration;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows_sys::Win32::System::Threading::{
    CreateSemaphoreW, ReleaseSemaphore, WaitForSingleObject,
};

use crate::errors::QueueError;
use crate::queue::QueueOptions;

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

struct NamedSemaphore {
    handle: HANDLE,
}

// Safety: semaphore handles are process-global kernel objects; all access
// goes through thread-safe win32 calls.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    fn open(queue_name: &str) -> Result<Self, QueueError> {
        let name = wide(&format!("CT_IP_{}_sem", queue_name));
        let handle =
            unsafe { CreateSemaphoreW(ptr::null(), 0, i32::MAX, name.as_ptr()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self { handle })
    }

    fn release(&self) {
        unsafe { ReleaseSemaphore(self.handle, 1, ptr::null_mut()) };
    }

    fn wait(&self, timeout: Duration) -> bool {
        let millis = timeout.as_millis().min(u32::MAX as u128) as u32;
        unsafe { WaitForSingleObject(self.handle, millis) == WAIT_OBJECT_0 }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.handle) };
    }
}

/// Publisher-side wake-up endpoint.
pub struct SignalServer {
    semaphore: NamedSemaphore,
}

impl SignalServer {
    pub fn start(options: &QueueOptions) -> Result<Self, QueueError> {
        Ok(Self {
            semaphore: NamedSemaphore::open(&options.queue_name)?,
        })
    }

    pub fn release(&self) {
        self.semaphore.release();
    }

    /// Kernel reference counting reclaims the semaphore; nothing to do.
    pub fn shutdown(&self) {}
}

/// Subscriber-side wake-up endpoint.
pub struct SignalClient {
    semaphore: NamedSemaphore,
}

impl SignalClient {
    pub fn new(options: &QueueOptions) -> Result<Self, QueueError> {
        Ok(Self {
            semaphore: NamedSemaphore::open(&options.queue_name)?,
        })
    }

    pub fn wait(&self, timeout: Duration) -> bool {
        self.semaphore.wait(timeout)
    }

    pub fn disconnect(&self) {}
}
