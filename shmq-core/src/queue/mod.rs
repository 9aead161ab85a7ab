//! Publisher and subscriber endpoints over one shared queue.

mod options;
mod publisher;
mod subscriber;

pub use options::{QueueOptions, DEFAULT_CAPACITY};
pub use publisher::Publisher;
pub use subscriber::Subscriber;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::errors::QueueError;
use crate::memory::MemoryFile;
use crate::ring::{CircularBuffer, QueueHeader, QUEUE_HEADER_SIZE};

/// Everything an endpoint needs to reach the shared queue: the mapped
/// region, the queue header at its base, and the ring behind it.
pub(crate) struct QueueContext {
    header: *mut QueueHeader,
    buffer: CircularBuffer,
    memory: MemoryFile,
}

// Safety: the raw header pointer aliases shared memory whose consistency
// is maintained entirely through the atomic fields it points at.
unsafe impl Send for QueueContext {}
unsafe impl Sync for QueueContext {}

impl QueueContext {
    pub(crate) fn attach(options: &QueueOptions) -> Result<Self, QueueError> {
        options.validate()?;
        let memory = MemoryFile::create_or_open(options)?;
        // Freshly mapped, so the base is present until dispose.
        let base = memory.base_ptr().ok_or(QueueError::Cancelled)?;
        let buffer =
            unsafe { CircularBuffer::new(base.add(QUEUE_HEADER_SIZE), options.capacity) };
        Ok(Self {
            header: base as *mut QueueHeader,
            buffer,
            memory,
        })
    }

    #[inline]
    pub(crate) fn header(&self) -> &QueueHeader {
        unsafe { &*self.header }
    }

    #[inline]
    pub(crate) fn buffer(&self) -> &CircularBuffer {
        &self.buffer
    }

    /// Outstanding (unconsumed) bytes in the ring, including frames still
    /// being written.
    pub(crate) fn occupancy(&self) -> usize {
        let header = self.header();
        (header.tail() - header.head()).max(0) as usize
    }

    /// Unmaps the region and releases the OS artifact. The cached header
    /// and buffer pointers dangle afterwards; endpoints gate every entry
    /// point on their in-flight guard so no operation can reach them past
    /// this call.
    pub(crate) fn dispose(&self) {
        self.memory.dispose();
    }
}

/// Counts an operation into an endpoint's in-flight counter for its whole
/// duration, so dispose can drain before unmapping. Entry fails once the
/// endpoint is disposed.
pub(crate) struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    pub(crate) fn enter(
        counter: &'a AtomicUsize,
        disposed: &AtomicBool,
    ) -> Result<Self, QueueError> {
        // Count in before checking, so a concurrent dispose either sees
        // the increment and waits, or was already flagged and we bail.
        counter.fetch_add(1, Ordering::AcqRel);
        if disposed.load(Ordering::Acquire) {
            counter.fetch_sub(1, Ordering::AcqRel);
            return Err(QueueError::Cancelled);
        }
        Ok(Self { counter })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
