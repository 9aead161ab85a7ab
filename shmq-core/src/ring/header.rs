//! Shared atomic records: the queue header and the per-message header.
//!
//! Both structures live inside the shared memory region and are accessed
//! concurrently by unrelated processes. Every field is an atomic; no other
//! access is permitted.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

/// Size in bytes of the [`QueueHeader`] at offset 0 of the shared region.
pub const QUEUE_HEADER_SIZE: usize = 16;

/// Size in bytes of the [`MessageHeader`] that precedes every body.
pub const MESSAGE_HEADER_SIZE: usize = 8;

/// State machine of a message frame in the ring.
///
/// A publisher moves a frame `Empty -> LockedToBeEnqueued ->
/// ReadyToBeConsumed`; the consuming subscriber moves it
/// `ReadyToBeConsumed -> LockedToBeConsumed` and finally zeroes it back to
/// `Empty` before advancing the head past it.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Frame is unused ring space.
    Empty = 0,

    /// A publisher has reserved the frame and is writing the body.
    LockedToBeEnqueued = 1,

    /// The body is fully written and visible; any subscriber may claim it.
    ReadyToBeConsumed = 2,

    /// Exactly one subscriber owns the frame and is copying the body out.
    LockedToBeConsumed = 3,
}

/// Queue header at offset 0 of the shared region.
///
/// `head` and `tail` are monotonically growing byte offsets into the ring;
/// their modulo-capacity values index it. `head` is advanced only by
/// subscribers, `tail` only by publishers, both via CAS.
#[repr(C)]
pub struct QueueHeader {
    head: AtomicI64,
    tail: AtomicI64,
}

impl QueueHeader {
    /// Reinterprets the start of the mapped region as the queue header.
    ///
    /// # Safety
    ///
    /// `ptr` must point at least [`QUEUE_HEADER_SIZE`] bytes of shared
    /// memory, 8-byte aligned, that remain mapped for `'a`.
    pub unsafe fn from_ptr<'a>(ptr: *mut u8) -> &'a QueueHeader {
        &*(ptr as *const QueueHeader)
    }

    pub fn head(&self) -> i64 {
        self.head.load(Ordering::Acquire)
    }

    pub fn tail(&self) -> i64 {
        self.tail.load(Ordering::Acquire)
    }

    /// Advances the head from `current` to `new`; returns false if another
    /// subscriber got there first.
    pub fn cas_head(&self, current: i64, new: i64) -> bool {
        self.head
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Reserves ring space by advancing the tail from `current` to `new`;
    /// returns false if another publisher got there first.
    pub fn cas_tail(&self, current: i64, new: i64) -> bool {
        self.tail
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[cfg(test)]
    pub(crate) fn force_offsets(&self, head: i64, tail: i64) {
        self.head.store(head, Ordering::SeqCst);
        self.tail.store(tail, Ordering::SeqCst);
    }
}

/// Message header preceding every body in the ring.
///
/// Because frames start at 8-byte aligned ring offsets and the capacity is
/// a multiple of 8, a header never wraps around the ring edge and can be
/// addressed as one contiguous record.
#[repr(C)]
pub struct MessageHeader {
    state: AtomicI32,
    body_length: AtomicI32,
}

impl MessageHeader {
    /// Reinterprets ring bytes as a message header.
    ///
    /// # Safety
    ///
    /// `ptr` must be 8-byte aligned and point at [`MESSAGE_HEADER_SIZE`]
    /// bytes inside the mapped ring.
    pub unsafe fn from_ptr<'a>(ptr: *mut u8) -> &'a MessageHeader {
        &*(ptr as *const MessageHeader)
    }

    pub fn state(&self) -> MessageState {
        match self.state.load(Ordering::Acquire) {
            1 => MessageState::LockedToBeEnqueued,
            2 => MessageState::ReadyToBeConsumed,
            3 => MessageState::LockedToBeConsumed,
            _ => MessageState::Empty,
        }
    }

    /// Atomically moves the state from `from` to `to`; returns false if the
    /// observed state differed.
    ///
    /// The success ordering is AcqRel: a subscriber that wins the
    /// `ReadyToBeConsumed -> LockedToBeConsumed` transition observes the
    /// publisher's body write, and a publisher's
    /// `LockedToBeEnqueued -> ReadyToBeConsumed` transition publishes it.
    pub fn try_transition(&self, from: MessageState, to: MessageState) -> bool {
        self.state
            .compare_exchange(from as i32, to as i32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Marks the frame as reserved and records the body length. Called by
    /// the publisher right after the tail CAS, before the body write.
    pub fn begin_write(&self, body_length: i32) {
        self.state
            .store(MessageState::LockedToBeEnqueued as i32, Ordering::Release);
        self.body_length.store(body_length, Ordering::Release);
    }

    pub fn body_length(&self) -> i32 {
        self.body_length.load(Ordering::Acquire)
    }

    /// Zeroes the header. Called by the owning subscriber after the body
    /// has been copied out and cleared, before the head is advanced.
    pub fn reset(&self) {
        self.body_length.store(0, Ordering::Release);
        self.state.store(MessageState::Empty as i32, Ordering::Release);
    }
}
