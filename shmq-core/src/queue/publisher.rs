//! The enqueue side of the queue.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tracing::error;

use crate::cancellation::CancellationToken;
use crate::errors::QueueError;
use crate::queue::{InFlightGuard, QueueContext, QueueOptions};
use crate::ring::{advance, frame_length, MessageState, MESSAGE_HEADER_SIZE};
use crate::signal::SignalServer;

/// Attempts that spin-yield before a full `enqueue` starts sleeping.
const YIELD_ATTEMPTS: u32 = 5;

/// Longest sleep between retries of a full `enqueue`.
const MAX_RETRY_SLEEP_MS: u64 = 10;

/// Writes messages into a shared queue and signals waiting subscribers.
///
/// Many publishers may coexist on one queue, within and across processes;
/// tail reservation is a CAS race they settle among themselves.
pub struct Publisher {
    context: QueueContext,
    signal: SignalServer,
    in_flight: AtomicUsize,
    disposed: AtomicBool,
}

impl Publisher {
    /// Creates the queue or attaches to an existing one, then starts the
    /// wake-up channel. A partial failure rolls the region acquisition
    /// back.
    pub fn new(options: QueueOptions) -> Result<Self, QueueError> {
        let context = QueueContext::attach(&options)?;
        let signal = SignalServer::start(&options)?;
        Ok(Self {
            context,
            signal,
            in_flight: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        })
    }

    /// Enqueues `body` if the ring has room right now.
    ///
    /// Returns `Ok(false)` when the queue is full. Fails with
    /// `MessageTooLarge` when the framed body can never fit, and with
    /// `Cancelled` after dispose.
    pub fn try_enqueue(&self, body: &[u8]) -> Result<bool, QueueError> {
        let _guard = self.enter()?;
        if body.is_empty() {
            return Err(QueueError::InvalidOption(
                "message body must not be empty".into(),
            ));
        }
        let capacity = self.context.buffer().capacity();
        let frame = frame_length(body.len());
        if frame > capacity {
            return Err(QueueError::MessageTooLarge {
                body: body.len(),
                capacity,
            });
        }

        let header = self.context.header();
        loop {
            let tail = header.tail();
            let head = header.head();
            if tail - head + frame as i64 > capacity as i64 {
                return Ok(false);
            }

            // Reserve the frame by moving the tail; the message state keeps
            // readers out until the body is published.
            if !header.cas_tail(tail, advance(tail, frame as i64)) {
                continue;
            }

            let message = unsafe { self.context.buffer().message_header(tail) };
            message.begin_write(body.len() as i32);
            self.context
                .buffer()
                .write(advance(tail, MESSAGE_HEADER_SIZE as i64), body);

            if !message.try_transition(
                MessageState::LockedToBeEnqueued,
                MessageState::ReadyToBeConsumed,
            ) {
                error!(
                    offset = tail,
                    "message state changed while the enqueue lock was held"
                );
                panic!("shmq invariant breach: message state changed while the enqueue lock was held");
            }

            // Best-effort: a lost wake-up only delays a subscriber's next
            // poll, it never fails the publish.
            self.signal.release();
            return Ok(true);
        }
    }

    /// Enqueues `body`, retrying with back-off while the queue is full.
    pub fn enqueue(&self, body: &[u8], cancellation: &CancellationToken) -> Result<(), QueueError> {
        let mut attempt: u32 = 0;
        loop {
            if cancellation.is_cancelled() {
                return Err(QueueError::Cancelled);
            }
            if self.try_enqueue(body)? {
                return Ok(());
            }
            if attempt < YIELD_ATTEMPTS {
                thread::yield_now();
            } else {
                let ms = u64::from(attempt - YIELD_ATTEMPTS + 1).min(MAX_RETRY_SLEEP_MS);
                thread::sleep(Duration::from_millis(ms));
            }
            attempt = attempt.saturating_add(1);
        }
    }

    /// Outstanding bytes in the ring. Fails with `Cancelled` after
    /// dispose.
    pub fn occupancy(&self) -> Result<usize, QueueError> {
        let _guard = self.enter()?;
        Ok(self.context.occupancy())
    }

    /// Waits for in-flight publishes to drain, then releases the wake-up
    /// channel and the shared region (unmapping it, and unlinking the
    /// backing file if owned). Idempotent; subsequent operations fail
    /// with `Cancelled`.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        while self.in_flight.load(Ordering::Acquire) > 0 {
            thread::yield_now();
        }
        self.signal.shutdown();
        self.context.dispose();
    }

    fn enter(&self) -> Result<InFlightGuard<'_>, QueueError> {
        InFlightGuard::enter(&self.in_flight, &self.disposed)
    }

    #[cfg(test)]
    pub(crate) fn context(&self) -> &QueueContext {
        &self.context
    }

    #[cfg(test)]
    pub(crate) fn signal(&self) -> &SignalServer {
        &self.signal
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options(dir: &std::path::Path, name: &str, capacity: usize) -> QueueOptions {
        QueueOptions {
            queue_name: name.to_string(),
            path: dir.to_path_buf(),
            capacity,
            create_or_override: false,
        }
    }

    #[test]
    fn fills_up_and_reports_full() {
        let dir = tempdir().unwrap();
        let publisher = Publisher::new(options(dir.path(), "full", 64)).unwrap();

        // Each 16-byte body frames to 24 bytes.
        assert!(publisher.try_enqueue(&[0u8; 16]).unwrap());
        assert!(publisher.try_enqueue(&[1u8; 16]).unwrap());
        assert_eq!(publisher.context().header().tail(), 48);

        // A third frame would need 72 > 64 outstanding bytes.
        assert!(!publisher.try_enqueue(&[2u8; 16]).unwrap());
        assert_eq!(publisher.occupancy().unwrap(), 48);
    }

    #[test]
    fn rejects_oversized_bodies() {
        let dir = tempdir().unwrap();
        let publisher = Publisher::new(options(dir.path(), "big", 64)).unwrap();

        // ceil8(8 + 57) = 72 > 64.
        match publisher.try_enqueue(&[0u8; 57]) {
            Err(QueueError::MessageTooLarge { body, capacity }) => {
                assert_eq!(body, 57);
                assert_eq!(capacity, 64);
            }
            other => panic!("expected MessageTooLarge, got {:?}", other),
        }

        // A frame of exactly the capacity is fine.
        assert!(publisher.try_enqueue(&[0u8; 56]).unwrap());
    }

    #[test]
    fn rejects_empty_bodies() {
        let dir = tempdir().unwrap();
        let publisher = Publisher::new(options(dir.path(), "empty", 64)).unwrap();
        assert!(matches!(
            publisher.try_enqueue(&[]),
            Err(QueueError::InvalidOption(_))
        ));
    }

    #[test]
    fn offsets_stay_aligned() {
        let dir = tempdir().unwrap();
        let publisher = Publisher::new(options(dir.path(), "aligned", 256)).unwrap();

        for len in [1usize, 3, 7, 8, 9, 20] {
            assert!(publisher.try_enqueue(&vec![0xAB; len]).unwrap());
            assert_eq!(publisher.context().header().tail() % 8, 0);
        }
    }

    #[test]
    fn enqueue_cancels_while_full() {
        let dir = tempdir().unwrap();
        let publisher = Publisher::new(options(dir.path(), "cancel", 32)).unwrap();
        assert!(publisher.try_enqueue(&[0u8; 24]).unwrap());

        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            publisher.enqueue(&[0u8; 24], &token),
            Err(QueueError::Cancelled)
        ));
    }

    #[test]
    fn dispose_is_idempotent_and_fails_later_calls() {
        let dir = tempdir().unwrap();
        let publisher = Publisher::new(options(dir.path(), "disposed", 64)).unwrap();
        publisher.dispose();
        publisher.dispose();
        assert!(matches!(
            publisher.try_enqueue(&[1]),
            Err(QueueError::Cancelled)
        ));
        assert!(matches!(
            publisher.occupancy(),
            Err(QueueError::Cancelled)
        ));
    }
}
