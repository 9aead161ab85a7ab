//! The dequeue side of the queue.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tracing::error;

use crate::cancellation::CancellationToken;
use crate::errors::QueueError;
use crate::queue::{InFlightGuard, QueueContext, QueueOptions};
use crate::ring::{advance, frame_length, MessageState, MESSAGE_HEADER_SIZE};
use crate::signal::SignalClient;

/// Attempts that spin-yield before a blocking `dequeue` starts parking on
/// the wake-up signal.
const YIELD_ATTEMPTS: u32 = 5;

/// Attempts over which the park interval ramps from 1 ms up to the steady
/// state.
const RAMP_ATTEMPTS: u32 = 10;

/// Steady-state park interval. Bounds the latency cost of a lost wake-up.
const STEADY_PARK_MS: u64 = 10;

/// Pause after draining in-flight calls on dispose, closing the window
/// between a cancellation check and a fresh park.
const DISPOSE_GRACE: Duration = Duration::from_millis(10);

/// Reads messages from a shared queue.
///
/// Many subscribers may coexist on one queue, within and across processes;
/// each message is delivered to exactly one of them. All methods take
/// `&self` and are safe to call from multiple threads.
pub struct Subscriber {
    context: QueueContext,
    signal: SignalClient,
    cancellation: CancellationToken,
    in_flight: AtomicUsize,
    disposed: AtomicBool,
}

impl Subscriber {
    /// Attaches to the queue (creating it if this is the first endpoint)
    /// and prepares the wake-up receiver.
    pub fn new(options: QueueOptions) -> Result<Self, QueueError> {
        let context = QueueContext::attach(&options)?;
        let signal = SignalClient::new(&options)?;
        Ok(Self {
            context,
            signal,
            cancellation: CancellationToken::new(),
            in_flight: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        })
    }

    /// Dequeues the head message if one is ready right now.
    pub fn try_dequeue(&self) -> Result<Option<Vec<u8>>, QueueError> {
        let _guard = self.enter()?;
        let mut body = Vec::new();
        Ok(self.poll_once(&mut body).then_some(body))
    }

    /// Like [`try_dequeue`](Self::try_dequeue), but reuses `buffer` for the
    /// body instead of allocating. Returns whether a message was dequeued.
    pub fn try_dequeue_into(&self, buffer: &mut Vec<u8>) -> Result<bool, QueueError> {
        let _guard = self.enter()?;
        Ok(self.poll_once(buffer))
    }

    /// Dequeues the head message, blocking until one arrives or
    /// `cancellation` trips.
    pub fn dequeue(&self, cancellation: &CancellationToken) -> Result<Vec<u8>, QueueError> {
        let mut body = Vec::new();
        self.dequeue_into(&mut body, cancellation)?;
        Ok(body)
    }

    /// Blocking dequeue into a caller-provided buffer.
    ///
    /// The retry loop yields first, then parks on the wake-up signal with
    /// an interval that ramps to 10 ms. The signal is only a latency hint:
    /// a lost wake-up delays the next poll by at most one park interval.
    pub fn dequeue_into(
        &self,
        buffer: &mut Vec<u8>,
        cancellation: &CancellationToken,
    ) -> Result<(), QueueError> {
        let _guard = self.enter()?;
        let mut attempt: u32 = 0;
        loop {
            if cancellation.is_cancelled() || self.cancellation.is_cancelled() {
                return Err(QueueError::Cancelled);
            }
            if self.poll_once(buffer) {
                return Ok(());
            }
            if attempt < YIELD_ATTEMPTS {
                thread::yield_now();
            } else if attempt < YIELD_ATTEMPTS + RAMP_ATTEMPTS {
                let ms = u64::from(attempt - YIELD_ATTEMPTS + 1).min(STEADY_PARK_MS);
                self.signal.wait(Duration::from_millis(ms));
            } else {
                self.signal.wait(Duration::from_millis(STEADY_PARK_MS));
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

    /// Cancels in-flight dequeues, waits for them to drain, then releases
    /// the wake-up connection and the shared region (unmapping it, and
    /// unlinking the backing file if owned). Idempotent; subsequent
    /// operations fail with `Cancelled`.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancellation.cancel();
        while self.in_flight.load(Ordering::Acquire) > 0 {
            thread::yield_now();
        }
        thread::sleep(DISPOSE_GRACE);
        self.signal.disconnect();
        self.context.dispose();
    }

    fn enter(&self) -> Result<InFlightGuard<'_>, QueueError> {
        InFlightGuard::enter(&self.in_flight, &self.disposed)
    }

    /// One pass of the dequeue protocol. Returns true and fills `dest`
    /// when a message was consumed.
    fn poll_once(&self, dest: &mut Vec<u8>) -> bool {
        let header = self.context.header();
        let head = header.head();
        if head == header.tail() {
            return false;
        }

        let message = unsafe { self.context.buffer().message_header(head) };
        if !message.try_transition(
            MessageState::ReadyToBeConsumed,
            MessageState::LockedToBeConsumed,
        ) {
            // Not yet published, or another subscriber holds it.
            return false;
        }

        if header.head() != head {
            // The frame we locked is no longer the head: another
            // subscriber consumed it and the offset wrapped back onto a
            // newer frame. Undo the speculative lock.
            if !message.try_transition(
                MessageState::LockedToBeConsumed,
                MessageState::ReadyToBeConsumed,
            ) {
                error!(head, "locked frame mutated during head re-check");
                panic!("shmq invariant breach: locked frame mutated during head re-check");
            }
            return false;
        }

        let body_length = message.body_length() as usize;
        let frame = frame_length(body_length);
        let body_offset = advance(head, MESSAGE_HEADER_SIZE as i64);

        dest.clear();
        dest.resize(body_length, 0);
        self.context.buffer().read_into(body_offset, dest);

        // Hygiene: consumed bytes must not remain readable in the ring.
        self.context
            .buffer()
            .clear(body_offset, frame - MESSAGE_HEADER_SIZE);
        message.reset();

        if !header.cas_head(head, advance(head, frame as i64)) {
            error!(head, "head moved while the consume lock was held");
            panic!("shmq invariant breach: head moved while the consume lock was held");
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn context(&self) -> &QueueContext {
        &self.context
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Publisher;
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};
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
    fn round_trips_one_message() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), "single", 128);
        let publisher = Publisher::new(opts.clone()).unwrap();
        let subscriber = Subscriber::new(opts).unwrap();

        assert!(publisher.try_enqueue(&[0xA1, 0xA2, 0xA3]).unwrap());
        let body = subscriber.try_dequeue().unwrap().expect("a message");
        assert_eq!(body, vec![0xA1, 0xA2, 0xA3]);

        // One 3-byte body frames to 16; the queue is drained.
        assert_eq!(subscriber.context().header().head(), 16);
        assert_eq!(subscriber.context().header().tail(), 16);
        assert_eq!(subscriber.occupancy().unwrap(), 0);
        assert!(subscriber.try_dequeue().unwrap().is_none());
    }

    #[test]
    fn delivers_in_fifo_order() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), "fifo", 256);
        let publisher = Publisher::new(opts.clone()).unwrap();
        let subscriber = Subscriber::new(opts).unwrap();

        for i in 0u8..5 {
            assert!(publisher.try_enqueue(&[i, i, i]).unwrap());
        }
        for i in 0u8..5 {
            let body = subscriber.try_dequeue().unwrap().expect("a message");
            assert_eq!(body, vec![i, i, i]);
        }
    }

    #[test]
    fn reuses_the_caller_buffer() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), "reuse", 128);
        let publisher = Publisher::new(opts.clone()).unwrap();
        let subscriber = Subscriber::new(opts).unwrap();

        let mut buffer = Vec::with_capacity(64);
        assert!(!subscriber.try_dequeue_into(&mut buffer).unwrap());

        publisher.try_enqueue(b"first").unwrap();
        publisher.try_enqueue(b"second, longer").unwrap();

        assert!(subscriber.try_dequeue_into(&mut buffer).unwrap());
        assert_eq!(buffer.as_slice(), b"first");
        assert!(subscriber.try_dequeue_into(&mut buffer).unwrap());
        assert_eq!(buffer.as_slice(), b"second, longer");
    }

    #[test]
    fn wraps_around_the_ring_edge() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), "wrap", 64);
        let publisher = Publisher::new(opts.clone()).unwrap();
        let subscriber = Subscriber::new(opts).unwrap();

        // Frames of 32 bytes march around a 64-byte ring many times.
        for round in 0u8..20 {
            let body = [round; 20];
            assert!(publisher.try_enqueue(&body).unwrap());
            let received = subscriber.try_dequeue().unwrap().expect("a message");
            assert_eq!(received, body);
            assert_eq!(subscriber.context().header().head() % 8, 0);
        }
    }

    #[test]
    fn consumed_frames_are_zeroed() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), "hygiene", 64);
        let publisher = Publisher::new(opts.clone()).unwrap();
        let subscriber = Subscriber::new(opts).unwrap();

        publisher.try_enqueue(&[0xFF; 8]).unwrap();
        subscriber.try_dequeue().unwrap().expect("a message");

        // The whole consumed frame reads back as zeros.
        let mut raw = vec![0xAAu8; 16];
        subscriber.context().buffer().read_into(0, &mut raw);
        assert_eq!(raw, vec![0u8; 16]);
    }

    #[test]
    fn blocking_dequeue_wakes_on_publish() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), "blocking", 128);
        let publisher = Publisher::new(opts.clone()).unwrap();
        let subscriber = Subscriber::new(opts).unwrap();

        let waiter = thread::spawn(move || {
            let token = CancellationToken::new();
            subscriber.dequeue(&token)
        });

        thread::sleep(Duration::from_millis(50));
        publisher.try_enqueue(b"wake up").unwrap();

        let body = waiter.join().unwrap().unwrap();
        assert_eq!(body, b"wake up");
    }

    #[test]
    fn blocking_dequeue_recovers_after_signal_server_death() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), "fallback", 128);
        let publisher = Publisher::new(opts.clone()).unwrap();
        let subscriber = Subscriber::new(opts.clone()).unwrap();

        // Kill the wake-up server; parks degrade to plain sleeps.
        publisher.signal().shutdown();

        let waiter = thread::spawn(move || {
            let token = CancellationToken::new();
            subscriber.dequeue(&token)
        });
        thread::sleep(Duration::from_millis(50));
        assert!(publisher.try_enqueue(b"timer delivered").unwrap());

        // The subscriber must fall back to timer polling and still
        // deliver promptly (its steady park interval is 10 ms).
        let body = waiter.join().unwrap().unwrap();
        assert_eq!(body, b"timer delivered");
    }

    #[test]
    fn cancellation_interrupts_a_parked_dequeue() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), "cancel", 128);
        let _publisher = Publisher::new(opts.clone()).unwrap();
        let subscriber = Arc::new(Subscriber::new(opts).unwrap());

        let token = CancellationToken::new();
        let thread_token = token.clone();
        let thread_subscriber = Arc::clone(&subscriber);
        let waiter =
            thread::spawn(move || thread_subscriber.dequeue(&thread_token));

        thread::sleep(Duration::from_millis(30));
        token.cancel();
        assert!(matches!(waiter.join().unwrap(), Err(QueueError::Cancelled)));
    }

    #[test]
    fn dispose_drains_and_blocks_new_calls() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), "dispose", 128);
        let _publisher = Publisher::new(opts.clone()).unwrap();
        let subscriber = Arc::new(Subscriber::new(opts).unwrap());

        let thread_subscriber = Arc::clone(&subscriber);
        let waiter = thread::spawn(move || {
            let token = CancellationToken::new();
            thread_subscriber.dequeue(&token)
        });

        thread::sleep(Duration::from_millis(30));
        subscriber.dispose();
        subscriber.dispose();

        assert!(matches!(waiter.join().unwrap(), Err(QueueError::Cancelled)));
        assert!(matches!(
            subscriber.try_dequeue(),
            Err(QueueError::Cancelled)
        ));
    }

    #[test]
    fn arithmetic_survives_offsets_near_the_maximum() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), "overflow", 128);
        let publisher = Publisher::new(opts.clone()).unwrap();
        let subscriber = Subscriber::new(opts).unwrap();

        // Park both offsets at an enormous 8-aligned value, as if the
        // queue had lived forever.
        let base = (i64::MAX - (1 << 20)) & !7;
        publisher.context().header().force_offsets(base, base);

        for i in 0u8..4 {
            assert!(publisher.try_enqueue(&[i; 5]).unwrap());
        }
        for i in 0u8..4 {
            let body = subscriber.try_dequeue().unwrap().expect("a message");
            assert_eq!(body, vec![i; 5]);
        }

        let header = subscriber.context().header();
        assert_eq!(header.head(), header.tail());
        assert_eq!(header.head(), base + 4 * 16);
        assert_eq!(header.head() % 8, 0);
    }

    #[test]
    fn two_subscribers_split_the_stream_exactly() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), "mpmc", 1024);
        let publisher = Publisher::new(opts.clone()).unwrap();

        const MESSAGES: usize = 1000;
        let received: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let consumed = Arc::new(AtomicUsize::new(0));

        let mut consumers = Vec::new();
        for _ in 0..2 {
            let subscriber = Subscriber::new(opts.clone()).unwrap();
            let received = Arc::clone(&received);
            let consumed = Arc::clone(&consumed);
            consumers.push(thread::spawn(move || {
                while consumed.load(Ordering::Acquire) < MESSAGES {
                    match subscriber.try_dequeue().unwrap() {
                        Some(body) => {
                            let value = u32::from_le_bytes(body.try_into().unwrap());
                            received.lock().unwrap().push(value);
                            consumed.fetch_add(1, Ordering::AcqRel);
                        }
                        None => thread::yield_now(),
                    }
                }
            }));
        }

        let token = CancellationToken::new();
        for i in 0..MESSAGES as u32 {
            publisher.enqueue(&i.to_le_bytes(), &token).unwrap();
        }

        for consumer in consumers {
            consumer.join().unwrap();
        }

        let received = received.lock().unwrap();
        assert_eq!(received.len(), MESSAGES);
        let unique: BTreeSet<u32> = received.iter().copied().collect();
        assert_eq!(unique.len(), MESSAGES, "a message was delivered twice");
        assert_eq!(*unique.iter().next().unwrap(), 0);
        assert_eq!(*unique.iter().next_back().unwrap(), MESSAGES as u32 - 1);
    }
}
