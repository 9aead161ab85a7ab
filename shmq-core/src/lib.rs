//! Shared-memory inter-process FIFO message queue.
//!
//! Processes on the same host attach to a named queue and exchange
//! variable-length byte messages through a fixed-size circular buffer in
//! shared memory, with no broker in between. Coordination is lock-free:
//! two atomic offsets in the queue header (head and tail) plus a small
//! atomic state machine in front of every message, driven by CAS from
//! both sides. An out-of-band wake-up signal parks idle subscribers; it is
//! a latency hint only and is never required for correctness.
//!
//! ```no_run
//! use shmq_core::{CancellationToken, Publisher, QueueOptions, Subscriber};
//!
//! let options = QueueOptions::new("sensor-frames", 64 * 1024);
//! let publisher = Publisher::new(options.clone())?;
//! let subscriber = Subscriber::new(options)?;
//!
//! publisher.try_enqueue(b"hello")?;
//! let body = subscriber.dequeue(&CancellationToken::new())?;
//! assert_eq!(body, b"hello");
//! # Ok::<(), shmq_core::QueueError>(())
//! ```
//!
//! Many publishers and many subscribers may share one queue, within and
//! across processes. Messages are delivered in FIFO order and each to
//! exactly one subscriber.

pub mod cancellation;
pub mod errors;

/// Shared region lifetime and mapping.
pub mod memory;

/// Publisher and subscriber endpoints.
pub mod queue;

/// Ring layout, atomic headers, and wrap-aware byte access.
pub mod ring;

/// Cross-process wake-up channel.
pub mod signal;

pub use cancellation::CancellationToken;
pub use errors::QueueError;
pub use queue::{Publisher, QueueOptions, Subscriber, DEFAULT_CAPACITY};
