//! Error type for the queue.
//!
//! Queue-full and queue-empty are not errors: `try_enqueue` returns
//! `Ok(false)` and `try_dequeue` returns `Ok(None)` for those. Everything
//! that genuinely fails an operation is a [`QueueError`].

use std::{fmt, io};

#[derive(Debug)]
pub enum QueueError {
    /// An option was out of range or malformed; raised at construction.
    InvalidOption(String),

    /// Attach found an existing region whose size does not match the
    /// requested one.
    AlreadyExistsIncompatible { expected: usize, actual: usize },

    /// The message frame (header plus body, padded) exceeds the ring
    /// capacity. The queue state is unchanged.
    MessageTooLarge { body: usize, capacity: usize },

    /// Cancellation tripped at a suspension point, or the queue endpoint
    /// was disposed. The queue state is unchanged.
    Cancelled,

    /// A backing file or socket operation failed.
    Io(io::Error),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::InvalidOption(s) => write!(f, "invalid queue option: {}", s),
            QueueError::AlreadyExistsIncompatible { expected, actual } => write!(
                f,
                "existing shared region has size {} but {} was requested",
                actual, expected
            ),
            QueueError::MessageTooLarge { body, capacity } => write!(
                f,
                "message body of {} bytes does not fit a ring of {} bytes",
                body, capacity
            ),
            QueueError::Cancelled => write!(f, "operation was cancelled"),
            QueueError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueueError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for QueueError {
    fn from(err: io::Error) -> Self {
        QueueError::Io(err)
    }
}
