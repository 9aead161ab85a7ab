//! Queue configuration.

use std::env;
use std::path::PathBuf;

use crate::errors::QueueError;
use crate::ring::QUEUE_HEADER_SIZE;

/// Default ring capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Options shared by publishers and subscribers of one queue.
///
/// The same `(path, queue_name)` pair designates the same queue for every
/// process on the host.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Name of the queue; used in OS object names and filenames.
    pub queue_name: String,

    /// Directory under which the backing file and signal sockets live
    /// (POSIX; ignored on Windows).
    pub path: PathBuf,

    /// Ring size in bytes. Must be positive and a multiple of 8; it need
    /// not be a power of two.
    pub capacity: usize,

    /// If true and the backing file already exists, re-create it
    /// (truncating) and take over delete-on-dispose ownership. Last writer
    /// wins when two such openers race.
    pub create_or_override: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            queue_name: String::new(),
            path: env::temp_dir(),
            capacity: DEFAULT_CAPACITY,
            create_or_override: false,
        }
    }
}

impl QueueOptions {
    pub fn new(queue_name: impl Into<String>, capacity: usize) -> Self {
        Self {
            queue_name: queue_name.into(),
            capacity,
            ..Self::default()
        }
    }

    /// Total mapping size: queue header plus ring.
    pub fn bytes_capacity(&self) -> usize {
        QUEUE_HEADER_SIZE + self.capacity
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.queue_name.is_empty() {
            return Err(QueueError::InvalidOption(
                "queue name must not be empty".into(),
            ));
        }
        if !self
            .queue_name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(QueueError::InvalidOption(format!(
                "queue name '{}' may only contain ASCII letters, digits, '_' and '-'",
                self.queue_name
            )));
        }
        if self.capacity == 0 {
            return Err(QueueError::InvalidOption(
                "capacity must be positive".into(),
            ));
        }
        if self.capacity % 8 != 0 {
            return Err(QueueError::InvalidOption(format!(
                "capacity {} is not a multiple of 8",
                self.capacity
            )));
        }
        Ok(())
    }
}
