//! Subscriber-side wake-up receiver.
//!
//! The client discovers a server socket for its queue by directory scan
//! and blocks on a one-byte read with a timeout. Connection loss is
//! repaired lazily on the next wait; with no server reachable the wait
//! degrades to a plain sleep, which is still correct because subscribers
//! poll shared state directly.

use std::fs;
use std::io::{ErrorKind, Read};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::errors::QueueError;
use crate::memory::queue_directory;
use crate::queue::QueueOptions;

pub struct SignalClient {
    queue_name: String,
    directory: PathBuf,
    stream: Mutex<Option<UnixStream>>,
}

impl SignalClient {
    /// Connectionless construction; the first `wait` discovers a server.
    pub fn new(options: &QueueOptions) -> Result<Self, QueueError> {
        Ok(Self {
            queue_name: options.queue_name.clone(),
            directory: queue_directory(&options.path),
            stream: Mutex::new(None),
        })
    }

    /// Parks until a release arrives or `timeout` elapses. Returns true if
    /// a wake-up byte was received. Spurious wake-ups and missed signals
    /// are both permitted; callers re-check the queue either way.
    pub fn wait(&self, timeout: Duration) -> bool {
        if timeout.is_zero() {
            return false;
        }

        let mut guard = self.lock();
        if guard.is_none() {
            *guard = self.discover();
        }
        let Some(stream) = guard.as_mut() else {
            drop(guard);
            thread::sleep(timeout);
            return false;
        };

        if stream.set_read_timeout(Some(timeout)).is_err() {
            *guard = None;
            return false;
        }
        let mut byte = [0u8; 1];
        match stream.read(&mut byte) {
            Ok(0) => {
                // EOF: server went away; reconnect on the next wait.
                *guard = None;
                false
            }
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => false,
            Err(e) => {
                debug!(error = %e, "signal connection lost");
                *guard = None;
                false
            }
        }
    }

    /// Drops the connection so the peer can clean up promptly. Idempotent.
    pub fn disconnect(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> MutexGuard<'_, Option<UnixStream>> {
        match self.stream.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Scans the queue directory for `<queue><digits>.sock` and connects
    /// to the first server that accepts.
    fn discover(&self) -> Option<UnixStream> {
        let entries = fs::read_dir(&self.directory).ok()?;
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let Some(rest) = file_name.strip_prefix(self.queue_name.as_str()) else {
                continue;
            };
            let Some(digits) = rest.strip_suffix(".sock") else {
                continue;
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            match UnixStream::connect(entry.path()) {
                Ok(stream) => return Some(stream),
                Err(e) => {
                    // Likely a stale socket file from a dead server.
                    debug!(path = %entry.path().display(), error = %e, "signal connect failed");
                }
            }
        }
        None
    }
}
