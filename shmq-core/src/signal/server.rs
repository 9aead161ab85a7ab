//! Publisher-side wake-up fan-out over a unix domain socket.
//!
//! The server listens on `<dir>/<queue><N>.sock` where `N` is a random
//! numeric suffix, collects subscriber connections on a background accept
//! thread, and `release` writes one byte to every connected client. A
//! client that errors on send is dropped; subscribers reconnect lazily.

use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::QueueError;
use crate::memory::queue_directory;
use crate::queue::QueueOptions;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Writes that would park longer than this mean the client already has an
/// unread wake-up byte queued, which is just as good as a fresh one.
const SEND_TIMEOUT: Duration = Duration::from_millis(10);

pub struct SignalServer {
    clients: Arc<Mutex<Vec<UnixStream>>>,
    socket_path: PathBuf,
    shutdown: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

/// Random rather than wall-clock derived, so concurrent server startups
/// cannot collide on a stale socket inode.
fn random_suffix() -> u64 {
    let bytes = *Uuid::new_v4().as_bytes();
    u64::from_le_bytes(bytes[..8].try_into().unwrap()) % 1_000_000_000
}

impl SignalServer {
    /// Binds the socket and starts the accept thread.
    pub fn start(options: &QueueOptions) -> Result<Self, QueueError> {
        let directory = queue_directory(&options.path);
        fs::create_dir_all(&directory)?;
        let socket_path =
            directory.join(format!("{}{}.sock", options.queue_name, random_suffix()));

        let listener = UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;

        let clients: Arc<Mutex<Vec<UnixStream>>> = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_clients = Arc::clone(&clients);
        let thread_shutdown = Arc::clone(&shutdown);
        let accept_thread = thread::Builder::new()
            .name("shmq-signal-accept".into())
            .spawn(move || {
                while !thread_shutdown.load(Ordering::Acquire) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            let usable = stream.set_nonblocking(false).is_ok()
                                && stream.set_write_timeout(Some(SEND_TIMEOUT)).is_ok();
                            if usable {
                                lock(&thread_clients).push(stream);
                            }
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            thread::sleep(ACCEPT_POLL_INTERVAL);
                        }
                        Err(e) => {
                            warn!(error = %e, "signal accept failed");
                            thread::sleep(ACCEPT_POLL_INTERVAL);
                        }
                    }
                }
            })?;

        debug!(path = %socket_path.display(), "signal server listening");

        Ok(Self {
            clients,
            socket_path,
            shutdown,
            accept_thread: Mutex::new(Some(accept_thread)),
        })
    }

    /// Wakes every currently connected waiter. Best-effort: send errors
    /// drop the affected client and are never surfaced to the publisher.
    pub fn release(&self) {
        let mut clients = lock(&self.clients);
        clients.retain_mut(|client| match client.write_all(&[1]) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => true,
            Err(e) => {
                debug!(error = %e, "dropping signal client");
                false
            }
        });
    }

    /// Stops accepting, joins the accept thread, and removes the socket
    /// file. Idempotent; also run on drop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Ok(mut slot) = self.accept_thread.lock() {
            if let Some(handle) = slot.take() {
                let _ = handle.join();
            }
        }
        if let Err(e) = fs::remove_file(&self.socket_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.socket_path.display(), error = %e, "failed to remove signal socket");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn socket_path(&self) -> &std::path::Path {
        &self.socket_path
    }
}

fn lock(clients: &Mutex<Vec<UnixStream>>) -> std::sync::MutexGuard<'_, Vec<UnixStream>> {
    match clients.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Drop for SignalServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
