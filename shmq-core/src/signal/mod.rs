//! Cross-process wake-up signal.
//!
//! The signal is a latency hint, never a correctness primitive: `release`
//! wakes at least one parked waiter if any is parked at that moment, and
//! `wait` returns on release or timeout. Subscribers always re-poll the
//! shared ring state after waking, so lost or coalesced signals only cost
//! one back-off interval.
//!
//! Transports: a named kernel semaphore on Windows, a domain-socket
//! fan-out on POSIX (there is no portable leak-free named semaphore
//! there).

#[cfg(unix)]
mod client;
#[cfg(windows)]
mod semaphore;
#[cfg(unix)]
mod server;

#[cfg(unix)]
pub use client::SignalClient;
#[cfg(windows)]
pub use semaphore::{SignalClient, SignalServer};
#[cfg(unix)]
pub use server::SignalServer;
