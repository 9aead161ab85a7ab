//! Rough single-process throughput measurement.
//!
//! One publisher and one subscriber thread push a fixed number of small
//! messages through a queue as fast as they can and report the rate. Not
//! a benchmark harness, just a smoke-level number.

use std::thread;
use std::time::Instant;

use anyhow::Result;
use shmq_core::{CancellationToken, Publisher, QueueOptions, Subscriber};

const MESSAGES: u32 = 1_000_000;
const BODY_LEN: usize = 32;

fn main() -> Result<()> {
    // Override any leftover region from an interrupted run, then attach
    // the subscriber non-destructively.
    let mut options = QueueOptions::new("shmq-demo-throughput", 1024 * 1024);
    options.create_or_override = true;
    let publisher = Publisher::new(options.clone())?;
    options.create_or_override = false;
    let subscriber = Subscriber::new(options)?;

    let start = Instant::now();

    let producer = thread::spawn(move || -> Result<()> {
        let token = CancellationToken::new();
        let mut body = [0u8; BODY_LEN];
        for i in 0..MESSAGES {
            body[..4].copy_from_slice(&i.to_le_bytes());
            publisher.enqueue(&body, &token)?;
        }
        Ok(())
    });

    let consumer = thread::spawn(move || -> Result<u64> {
        let token = CancellationToken::new();
        let mut buffer = Vec::with_capacity(BODY_LEN);
        let mut checksum = 0u64;
        for _ in 0..MESSAGES {
            subscriber.dequeue_into(&mut buffer, &token)?;
            checksum += u64::from(buffer[0]);
        }
        Ok(checksum)
    });

    producer.join().expect("producer panicked")?;
    let checksum = consumer.join().expect("consumer panicked")?;

    let elapsed = start.elapsed();
    let rate = f64::from(MESSAGES) / elapsed.as_secs_f64();
    println!(
        "{} messages of {} bytes in {:?} ({:.0} msg/s, checksum {})",
        MESSAGES, BODY_LEN, elapsed, rate, checksum
    );
    Ok(())
}
