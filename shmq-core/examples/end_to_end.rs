//! End-to-end publisher/subscriber demo over one named queue.
//!
//! A producer thread publishes a handful of messages while a consumer
//! thread drains them through the blocking dequeue, exercising the
//! wake-up signal along the way.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use shmq_core::{CancellationToken, Publisher, QueueOptions, Subscriber};

const MESSAGES: usize = 5;

fn main() -> Result<()> {
    let options = QueueOptions::new("shmq-demo-e2e", 4096);
    println!(
        "Queue '{}' with a {}-byte ring",
        options.queue_name, options.capacity
    );

    let producer_options = options.clone();
    let producer = thread::spawn(move || -> Result<()> {
        let publisher = Publisher::new(producer_options)?;
        let token = CancellationToken::new();

        for i in 0..MESSAGES {
            let body = format!("message {}", i);
            publisher.enqueue(body.as_bytes(), &token)?;
            println!("Producer: sent '{}'", body);
            thread::sleep(Duration::from_millis(200));
        }

        println!("Producer: done");
        Ok(())
    });

    let consumer_options = options;
    let consumer = thread::spawn(move || -> Result<()> {
        let subscriber = Subscriber::new(consumer_options)?;
        let token = CancellationToken::new();

        for _ in 0..MESSAGES {
            let body = subscriber.dequeue(&token)?;
            println!("Consumer: received '{}'", String::from_utf8_lossy(&body));
        }

        println!("Consumer: done");
        Ok(())
    });

    producer.join().expect("producer panicked")?;
    consumer.join().expect("consumer panicked")?;

    println!("Demo completed successfully!");
    Ok(())
}
