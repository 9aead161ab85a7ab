//! The shared ring: byte-level buffer access and the atomic header records.

mod buffer;
mod header;

pub use buffer::{advance, align_up, frame_length, CircularBuffer};
pub use header::{
    MessageHeader, MessageState, QueueHeader, MESSAGE_HEADER_SIZE, QUEUE_HEADER_SIZE,
};
