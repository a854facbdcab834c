//! Streamed agent output: event types and the wire decoder.

pub mod decoder;
pub mod events;

pub use decoder::{EventStream, EventStreamDecoder, Framing};
pub use events::StreamEvent;
