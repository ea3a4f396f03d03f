//! Inbound queue: message capability traits, sources, and the consumer.

pub mod consumer;
pub mod dlq;
pub mod memory;
pub mod message;
pub mod store_source;

pub use consumer::{QueueConsumer, spawn_consumer};
pub use memory::InMemoryQueue;
pub use message::{MessageOutcome, MessageSource, ReceivedMessage};
pub use store_source::DurableQueueSource;
