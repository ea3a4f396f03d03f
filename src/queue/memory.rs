//! Push-based in-memory queue for tests and embedded runs.
//!
//! Mirrors broker semantics closely enough for the consumer's state
//! machine: delivery counts, invisibility while claimed, explicit
//! [`InMemoryQueue::expire_locks`] standing in for the broker's visibility
//! timeout.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::QueueError;
use crate::queue::message::{MessageSource, ReceivedMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryState {
    Ready,
    Claimed,
    Completed,
    DeadLettered { reason: String, description: String },
}

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    subject: Option<String>,
    body: Vec<u8>,
    delivery_count: u32,
    state: EntryState,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    next_id: u64,
}

/// A dead-lettered message with its annotation, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLettered {
    pub id: String,
    pub reason: String,
    pub description: String,
}

#[derive(Clone, Default)]
pub struct InMemoryQueue {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a message; it becomes immediately receivable.
    pub fn push(&self, subject: Option<&str>, body: &[u8]) -> String {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = format!("m-{}", inner.next_id);
        inner.entries.push(Entry {
            id: id.clone(),
            subject: subject.map(String::from),
            body: body.to_vec(),
            delivery_count: 0,
            state: EntryState::Ready,
        });
        id
    }

    /// Make every claimed-but-unsettled message visible again, as the
    /// broker would when its lock expires.
    pub fn expire_locks(&self) {
        let mut inner = self.inner.lock().unwrap();
        for entry in &mut inner.entries {
            if entry.state == EntryState::Claimed {
                entry.state = EntryState::Ready;
            }
        }
    }

    pub fn completed_count(&self) -> usize {
        self.count(|e| matches!(e.state, EntryState::Completed))
    }

    pub fn ready_count(&self) -> usize {
        self.count(|e| matches!(e.state, EntryState::Ready))
    }

    pub fn claimed_count(&self) -> usize {
        self.count(|e| matches!(e.state, EntryState::Claimed))
    }

    pub fn dead_lettered(&self) -> Vec<DeadLettered> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter_map(|e| match &e.state {
                EntryState::DeadLettered {
                    reason,
                    description,
                } => Some(DeadLettered {
                    id: e.id.clone(),
                    reason: reason.clone(),
                    description: description.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&Entry) -> bool) -> usize {
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|e| predicate(e))
            .count()
    }

    fn settle(&self, id: &str, state: EntryState) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| e.id == id && e.state == EntryState::Claimed)
            .ok_or_else(|| QueueError::Settle {
                message_id: id.to_string(),
                reason: "message is not claimed".to_string(),
            })?;
        entry.state = state;
        Ok(())
    }
}

#[async_trait]
impl MessageSource for InMemoryQueue {
    async fn receive(&self) -> Result<Option<Box<dyn ReceivedMessage>>, QueueError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner
            .entries
            .iter_mut()
            .find(|e| e.state == EntryState::Ready)
        else {
            return Ok(None);
        };

        entry.state = EntryState::Claimed;
        entry.delivery_count += 1;

        Ok(Some(Box::new(InMemoryMessage {
            queue: self.clone(),
            id: entry.id.clone(),
            subject: entry.subject.clone(),
            body: entry.body.clone(),
            delivery_count: entry.delivery_count,
        })))
    }
}

struct InMemoryMessage {
    queue: InMemoryQueue,
    id: String,
    subject: Option<String>,
    body: Vec<u8>,
    delivery_count: u32,
}

#[async_trait]
impl ReceivedMessage for InMemoryMessage {
    fn message_id(&self) -> &str {
        &self.id
    }

    fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    async fn complete(&self) -> Result<(), QueueError> {
        self.queue.settle(&self.id, EntryState::Completed)
    }

    async fn dead_letter(&self, reason: &str, description: &str) -> Result<(), QueueError> {
        self.queue.settle(
            &self.id,
            EntryState::DeadLettered {
                reason: reason.to_string(),
                description: description.to_string(),
            },
        )
    }
}
