//! Core types flowing through the pipeline

use crate::error::ItemError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Opaque item identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Unit of work carried from a producer to a consumer.
///
/// Both timing markers are write-once: the producer stamps `created_at`
/// before the item can be enqueued, the dequeuing consumer stamps
/// `completed_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    id: ItemId,
    created_at: Option<Instant>,
    completed_at: Option<Instant>,
}

impl Item {
    pub fn new() -> Self {
        Self::with_id(ItemId::random())
    }

    pub fn with_id(id: ItemId) -> Self {
        Self {
            id,
            created_at: None,
            completed_at: None,
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn created_at(&self) -> Option<Instant> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<Instant> {
        self.completed_at
    }

    pub fn stamp_created(&mut self, at: Instant) -> Result<(), ItemError> {
        if self.created_at.is_some() {
            return Err(ItemError::AlreadyStamped("created"));
        }
        self.created_at = Some(at);
        Ok(())
    }

    pub fn stamp_completed(&mut self, at: Instant) -> Result<(), ItemError> {
        let created = self.created_at.ok_or(ItemError::NotCreated)?;
        if self.completed_at.is_some() {
            return Err(ItemError::AlreadyStamped("completed"));
        }
        // Instant is monotonic, but a caller-supplied stamp may still be older
        self.completed_at = Some(at.max(created));
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.created_at.is_some() && self.completed_at.is_some()
    }

    /// End-to-end latency, once both markers are set
    pub fn latency(&self) -> Option<Duration> {
        match (self.created_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }
}

impl Default for Item {
    fn default() -> Self {
        Self::new()
    }
}

/// Element type of the bounded channel.
///
/// The termination marker is its own variant so it can never be mistaken
/// for a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Data(Item),
    Terminate,
}

/// Worker roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Producer,
    Consumer,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRole::Producer => f.write_str("producer"),
            WorkerRole::Consumer => f.write_str("consumer"),
        }
    }
}

/// Worker identity, 1-based within its role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId {
    pub role: WorkerRole,
    pub index: usize,
}

impl WorkerId {
    pub fn producer(index: usize) -> Self {
        Self {
            role: WorkerRole::Producer,
            index,
        }
    }

    pub fn consumer(index: usize) -> Self {
        Self {
            role: WorkerRole::Consumer,
            index,
        }
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.role, self.index)
    }
}

/// Whole milliseconds, truncating
pub fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
