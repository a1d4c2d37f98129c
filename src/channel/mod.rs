//! Bounded FIFO channel shared by every producer and consumer
//!
//! Two fair semaphores gate a plain deque: `slots` counts free capacity,
//! `filled` counts queued elements. A `put` holds a slot permit before it
//! touches the deque, so the deque can never grow past capacity. Every wait
//! also races the caller's cancellation token.

use crate::error::ChannelError;
use crate::types::Envelope;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Channel carrying pipeline envelopes
pub type ItemChannel = BoundedChannel<Envelope>;

/// Result of a bounded `take`
#[derive(Debug, PartialEq, Eq)]
pub enum Take<T> {
    Item(T),
    /// The wait elapsed with nothing to deliver
    Empty,
}

pub struct BoundedChannel<T> {
    queue: Mutex<VecDeque<T>>,
    slots: Semaphore,
    filled: Semaphore,
    capacity: usize,
    high_water: AtomicUsize,
}

impl<T> BoundedChannel<T> {
    /// # Panics
    /// If `capacity` is zero. Configuration validation rejects that earlier.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be greater than zero");
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            slots: Semaphore::new(capacity),
            filled: Semaphore::new(0),
            capacity,
            high_water: AtomicUsize::new(0),
        }
    }

    /// Append at the tail, waiting while the channel is full
    pub async fn put(&self, value: T, cancel: &CancellationToken) -> Result<(), ChannelError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChannelError::Cancelled),
            permit = self.slots.acquire() => permit.map_err(|_| ChannelError::Closed)?,
        };
        permit.forget();

        {
            let mut queue = self.queue.lock();
            queue.push_back(value);
            self.high_water.fetch_max(queue.len(), Ordering::Relaxed);
        }
        self.filled.add_permits(1);
        Ok(())
    }

    /// Remove the head, waiting at most `timeout` for one to arrive
    pub async fn take(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Take<T>, ChannelError> {
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChannelError::Cancelled),
            acquired = tokio::time::timeout(timeout, self.filled.acquire()) => acquired,
        };
        let permit = match acquired {
            Ok(permit) => permit.map_err(|_| ChannelError::Closed)?,
            Err(_) => return Ok(Take::Empty),
        };
        permit.forget();

        // a filled permit is only released after its push
        let value = self.queue.lock().pop_front();
        self.slots.add_permits(1);
        value.map(Take::Item).ok_or(ChannelError::Closed)
    }

    /// Permanently close. Pending and later waits fail with `Closed`.
    pub fn close(&self) {
        self.slots.close();
        self.filled.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest length ever observed right after an insert
    pub fn high_water_mark(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }
}
