//! Pending and failed task intents.
//!
//! The processor only talks to the [`TaskQueue`] trait, so the in-memory
//! [`MemoryQueue`] can be swapped for a bounded or persistent backend.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::models::TaskIntent;

/// Where [`TaskQueue::retry_all`] puts failed intents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPosition {
    /// After all pending work.
    #[default]
    Back,
    /// Ahead of all pending work, in failure order.
    Front,
}

pub trait TaskQueue: Send + Sync {
    /// Append an intent to the pending list.
    fn enqueue(&self, intent: TaskIntent);

    /// Pop the oldest pending intent.
    fn dequeue_next(&self) -> Option<TaskIntent>;

    /// Annotate `intent` with `error` and append it to the failed list.
    fn fail(&self, intent: TaskIntent, error: String);

    /// Move every failed intent back to pending. Returns how many moved.
    ///
    /// The `error` annotation is left in place.
    fn retry_all(&self) -> usize;

    /// Snapshot of the failed list in failure order.
    fn list_failed(&self) -> Vec<TaskIntent>;

    fn pending_len(&self) -> usize;

    fn failed_len(&self) -> usize;
}

#[derive(Default)]
struct Lists {
    pending: VecDeque<TaskIntent>,
    failed: Vec<TaskIntent>,
}

/// Unbounded in-memory queue. Both lists share one lock so a retry is a
/// single atomic move.
#[derive(Default)]
pub struct MemoryQueue {
    lists: Mutex<Lists>,
    retry_position: RetryPosition,
}

impl MemoryQueue {
    pub fn new(retry_position: RetryPosition) -> Self {
        Self {
            lists: Mutex::default(),
            retry_position,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lists> {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskQueue for MemoryQueue {
    fn enqueue(&self, intent: TaskIntent) {
        self.lock().pending.push_back(intent);
    }

    fn dequeue_next(&self) -> Option<TaskIntent> {
        self.lock().pending.pop_front()
    }

    fn fail(&self, mut intent: TaskIntent, error: String) {
        intent.error = Some(error);
        self.lock().failed.push(intent);
    }

    fn retry_all(&self) -> usize {
        let mut lists = self.lock();
        let failed = std::mem::take(&mut lists.failed);
        let moved = failed.len();
        match self.retry_position {
            RetryPosition::Back => lists.pending.extend(failed),
            RetryPosition::Front => {
                for intent in failed.into_iter().rev() {
                    lists.pending.push_front(intent);
                }
            }
        }
        moved
    }

    fn list_failed(&self) -> Vec<TaskIntent> {
        self.lock().failed.clone()
    }

    fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    fn failed_len(&self) -> usize {
        self.lock().failed.len()
    }
}
