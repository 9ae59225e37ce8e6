//! Priority queue of pending operations with bounded retries.
//!
//! Only the bookkeeping lives here: ordering, attempt counting and the
//! backoff to wait before an entry comes around again. Executing entries is
//! up to the owner.

use crate::{OperationKind, Timestamp};
use std::collections::VecDeque;

/// Default attempt budget per entry.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base of the linear requeue backoff.
pub const REQUEUE_BACKOFF_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry<T> {
    pub id: u64,
    pub kind: OperationKind,
    pub payload: T,
    /// Higher runs first
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: Timestamp,
}

/// What happened to a failed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome<T> {
    /// Moved to the tail; wait `delay_ms` before processing again
    Requeued { delay_ms: u64 },
    /// Attempt budget exhausted, entry removed
    Dropped(QueueEntry<T>),
}

#[derive(Debug, Clone)]
pub struct PendingQueue<T> {
    entries: VecDeque<QueueEntry<T>>,
    next_id: u64,
    max_attempts: u32,
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl<T> PendingQueue<T> {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: 1,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Add an entry and keep the queue sorted by descending priority.
    /// Entries of equal priority stay in insertion order.
    pub fn push(&mut self, kind: OperationKind, payload: T, priority: i32, now: Timestamp) -> u64 {
        let max_attempts = self.max_attempts;
        self.push_with_attempts(kind, payload, priority, max_attempts, now)
    }

    /// Like [`push`](Self::push) with a per-entry attempt budget.
    pub fn push_with_attempts(
        &mut self,
        kind: OperationKind,
        payload: T,
        priority: i32,
        max_attempts: u32,
        now: Timestamp,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        self.entries.push_back(QueueEntry {
            id,
            kind,
            payload,
            priority,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            enqueued_at: now,
        });
        self.entries
            .make_contiguous()
            .sort_by(|a, b| b.priority.cmp(&a.priority));

        id
    }

    pub fn front(&self) -> Option<&QueueEntry<T>> {
        self.entries.front()
    }

    pub fn pop_front(&mut self) -> Option<QueueEntry<T>> {
        self.entries.pop_front()
    }

    /// Remove the head after it ran successfully.
    pub fn complete(&mut self) -> Option<QueueEntry<T>> {
        self.entries.pop_front()
    }

    /// Record a failure of the head entry.
    pub fn fail(&mut self) -> Option<FailOutcome<T>> {
        let entry = self.entries.pop_front()?;
        Some(self.fail_entry(entry))
    }

    /// Record a failure of an entry taken off the queue with
    /// [`pop_front`](Self::pop_front).
    pub fn fail_entry(&mut self, mut entry: QueueEntry<T>) -> FailOutcome<T> {
        entry.attempts += 1;
        if entry.attempts >= entry.max_attempts {
            return FailOutcome::Dropped(entry);
        }

        let delay_ms = REQUEUE_BACKOFF_MS * u64::from(entry.attempts);
        self.entries.push_back(entry);
        FailOutcome::Requeued { delay_ms }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry<T>> {
        self.entries.iter()
    }
}
