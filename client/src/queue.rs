//! Background processor for queued operations.
//!
//! Operations are closures producing a future. One processing loop runs at
//! a time; failed operations are requeued with a linear backoff until their
//! attempt budget is spent, then reported on the dropped channel.

use crate::error::ClientError;
use crate::now_ms;
use crate::store::OrderStore;
use comanda_engine::queue::DEFAULT_MAX_ATTEMPTS;
use comanda_engine::{FailOutcome, Mutation, OperationKind, PendingQueue};
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

type Execute = Arc<dyn Fn() -> BoxFuture<'static, Result<(), ClientError>> + Send + Sync>;

/// A queued unit of work.
#[derive(Clone)]
pub struct QueuedOp {
    execute: Execute,
}

impl fmt::Debug for QueuedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedOp").finish_non_exhaustive()
    }
}

/// An operation that ran out of attempts.
#[derive(Debug)]
pub struct DroppedOperation {
    pub id: u64,
    pub kind: OperationKind,
    pub attempts: u32,
    pub error: ClientError,
}

struct Inner {
    pending: Mutex<PendingQueue<QueuedOp>>,
    processing: AtomicBool,
    dropped_tx: mpsc::UnboundedSender<DroppedOperation>,
}

/// Priority queue of operations with a single background processor.
#[derive(Clone)]
pub struct OperationQueue {
    inner: Arc<Inner>,
}

impl OperationQueue {
    /// Create a queue and the receiving end of its dropped-operation channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DroppedOperation>) {
        let (dropped_tx, dropped_rx) = mpsc::unbounded_channel();
        let queue = Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(PendingQueue::new(DEFAULT_MAX_ATTEMPTS)),
                processing: AtomicBool::new(false),
                dropped_tx,
            }),
        };
        (queue, dropped_rx)
    }

    fn pending(&self) -> MutexGuard<'_, PendingQueue<QueuedOp>> {
        self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an operation and make sure the processor is running.
    /// Must be called within a tokio runtime.
    pub fn enqueue<F>(&self, kind: OperationKind, priority: i32, execute: F) -> u64
    where
        F: Fn() -> BoxFuture<'static, Result<(), ClientError>> + Send + Sync + 'static,
    {
        self.push(kind, priority, DEFAULT_MAX_ATTEMPTS, Arc::new(execute))
    }

    /// Queue a mutation against the store. Critical mutations get a single
    /// attempt.
    pub fn enqueue_mutation(&self, store: Arc<OrderStore>, mutation: Mutation, priority: i32) -> u64 {
        let attempts = if mutation.is_critical() {
            1
        } else {
            DEFAULT_MAX_ATTEMPTS
        };
        let kind = mutation.kind();
        let mutation = Arc::new(mutation);

        let execute: Execute = Arc::new(move || {
            let store = Arc::clone(&store);
            let mutation = Arc::clone(&mutation);
            async move { store.apply_mutation(&mutation).await.map(|_| ()) }.boxed()
        });
        self.push(kind, priority, attempts, execute)
    }

    fn push(&self, kind: OperationKind, priority: i32, max_attempts: u32, execute: Execute) -> u64 {
        let id = self.pending().push_with_attempts(
            kind,
            QueuedOp { execute },
            priority,
            max_attempts,
            now_ms(),
        );
        tracing::debug!(id, kind = ?kind, priority, "Operation queued");

        let queue = self.clone();
        tokio::spawn(async move { queue.process().await });
        id
    }

    /// Drain the queue. Returns immediately if another loop is running.
    pub async fn process(&self) {
        loop {
            if self
                .inner
                .processing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }

            self.drain().await;
            self.inner.processing.store(false, Ordering::Release);

            // An enqueue may have raced with the release of the flag
            if self.pending().is_empty() {
                return;
            }
        }
    }

    async fn drain(&self) {
        loop {
            let entry = self.pending().pop_front();
            let Some(entry) = entry else {
                return;
            };

            let execute = Arc::clone(&entry.payload.execute);
            match execute().await {
                Ok(()) => {
                    tracing::debug!(id = entry.id, kind = ?entry.kind, "Operation completed");
                }
                Err(error) => {
                    let (id, kind) = (entry.id, entry.kind);
                    let outcome = self.pending().fail_entry(entry);
                    match outcome {
                        FailOutcome::Requeued { delay_ms } => {
                            tracing::warn!(id, kind = ?kind, delay_ms, error = %error, "Operation failed, requeued");
                            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        }
                        FailOutcome::Dropped(entry) => {
                            tracing::error!(
                                id,
                                kind = ?kind,
                                attempts = entry.attempts,
                                error = %error,
                                "Operation dropped"
                            );
                            let _ = self.inner.dropped_tx.send(DroppedOperation {
                                id,
                                kind,
                                attempts: entry.attempts,
                                error,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Operations waiting, excluding the one running.
    pub fn size(&self) -> usize {
        self.pending().len()
    }

    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        let mut pending = self.pending();
        let cleared = pending.len();
        pending.clear();
        tracing::info!(cleared, "Operation queue cleared");
    }
}
