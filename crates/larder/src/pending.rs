// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Local writes waiting to be confirmed by the remote source.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tick::Clock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::source_of_truth::SourceOfTruth;
use crate::{Entity, Fetcher, FetcherResult, Key, Mapper, Sender, StoreImpl};

/// Delay between two attempts to send the same pending change.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// The kind of a local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CrudOperation {
    /// The entity was created locally.
    Create,
    /// The entity was modified locally.
    Update,
    /// The entity was deleted locally.
    Delete,
}

impl Display for CrudOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// A local write that the remote source has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange<K, T> {
    /// The kind of write.
    pub operation: CrudOperation,
    /// The key the write applies to.
    pub key: K,
    /// The entity as written locally.
    pub entity: T,
}

/// The writes queued on a [`PendingWorker`], in submission order.
#[derive(Debug)]
pub(crate) struct PendingChanges<K, T> {
    changes: Mutex<Queue<K, T>>,
}

#[derive(Debug)]
struct Queue<K, T> {
    next_id: u64,
    entries: Vec<(u64, PendingChange<K, T>)>,
}

impl<K: Key, T: Entity> PendingChanges<K, T> {
    pub(crate) fn new() -> Self {
        Self {
            changes: Mutex::new(Queue {
                next_id: 0,
                entries: Vec::new(),
            }),
        }
    }

    fn push(&self, change: PendingChange<K, T>) -> u64 {
        let mut queue = self.changes.lock();
        let id = queue.next_id;
        queue.next_id = queue.next_id.wrapping_add(1);
        queue.entries.push((id, change));
        id
    }

    fn remove(&self, id: u64) {
        self.changes.lock().entries.retain(|(entry, _)| *entry != id);
    }

    pub(crate) fn snapshot(&self) -> Vec<PendingChange<K, T>> {
        self.changes.lock().entries.iter().map(|(_, change)| change.clone()).collect()
    }

    /// Reconciles a freshly fetched `entity` with the writes pending for `key`.
    ///
    /// Returns the entity to store, or `None` when a pending create or delete means the fetched
    /// entity must be discarded. A pending update replaces the fetched entity with the local one.
    pub(crate) fn apply(&self, key: &K, entity: T) -> Option<T> {
        let key = key.to_string();
        let queue = self.changes.lock();

        let mut entity = entity;
        let mut keep = true;
        for (_, change) in queue.entries.iter().filter(|(_, change)| change.key.to_string() == key) {
            entity = change.entity.clone();
            if change.operation != CrudOperation::Update {
                keep = false;
            }
        }

        keep.then_some(entity)
    }
}

/// Sends pending changes to the remote source, one at a time and in submission order.
///
/// A change is retried every second until the remote confirms it, either by returning the
/// entity it stored or by acknowledging the operation. A returned entity replaces the local one,
/// stored under the key derived from it; for creates the optimistic entry is deleted first.
///
/// Dropping the worker stops it. Changes still queued are abandoned.
#[derive(Debug)]
pub(crate) struct PendingWorker<K, T> {
    changes: Arc<PendingChanges<K, T>>,
    queue: mpsc::UnboundedSender<u64>,
    task: JoinHandle<()>,
}

pub(crate) type KeyFn<K, T> = Arc<dyn Fn(&T) -> K + Send + Sync>;

impl<K: Key, T: Entity> PendingWorker<K, T> {
    /// Starts the worker on the current Tokio runtime.
    pub(crate) fn spawn<I, F, S, M, X>(
        changes: Arc<PendingChanges<K, T>>,
        store: StoreImpl<K, I, T, F, S, M>,
        sender: X,
        key_fn: KeyFn<K, T>,
        clock: Clock,
    ) -> Self
    where
        I: Entity,
        F: Fetcher<K, I> + 'static,
        S: SourceOfTruth<K, T> + 'static,
        M: Mapper<I, T> + 'static,
        X: Sender<K, I> + 'static,
    {
        let (queue, mut receiver) = mpsc::unbounded_channel::<u64>();
        let worker_changes = Arc::clone(&changes);

        let task = tokio::spawn(async move {
            let context = Context {
                store,
                sender,
                key_fn,
                clock,
            };

            while let Some(id) = receiver.recv().await {
                let change = worker_changes
                    .changes
                    .lock()
                    .entries
                    .iter()
                    .find(|(entry, _)| *entry == id)
                    .map(|(_, change)| change.clone());

                if let Some(change) = change {
                    context.confirm(change).await;
                    worker_changes.remove(id);
                }
            }
        });

        Self { changes, queue, task }
    }

    /// Queues `change` behind every change submitted before it.
    pub(crate) fn submit(&self, change: PendingChange<K, T>) {
        let id = self.changes.push(change);

        if self.queue.send(id).is_err() {
            // The worker is gone, so the change can never be confirmed.
            self.changes.remove(id);
        }
    }

    pub(crate) fn stop(&self) {
        self.task.abort();
    }
}

impl<K, T> Drop for PendingWorker<K, T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Context<K, I, T, F, S, M, X> {
    store: StoreImpl<K, I, T, F, S, M>,
    sender: X,
    key_fn: KeyFn<K, T>,
    clock: Clock,
}

impl<K, I, T, F, S, M, X> Context<K, I, T, F, S, M, X>
where
    K: Key,
    I: Entity,
    T: Entity,
    F: Fetcher<K, I> + 'static,
    S: SourceOfTruth<K, T> + 'static,
    M: Mapper<I, T> + 'static,
    X: Sender<K, I>,
{
    async fn confirm(&self, change: PendingChange<K, T>) {
        let mut attempt: u32 = 0;

        loop {
            let entity = self.store.mapper().to_fetcher(change.entity.clone());

            match self.sender.send(change.key.clone(), entity, change.operation).await {
                FetcherResult::Data { value, .. } => {
                    self.replace(&change, value).await;
                    return;
                }
                FetcherResult::Success(true) => return,
                result => {
                    attempt = attempt.saturating_add(1);
                    tracing::event!(
                        name: "larder.pending.failed",
                        tracing::Level::WARN,
                        pending.operation = %change.operation,
                        pending.key = %change.key,
                        pending.attempt = attempt,
                        pending.reason = %rejection(&result),
                    );
                    self.clock.delay(RETRY_DELAY).await;
                }
            }
        }
    }

    async fn replace(&self, change: &PendingChange<K, T>, confirmed: I) {
        let source_of_truth = self.store.source_of_truth();

        if change.operation == CrudOperation::Create {
            if let Err(error) = source_of_truth.delete(&change.key).await {
                tracing::event!(
                    name: "larder.pending.storage_failed",
                    tracing::Level::WARN,
                    pending.key = %change.key,
                    error = %error,
                );
            }
        }

        let confirmed = self.store.mapper().to_source_of_truth(confirmed);
        let key = (self.key_fn)(&confirmed);

        if let Err(error) = source_of_truth.store(&key, confirmed, false).await {
            tracing::event!(
                name: "larder.pending.storage_failed",
                tracing::Level::WARN,
                pending.key = %key,
                error = %error,
            );
        }
    }
}

fn rejection<I>(result: &FetcherResult<I>) -> String {
    match result {
        FetcherResult::Error(error) => error.to_string(),
        FetcherResult::NoData(message) => message.clone(),
        FetcherResult::Success(_) | FetcherResult::Data { .. } => "not acknowledged".to_string(),
    }
}
