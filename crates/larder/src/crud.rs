// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use futures_util::stream::BoxStream;

use crate::pending::{KeyFn, PendingChanges, PendingWorker};
use crate::source_of_truth::SourceOfTruth;
use crate::{
    CrudOperation, Entity, Fetcher, FetcherResult, Key, Mapper, PendingChange, ResponseOrigin, SameEntityMapper, Store, StoreConfig,
    StoreError, StoreImpl, StoreRequest, StoreResponse,
};

/// Performs one remote write.
///
/// The write counterpart of [`Fetcher`]. A write is confirmed by returning
/// [`FetcherResult::Data`] with the entity the remote stored, or [`FetcherResult::Success`]
/// with `true`; anything else makes the [`CrudStore`] try again later.
///
/// Implemented for closures taking the key, the entity and the [`CrudOperation`].
pub trait Sender<K, I>: Send + Sync {
    /// Sends `entity` for `key` to the remote source.
    fn send(&self, key: K, entity: I, operation: CrudOperation) -> impl Future<Output = FetcherResult<I>> + Send;
}

impl<K, I, F, Fut> Sender<K, I> for F
where
    F: Fn(K, I, CrudOperation) -> Fut + Send + Sync,
    Fut: Future<Output = FetcherResult<I>> + Send,
{
    fn send(&self, key: K, entity: I, operation: CrudOperation) -> impl Future<Output = FetcherResult<I>> + Send {
        self(key, entity, operation)
    }
}

/// A [`Store`] that also writes.
///
/// Writes are applied to the source of truth immediately and return without waiting for the
/// remote source. A background worker then sends them with a [`Sender`], one at a time in the
/// order they were made, retrying each every second until the remote confirms it. The entity
/// the remote returns replaces the local one, under the key `key_fn` derives from it.
///
/// While a write for a key is pending, fetched entities for that key are reconciled with it:
/// a pending update wins over the fetched entity, and a pending create or delete causes the
/// fetched entity to be discarded.
///
/// Dropping the store, or calling [`dispose`][Self::dispose], stops the worker.
///
/// # Examples
///
/// ```
/// use larder::source_of_truth::SourceOfTruth;
/// use larder::{CrudOperation, CrudStore, FetcherResult, StoreConfig, fetcher_fn};
/// use tick::Clock;
///
/// #[derive(Clone)]
/// struct Note {
///     id: u64,
///     text: String,
/// }
///
/// # async fn example(clock: Clock, sot: impl SourceOfTruth<u64, Note> + 'static) {
/// let store = CrudStore::new(
///     fetcher_fn(|id: u64| async move { FetcherResult::data(Note { id, text: String::new() }) }),
///     |_: u64, note: Note, _: CrudOperation| async move { FetcherResult::data(note) },
///     sot,
///     |note: &Note| note.id,
///     StoreConfig::new(clock),
/// );
///
/// let created = store.create(1, Note { id: 1, text: "hello".into() }).await;
/// # let _ = created;
/// # }
/// ```
#[derive(Debug)]
pub struct CrudStore<K, I, T, F, S, M = SameEntityMapper> {
    store: StoreImpl<K, I, T, F, S, M>,
    changes: Arc<PendingChanges<K, T>>,
    worker: PendingWorker<K, T>,
}

impl<K, T, F, S> CrudStore<K, T, T, F, S>
where
    K: Key,
    T: Entity,
    F: Fetcher<K, T> + 'static,
    S: SourceOfTruth<K, T> + 'static,
{
    /// Creates a store whose fetcher and sender use the stored entity type.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    #[must_use]
    pub fn new(
        fetcher: F,
        sender: impl Sender<K, T> + 'static,
        source_of_truth: S,
        key_fn: impl Fn(&T) -> K + Send + Sync + 'static,
        config: StoreConfig,
    ) -> Self {
        Self::with_mapper(fetcher, sender, source_of_truth, SameEntityMapper, key_fn, config)
    }
}

impl<K, I, T, F, S, M> CrudStore<K, I, T, F, S, M>
where
    K: Key,
    I: Entity,
    T: Entity,
    F: Fetcher<K, I> + 'static,
    S: SourceOfTruth<K, T> + 'static,
    M: Mapper<I, T> + 'static,
{
    /// Creates a store converting between fetched and stored entities with `mapper`.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    #[must_use]
    pub fn with_mapper(
        fetcher: F,
        sender: impl Sender<K, I> + 'static,
        source_of_truth: S,
        mapper: M,
        key_fn: impl Fn(&T) -> K + Send + Sync + 'static,
        config: StoreConfig,
    ) -> Self {
        let changes = Arc::new(PendingChanges::new());
        let clock = config.clock().clone();
        let store = StoreImpl::from_parts(fetcher, source_of_truth, mapper, config, Some(Arc::clone(&changes)));
        let key_fn: KeyFn<K, T> = Arc::new(key_fn);

        let worker = PendingWorker::spawn(Arc::clone(&changes), store.clone(), sender, key_fn, clock);

        Self { store, changes, worker }
    }

    /// Writes a new entity locally and queues it for the remote source.
    pub async fn create(&self, key: K, entity: T) -> StoreResponse<T> {
        self.write(CrudOperation::Create, key, entity).await
    }

    /// Writes a modified entity locally and queues it for the remote source.
    pub async fn update(&self, key: K, entity: T) -> StoreResponse<T> {
        self.write(CrudOperation::Update, key, entity).await
    }

    /// Deletes an entity locally and queues the deletion for the remote source.
    ///
    /// Returns whether the source of truth held an entity for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] when the source of truth fails. Nothing is queued then.
    pub async fn delete(&self, key: K, entity: T) -> Result<bool, StoreError> {
        let removed = self.store.source_of_truth().delete(&key).await?;

        self.worker.submit(PendingChange {
            operation: CrudOperation::Delete,
            key,
            entity,
        });

        Ok(removed)
    }

    /// Returns the writes not yet confirmed by the remote source, oldest first.
    #[must_use]
    pub fn pending_changes(&self) -> Vec<PendingChange<K, T>> {
        self.changes.snapshot()
    }

    /// Returns the underlying read store.
    #[must_use]
    pub fn store(&self) -> &StoreImpl<K, I, T, F, S, M> {
        &self.store
    }

    /// Stops sending pending writes. Writes not yet confirmed are abandoned.
    pub fn dispose(&self) {
        self.worker.stop();
    }

    async fn write(&self, operation: CrudOperation, key: K, entity: T) -> StoreResponse<T> {
        match self.store.source_of_truth().store(&key, entity, false).await {
            Ok(stored) => {
                self.worker.submit(PendingChange {
                    operation,
                    key,
                    entity: stored.clone(),
                });
                StoreResponse::Data(stored, ResponseOrigin::SourceOfTruth)
            }
            Err(error) => StoreResponse::Error(error.into()),
        }
    }
}

impl<K, I, T, F, S, M> Store<K, T> for CrudStore<K, I, T, F, S, M>
where
    K: Key,
    I: Entity,
    T: Entity,
    F: Fetcher<K, I> + 'static,
    S: SourceOfTruth<K, T> + 'static,
    M: Mapper<I, T> + 'static,
{
    fn stream(&self, request: impl Into<StoreRequest<K>>) -> BoxStream<'static, StoreResponse<T>> {
        self.store.stream(request)
    }

    fn get(&self, request: impl Into<StoreRequest<K>>) -> impl Future<Output = StoreResponse<T>> + Send {
        self.store.get(request)
    }

    fn fetch(&self, request: impl Into<StoreRequest<K>>) -> impl Future<Output = StoreResponse<T>> + Send {
        self.store.fetch(request)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use futures_util::StreamExt;
    use tick::ClockControl;

    use super::*;
    use crate::testing::MockSourceOfTruth;
    use crate::{FetcherError, RateLimitPolicy, fetcher_fn};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Note {
        id: u32,
        text: &'static str,
    }

    fn note(id: u32, text: &'static str) -> Note {
        Note { id, text }
    }

    fn reads(text: &'static str) -> impl Fetcher<u32, Note> + 'static {
        fetcher_fn(move |id: u32| async move { FetcherResult::data(note(id, text)) }).with_rate_limit_policy(RateLimitPolicy::FetchAlways)
    }

    fn config() -> StoreConfig {
        StoreConfig::new(ClockControl::new().auto_advance_timers(true).to_clock())
    }

    async fn settle<K: Key, I: Entity, T: Entity, F, S, M>(store: &CrudStore<K, I, T, F, S, M>)
    where
        F: Fetcher<K, I> + 'static,
        S: SourceOfTruth<K, T> + 'static,
        M: Mapper<I, T> + 'static,
    {
        while !store.pending_changes().is_empty() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn create_is_optimistic_and_replaced_by_confirmed_entity() {
        let store = CrudStore::new(
            reads("remote"),
            |_: u32, entity: Note, _: CrudOperation| async move { FetcherResult::data(Note { id: 100, ..entity }) },
            MockSourceOfTruth::new(),
            |note: &Note| note.id,
            config(),
        );

        let response = store.create(1, note(1, "draft")).await;
        assert!(matches!(response, StoreResponse::Data(ref n, ResponseOrigin::SourceOfTruth) if n.text == "draft"));

        settle(&store).await;

        let sot = store.store().source_of_truth();
        assert_eq!(sot.value(1), None);
        assert_eq!(sot.value(100), Some(note(100, "draft")));
    }

    #[tokio::test]
    async fn failed_writes_are_retried_until_confirmed() {
        let attempts = Arc::new(AtomicU32::new(0));
        let store = CrudStore::new(
            reads("remote"),
            {
                let attempts = Arc::clone(&attempts);
                move |_: u32, entity: Note, _: CrudOperation| {
                    let attempts = Arc::clone(&attempts);
                    async move {
                        if attempts.fetch_add(1, Ordering::Relaxed) < 3 {
                            FetcherResult::error(FetcherError::http(503, "busy"))
                        } else {
                            FetcherResult::data(entity)
                        }
                    }
                }
            },
            MockSourceOfTruth::new(),
            |note: &Note| note.id,
            config(),
        );

        let _ = store.update(2, note(2, "edited")).await;
        settle(&store).await;

        assert_eq!(attempts.load(Ordering::Relaxed), 4);
        assert_eq!(store.store().source_of_truth().value(2), Some(note(2, "edited")));
    }

    #[tokio::test]
    async fn writes_are_sent_in_submission_order() {
        let sent = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let store = CrudStore::new(
            reads("remote"),
            {
                let sent = Arc::clone(&sent);
                move |key: u32, _: Note, operation: CrudOperation| {
                    sent.lock().push((operation, key));
                    async { FetcherResult::Success(true) }
                }
            },
            MockSourceOfTruth::new(),
            |note: &Note| note.id,
            config(),
        );

        let _ = store.create(1, note(1, "a")).await;
        let _ = store.update(1, note(1, "b")).await;
        assert!(store.delete(1, note(1, "b")).await.expect("storage works"));
        settle(&store).await;

        assert_eq!(
            *sent.lock(),
            vec![(CrudOperation::Create, 1), (CrudOperation::Update, 1), (CrudOperation::Delete, 1)]
        );
        assert_eq!(store.store().source_of_truth().value(1), None);
    }

    #[tokio::test]
    async fn pending_update_wins_over_fetch() {
        let store = CrudStore::new(
            reads("remote"),
            |_: u32, _: Note, _: CrudOperation| async { FetcherResult::<Note>::error(FetcherError::http(503, "busy")) },
            MockSourceOfTruth::new(),
            |note: &Note| note.id,
            StoreConfig::new(ClockControl::new().to_clock()),
        );

        let _ = store.update(3, note(3, "local")).await;
        let fetched = store.fetch_key(3, true).await;

        assert!(matches!(fetched, StoreResponse::Data(ref n, ResponseOrigin::Fetcher) if n.text == "local"));
        assert_eq!(store.pending_changes().len(), 1);
    }

    #[tokio::test]
    async fn pending_create_discards_fetch() {
        let store = CrudStore::new(
            reads("remote"),
            |_: u32, _: Note, _: CrudOperation| async { FetcherResult::<Note>::no_data("offline") },
            MockSourceOfTruth::new(),
            |note: &Note| note.id,
            StoreConfig::new(ClockControl::new().to_clock()),
        );

        let _ = store.create(4, note(4, "local")).await;
        let fetched = store.fetch_key(4, true).await;

        assert!(matches!(fetched, StoreResponse::NoData(ref m) if m == "Ignored because of pending operations in queue"));
        assert_eq!(store.store().source_of_truth().value(4), Some(note(4, "local")));
    }

    #[tokio::test]
    async fn stream_observes_confirmation() {
        let store = CrudStore::new(
            reads("remote"),
            |_: u32, entity: Note, _: CrudOperation| async move {
                FetcherResult::data(Note {
                    text: "confirmed",
                    ..entity
                })
            },
            MockSourceOfTruth::new(),
            |note: &Note| note.id,
            config(),
        );

        let _ = store.update(5, note(5, "draft")).await;
        let mut stream = store.stream_key(5, false);

        let first = stream.next().await.and_then(|response| response.data().cloned());
        let second = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("confirmation arrives")
            .and_then(|response| response.data().cloned());

        assert_eq!(first.map(|n| n.text), Some("draft"));
        assert_eq!(second.map(|n| n.text), Some("confirmed"));
    }

    #[tokio::test]
    async fn dispose_stops_worker() {
        let sent = Arc::new(AtomicU32::new(0));
        let store = CrudStore::new(
            reads("remote"),
            {
                let sent = Arc::clone(&sent);
                move |_: u32, entity: Note, _: CrudOperation| {
                    sent.fetch_add(1, Ordering::Relaxed);
                    async move { FetcherResult::data(entity) }
                }
            },
            MockSourceOfTruth::new(),
            |note: &Note| note.id,
            config(),
        );

        store.dispose();
        let response = store.create(6, note(6, "local only")).await;

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(response.is_data());
        assert_eq!(sent.load(Ordering::Relaxed), 0);
        assert_eq!(store.store().source_of_truth().value(6), Some(note(6, "local only")));
    }
}
