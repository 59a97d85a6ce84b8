// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::future::ready;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};

use crate::pending::PendingChanges;
use crate::source_of_truth::SourceOfTruth;
use crate::{
    Entity, Fetcher, FetcherController, FetcherResult, Key, Mapper, ResponseOrigin, SameEntityMapper, StoreConfig, StoreError,
    StoreRequest, StoreResponse,
};

/// Message of the [`StoreResponse::NoData`] returned when a fetched entity is discarded because
/// a local write for the same key is still pending.
const IGNORED_PENDING: &str = "Ignored because of pending operations in queue";

/// Read access to entities that are cached locally and refreshed from a remote source.
///
/// Every operation accepts a [`StoreRequest`] or a bare key.
pub trait Store<K, T>: Send + Sync {
    /// Streams the entity stored for the requested key.
    ///
    /// When the key is stored, the stream starts with the stored entity and follows every
    /// change to it. With [`refresh`][StoreRequest::refresh] set, a fetch runs alongside and
    /// its result reaches the stream through the change it makes to storage.
    ///
    /// When the key is missing, the store fetches it first (unless
    /// [`fetch_when_no_data_found`][StoreRequest::fetch_when_no_data_found] is unset) and then
    /// follows storage.
    ///
    /// Failed fetches are emitted as [`StoreResponse::Error`]. Skipped fetches are only emitted
    /// with [`emit_no_data_states`][StoreRequest::emit_no_data_states]. Dropping the stream
    /// cancels everything it started.
    fn stream(&self, request: impl Into<StoreRequest<K>>) -> BoxStream<'static, StoreResponse<T>>;

    /// Returns the stored entity, fetching it when the key is missing.
    fn get(&self, request: impl Into<StoreRequest<K>>) -> impl Future<Output = StoreResponse<T>> + Send;

    /// Fetches the entity and stores it.
    ///
    /// The fetch bypasses the rate limiter when [`force_fetch`][StoreRequest::force_fetch] is set.
    /// A fetch that joins another caller's in-flight fetch resolves once that caller has stored
    /// the entity, and reports it as read from the source of truth.
    fn fetch(&self, request: impl Into<StoreRequest<K>>) -> impl Future<Output = StoreResponse<T>> + Send;

    /// Streams `key`, optionally refreshing it.
    fn stream_key(&self, key: K, refresh: bool) -> BoxStream<'static, StoreResponse<T>> {
        self.stream(StoreRequest::new(key).refresh(refresh))
    }

    /// Returns the entity for `key`.
    fn get_key(&self, key: K) -> impl Future<Output = StoreResponse<T>> + Send {
        self.get(StoreRequest::new(key))
    }

    /// Fetches `key`, bypassing the rate limiter when `forced`.
    fn fetch_key(&self, key: K, forced: bool) -> impl Future<Output = StoreResponse<T>> + Send {
        self.fetch(StoreRequest::new(key).force_fetch(forced))
    }
}

/// The [`Store`] combining a [`Fetcher`] with a [`SourceOfTruth`].
///
/// Fetched entities of type `I` are converted to stored entities of type `T` by a
/// [`Mapper`]. Fetches go through a [`FetcherController`], which applies rate limiting,
/// throttling, retries and sharing of in-flight fetches.
///
/// Cloning a store is cheap; clones share their state.
///
/// # Examples
///
/// ```
/// use futures_util::StreamExt;
/// use larder::source_of_truth::SourceOfTruth;
/// use larder::{FetcherResult, Store, StoreConfig, StoreImpl, StoreRequest, fetcher_fn};
/// use tick::Clock;
///
/// # async fn example(clock: Clock, sot: impl SourceOfTruth<u64, String> + 'static) {
/// let fetcher = fetcher_fn(|id: u64| async move { FetcherResult::data(format!("post {id}")) });
/// let store = StoreImpl::new(fetcher, sot, StoreConfig::new(clock));
///
/// let post = store.get(7).await;
/// let mut updates = store.stream(StoreRequest::new(7).refresh(true));
/// while let Some(response) = updates.next().await {
///     println!("{response:?}");
/// }
/// # let _ = post;
/// # }
/// ```
pub struct StoreImpl<K, I, T, F, S, M = SameEntityMapper> {
    inner: Arc<Inner<K, I, T, F, S, M>>,
}

struct Inner<K, I, T, F, S, M> {
    controller: FetcherController<K, I, F>,
    source_of_truth: S,
    mapper: M,
    pending: Option<Arc<PendingChanges<K, T>>>,
    _entity: PhantomData<fn() -> T>,
}

impl<K, T, F, S> StoreImpl<K, T, T, F, S>
where
    K: Key,
    T: Entity,
    F: Fetcher<K, T> + 'static,
    S: SourceOfTruth<K, T> + 'static,
{
    /// Creates a store whose fetcher returns the stored entity type.
    #[must_use]
    pub fn new(fetcher: F, source_of_truth: S, config: StoreConfig) -> Self {
        Self::with_mapper(fetcher, source_of_truth, SameEntityMapper, config)
    }
}

impl<K, I, T, F, S, M> StoreImpl<K, I, T, F, S, M>
where
    K: Key,
    I: Entity,
    T: Entity,
    F: Fetcher<K, I> + 'static,
    S: SourceOfTruth<K, T> + 'static,
    M: Mapper<I, T> + 'static,
{
    /// Creates a store converting fetched entities with `mapper`.
    #[must_use]
    pub fn with_mapper(fetcher: F, source_of_truth: S, mapper: M, config: StoreConfig) -> Self {
        Self::from_parts(fetcher, source_of_truth, mapper, config, None)
    }

    pub(crate) fn from_parts(
        fetcher: F,
        source_of_truth: S,
        mapper: M,
        config: StoreConfig,
        pending: Option<Arc<PendingChanges<K, T>>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                controller: FetcherController::new(fetcher, config),
                source_of_truth,
                mapper,
                pending,
                _entity: PhantomData,
            }),
        }
    }

    /// Returns the source of truth.
    #[must_use]
    pub fn source_of_truth(&self) -> &S {
        &self.inner.source_of_truth
    }

    /// Returns the controller driving the fetcher.
    #[must_use]
    pub fn controller(&self) -> &FetcherController<K, I, F> {
        &self.inner.controller
    }

    /// Returns the mapper between fetched and stored entities.
    #[must_use]
    pub fn mapper(&self) -> &M {
        &self.inner.mapper
    }

    /// Fetches `key` in a background task, discarding the result.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn fetch_and_forget(&self, key: K) {
        let store = self.clone();
        drop(tokio::spawn(async move {
            let _ = store.fetch_entity(key, false).await;
        }));
    }

    async fn get_entity(&self, request: StoreRequest<K>) -> StoreResponse<T> {
        let source_of_truth = &self.inner.source_of_truth;

        match source_of_truth.exists(request.key()).await {
            Ok(true) => match source_of_truth.get(request.key()).await {
                Ok(value) => StoreResponse::Data(value, ResponseOrigin::SourceOfTruth),
                Err(error) => StoreResponse::Error(error.into()),
            },
            Ok(false) if request.is_fetch_when_no_data_found() => self.fetch_entity(request.into_key(), true).await,
            Ok(false) => StoreResponse::Error(StoreError::NoDataFound),
            Err(error) => StoreResponse::Error(error.into()),
        }
    }

    async fn fetch_entity(&self, key: K, force: bool) -> StoreResponse<T> {
        match self.inner.controller.fetch(key.clone(), force).await {
            FetcherResult::Data { value, cacheable: true } => self.persist(&key, value).await,
            // The caller that started the fetch may still be writing its result.
            FetcherResult::Data { cacheable: false, .. } => match self.inner.source_of_truth.listen(&key).next().await {
                Some(value) => StoreResponse::Data(value, ResponseOrigin::SourceOfTruth),
                None => StoreResponse::Error(StoreError::NoDataFound),
            },
            FetcherResult::NoData(message) => StoreResponse::NoData(message),
            FetcherResult::Error(error) => StoreResponse::Error(error.into()),
            FetcherResult::Success(_) => StoreResponse::Error(StoreError::UnexpectedResult),
        }
    }

    async fn persist(&self, key: &K, value: I) -> StoreResponse<T> {
        let mut entity = self.inner.mapper.to_source_of_truth(value);

        if let Some(pending) = &self.inner.pending {
            match pending.apply(key, entity) {
                Some(reconciled) => entity = reconciled,
                None => return StoreResponse::NoData(IGNORED_PENDING.to_string()),
            }
        }

        match self.inner.source_of_truth.store(key, entity, true).await {
            Ok(stored) => StoreResponse::Data(stored, ResponseOrigin::Fetcher),
            Err(error) => StoreResponse::Error(error.into()),
        }
    }

    fn listen(&self, key: &K) -> BoxStream<'static, StoreResponse<T>> {
        self.inner
            .source_of_truth
            .listen(key)
            .map(|value| {
                tracing::event!(name: "larder.store.emitted", tracing::Level::TRACE, response.origin = "source_of_truth");
                StoreResponse::Data(value, ResponseOrigin::SourceOfTruth)
            })
            .boxed()
    }

    /// Streams the surfaced result of a fetch for `key`.
    fn refresh(self, key: K, force: bool, emit_no_data: bool) -> impl Stream<Item = StoreResponse<T>> + Send + 'static {
        stream::once(async move { self.fetch_entity(key, force).await }).filter_map(move |response| ready(surface(response, emit_no_data)))
    }

    async fn open_stream(self, request: StoreRequest<K>) -> BoxStream<'static, StoreResponse<T>> {
        let key = request.key().clone();
        let force = request.is_force_fetch();
        let emit_no_data = request.is_emit_no_data_states();

        let exists = match self.inner.source_of_truth.exists(&key).await {
            Ok(exists) => exists,
            Err(error) => return stream::once(ready(StoreResponse::Error(error.into()))).boxed(),
        };

        if exists {
            let mut updates = self.listen(&key);
            if !request.is_refresh() {
                return updates;
            }

            // The stored entity is emitted before the refresh can replace it.
            let current = updates.next().await;
            let refresh = self.clone().refresh(key, force, emit_no_data);
            return stream::iter(current).chain(stream::select(updates, refresh)).boxed();
        }

        if !request.is_fetch_when_no_data_found() {
            return self.listen(&key);
        }

        let loading = request
            .is_emit_loading_states()
            .then_some(StoreResponse::Loading(ResponseOrigin::Fetcher));

        let fetched = stream::once(async move {
            let response = self.fetch_entity(key.clone(), force).await;
            stream::iter(surface(response, emit_no_data)).chain(self.listen(&key))
        })
        .flatten();

        stream::iter(loading).chain(fetched).boxed()
    }
}

/// Decides whether a fetch result is emitted on a stream.
///
/// Fetched data is never emitted directly: it arrives through the change it makes to storage.
fn surface<T>(response: StoreResponse<T>, emit_no_data: bool) -> Option<StoreResponse<T>> {
    match response {
        StoreResponse::Data(..) => None,
        StoreResponse::NoData(_) if !emit_no_data => None,
        response => {
            tracing::event!(name: "larder.store.emitted", tracing::Level::TRACE, response.origin = "fetcher");
            Some(response)
        }
    }
}

impl<K, I, T, F, S, M> Store<K, T> for StoreImpl<K, I, T, F, S, M>
where
    K: Key,
    I: Entity,
    T: Entity,
    F: Fetcher<K, I> + 'static,
    S: SourceOfTruth<K, T> + 'static,
    M: Mapper<I, T> + 'static,
{
    fn stream(&self, request: impl Into<StoreRequest<K>>) -> BoxStream<'static, StoreResponse<T>> {
        let request = request.into();
        stream::once(self.clone().open_stream(request)).flatten().boxed()
    }

    fn get(&self, request: impl Into<StoreRequest<K>>) -> impl Future<Output = StoreResponse<T>> + Send {
        self.get_entity(request.into())
    }

    fn fetch(&self, request: impl Into<StoreRequest<K>>) -> impl Future<Output = StoreResponse<T>> + Send {
        let request = request.into();
        let force = request.is_force_fetch();
        self.fetch_entity(request.into_key(), force)
    }
}

impl<K, I, T, F, S, M> Clone for StoreImpl<K, I, T, F, S, M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, I, T, F, S, M> std::fmt::Debug for StoreImpl<K, I, T, F, S, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreImpl").finish_non_exhaustive()
    }
}
