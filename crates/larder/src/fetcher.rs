// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The remote read contract and the mapping between fetched and stored entities.

use std::fmt::Display;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::{FetcherError, FetcherResult, RateLimitPolicy, RetryPolicy};

/// A key identifying one logical entity or collection.
///
/// The string form of a key identifies it in the per-key state kept by fetch controllers, so
/// keys that compare equal must display identically.
pub trait Key: Clone + Display + Send + Sync + 'static {}

impl<T> Key for T where T: Clone + Display + Send + Sync + 'static {}

/// An entity that flows through a store.
pub trait Entity: Clone + Send + Sync + 'static {}

impl<T> Entity for T where T: Clone + Send + Sync + 'static {}

/// A fetch issued through the fetch pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest<K> {
    /// The key to fetch.
    pub key: K,
    /// Whether the fetch bypasses rate limiting.
    pub force: bool,
}

impl<K> FetchRequest<K> {
    /// Creates a request that is subject to rate limiting.
    #[must_use]
    pub fn new(key: K) -> Self {
        Self { key, force: false }
    }

    /// Creates a request that bypasses rate limiting.
    #[must_use]
    pub fn forced(key: K) -> Self {
        Self { key, force: true }
    }
}

/// Performs one remote read for a key.
///
/// Implementations wrap a concrete transport and map its failures into
/// [`FetcherResult::Error`]. The policies returned by [`rate_limit_policy`][Self::rate_limit_policy]
/// and [`retry_policy`][Self::retry_policy] are applied by the
/// [`FetcherController`][crate::FetcherController] driving the fetcher.
///
/// # Examples
///
/// ```
/// use larder::{Fetcher, FetcherError, FetcherResult, RateLimitPolicy};
///
/// struct PostFetcher;
///
/// impl Fetcher<u64, String> for PostFetcher {
///     async fn fetch(&self, key: u64) -> FetcherResult<String> {
///         match key {
///             0 => FetcherResult::error(FetcherError::http(404, "not found")),
///             id => FetcherResult::data(format!("post {id}")),
///         }
///     }
///
///     fn rate_limit_policy(&self) -> RateLimitPolicy {
///         RateLimitPolicy::FetchAlways
///     }
/// }
/// ```
pub trait Fetcher<K, I>: Send + Sync {
    /// Fetches the entity for `key`.
    fn fetch(&self, key: K) -> impl Future<Output = FetcherResult<I>> + Send;

    /// Fetches the entity for a pipeline request.
    ///
    /// The default implementation ignores [`FetchRequest::force`]; fetchers that limit
    /// themselves override it.
    fn fetch_request(&self, request: FetchRequest<K>) -> impl Future<Output = FetcherResult<I>> + Send {
        self.fetch(request.key)
    }

    /// How often this fetcher may be called for the same key.
    fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::default()
    }

    /// How failed fetches are retried.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::DoNotRetry
    }
}

impl<K, I, F> Fetcher<K, I> for Arc<F>
where
    F: Fetcher<K, I>,
{
    fn fetch(&self, key: K) -> impl Future<Output = FetcherResult<I>> + Send {
        (**self).fetch(key)
    }

    fn fetch_request(&self, request: FetchRequest<K>) -> impl Future<Output = FetcherResult<I>> + Send {
        (**self).fetch_request(request)
    }

    fn rate_limit_policy(&self) -> RateLimitPolicy {
        (**self).rate_limit_policy()
    }

    fn retry_policy(&self) -> RetryPolicy {
        (**self).retry_policy()
    }
}

/// A [`Fetcher`] calling an async closure.
///
/// Created by [`fetcher_fn`].
pub struct FnFetcher<K, F> {
    fetch: F,
    rate_limit: RateLimitPolicy,
    retry: RetryPolicy,
    _key: PhantomData<fn(K)>,
}

/// Creates a [`Fetcher`] from an async closure, using the default rate limit and no retries.
///
/// # Examples
///
/// ```
/// use larder::{FetcherResult, RateLimitPolicy, fetcher_fn};
///
/// let fetcher = fetcher_fn(|id: u32| async move { FetcherResult::data(id * 2) })
///     .with_rate_limit_policy(RateLimitPolicy::FetchAlways);
/// ```
pub fn fetcher_fn<K, I, F, Fut>(fetch: F) -> FnFetcher<K, F>
where
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = FetcherResult<I>> + Send,
{
    FnFetcher {
        fetch,
        rate_limit: RateLimitPolicy::default(),
        retry: RetryPolicy::DoNotRetry,
        _key: PhantomData,
    }
}

impl<K, F> FnFetcher<K, F> {
    /// Sets the rate limit policy reported by this fetcher.
    #[must_use]
    pub fn with_rate_limit_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = policy;
        self
    }

    /// Sets the retry policy reported by this fetcher.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: impl Into<RetryPolicy>) -> Self {
        self.retry = policy.into();
        self
    }
}

impl<K, F> std::fmt::Debug for FnFetcher<K, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFetcher")
            .field("rate_limit", &self.rate_limit)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<K, I, F, Fut> Fetcher<K, I> for FnFetcher<K, F>
where
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = FetcherResult<I>> + Send,
{
    fn fetch(&self, key: K) -> impl Future<Output = FetcherResult<I>> + Send {
        (self.fetch)(key)
    }

    fn rate_limit_policy(&self) -> RateLimitPolicy {
        self.rate_limit
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }
}

/// Converts between the entity a fetcher returns and the entity a source of truth stores.
pub trait Mapper<I, T>: Send + Sync {
    /// Converts a fetched entity into its stored form.
    fn to_source_of_truth(&self, entity: I) -> T;

    /// Converts a stored entity into the form a sender transmits.
    fn to_fetcher(&self, entity: T) -> I;
}

/// The [`Mapper`] used when fetched and stored entities have the same type.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameEntityMapper;

impl<T> Mapper<T, T> for SameEntityMapper {
    fn to_source_of_truth(&self, entity: T) -> T {
        entity
    }

    fn to_fetcher(&self, entity: T) -> T {
        entity
    }
}

/// Awaits `fetch`, reporting a panic as a [`FetcherError::Client`] result.
pub(crate) async fn catch_panic<I>(fetch: impl Future<Output = FetcherResult<I>>) -> FetcherResult<I> {
    match AssertUnwindSafe(fetch).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => FetcherResult::Error(FetcherError::from_panic(payload.as_ref())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_fetcher_reports_policies() {
        let fetcher = fetcher_fn(|key: &'static str| async move { FetcherResult::data(key.len()) })
            .with_rate_limit_policy(RateLimitPolicy::FetchOnlyOnce)
            .with_retry_policy(crate::ExponentialBackoff::default());

        assert_eq!(fetcher.rate_limit_policy(), RateLimitPolicy::FetchOnlyOnce);
        assert!(matches!(fetcher.retry_policy(), RetryPolicy::ExponentialBackoff(_)));
        assert_eq!(fetcher.fetch("abc").await.value(), Some(&3));
    }

    #[tokio::test]
    async fn fetch_request_defaults_to_fetch() {
        let fetcher = Arc::new(fetcher_fn(|key: u8| async move { FetcherResult::data(key) }));

        let result = fetcher.fetch_request(FetchRequest::forced(7)).await;

        assert_eq!(result.value(), Some(&7));
        assert_eq!(fetcher.rate_limit_policy(), RateLimitPolicy::default());
    }

    #[tokio::test]
    async fn panicking_fetch_becomes_client_error() {
        let result: FetcherResult<u8> = catch_panic(async { panic!("fetcher bug") }).await;

        assert!(matches!(result, FetcherResult::Error(FetcherError::Client(_))));
    }

    #[test]
    fn same_entity_mapper_is_identity() {
        let mapper = SameEntityMapper;
        assert_eq!(Mapper::<_, _>::to_source_of_truth(&mapper, 5), 5);
        assert_eq!(Mapper::<_, _>::to_fetcher(&mapper, "x"), "x");
    }
}
