// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Composable middleware for fetch pipelines.
//!
//! Every layer wraps a [`Service`] that takes a [`FetchRequest`] and returns a
//! [`FetcherResult`]. Layers are applied with [`Layer::layer`], innermost first, and the
//! resulting service is turned back into a [`Fetcher`] with [`FetcherService`].
//!
//! [`FetcherBuilder`] assembles the usual pipeline:
//!
//! ```text
//! JoinInProgress -> RateLimit -> Retry -> fetcher
//! ```
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use larder::layers::FetcherBuilder;
//! use larder::{ExponentialBackoff, FetcherResult, RateLimitPolicy, StoreConfig, fetcher_fn};
//! use tick::Clock;
//!
//! # fn example(clock: Clock) {
//! let config = StoreConfig::new(clock);
//!
//! let fetcher = FetcherBuilder::new(&config)
//!     .rate_limit_policy(RateLimitPolicy::fixed_window(Duration::from_secs(10), 2))
//!     .retry_policy(ExponentialBackoff::default().max_retries(3))
//!     .build(fetcher_fn(|id: u32| async move { FetcherResult::data(id) }));
//! # let _ = fetcher;
//! # }
//! ```

mod disable;
mod join;
mod limit;
mod retry;
mod throttle;

use std::marker::PhantomData;

pub use disable::{DisableOn, DisableOnLayer};
pub use join::{JoinInProgress, JoinInProgressLayer};
pub use layered::{Layer, Service};
pub(crate) use limit::NOT_EXECUTED;
pub use limit::{RateLimit, RateLimitLayer};
pub use retry::{Retry, RetryLayer};
pub use throttle::{ThrottleOnError, ThrottleOnErrorLayer};

use crate::{FetchRequest, Fetcher, FetcherResult, RateLimitPolicy, RetryPolicy, StoreConfig};

/// The innermost service of a pipeline, calling a [`Fetcher`].
#[derive(Debug, Clone)]
pub struct Fetch<F, I> {
    fetcher: F,
    _item: PhantomData<fn() -> I>,
}

impl<F, I> Fetch<F, I> {
    /// Wraps `fetcher`.
    #[must_use]
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            _item: PhantomData,
        }
    }
}

impl<K, I, F> Service<FetchRequest<K>> for Fetch<F, I>
where
    F: Fetcher<K, I>,
{
    type Out = FetcherResult<I>;

    fn execute(&self, request: FetchRequest<K>) -> impl Future<Output = Self::Out> + Send {
        self.fetcher.fetch_request(request)
    }
}

/// Exposes a fetch pipeline as a [`Fetcher`].
///
/// The pipeline already limits and retries on its own, so the fetcher reports
/// [`RateLimitPolicy::FetchAlways`] and [`RetryPolicy::DoNotRetry`]. The force flag of a
/// request is passed through to the pipeline.
#[derive(Debug, Clone)]
pub struct FetcherService<S> {
    service: S,
}

impl<S> FetcherService<S> {
    /// Wraps `service`.
    #[must_use]
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Returns the wrapped service.
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.service
    }
}

impl<K, I, S> Fetcher<K, I> for FetcherService<S>
where
    S: Service<FetchRequest<K>, Out = FetcherResult<I>>,
{
    fn fetch(&self, key: K) -> impl Future<Output = FetcherResult<I>> + Send {
        self.service.execute(FetchRequest::new(key))
    }

    fn fetch_request(&self, request: FetchRequest<K>) -> impl Future<Output = FetcherResult<I>> + Send {
        self.service.execute(request)
    }

    fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::FetchAlways
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::DoNotRetry
    }
}

/// The fetcher produced by [`FetcherBuilder::build`].
pub type Pipeline<F, I> = FetcherService<JoinInProgress<RateLimit<Retry<Fetch<F, I>>>, I>>;

/// Builds the default fetch pipeline around a fetcher.
///
/// The pipeline shares in-flight fetches between concurrent callers, rate limits
/// non-forced fetches per key, and retries failures. It defaults to
/// [`RateLimitPolicy::default`] and [`RetryPolicy::DoNotRetry`].
#[derive(Debug, Clone)]
pub struct FetcherBuilder {
    config: StoreConfig,
    rate_limit: RateLimitPolicy,
    retry: RetryPolicy,
}

impl FetcherBuilder {
    /// Creates a builder reading time and feature switches from `config`.
    #[must_use]
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            config: config.clone(),
            rate_limit: RateLimitPolicy::default(),
            retry: RetryPolicy::DoNotRetry,
        }
    }

    /// Sets the rate limit policy applied per key.
    #[must_use]
    pub fn rate_limit_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = policy;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn retry_policy(mut self, policy: impl Into<RetryPolicy>) -> Self {
        self.retry = policy.into();
        self
    }

    /// Wraps `fetcher` in the pipeline.
    ///
    /// The policies reported by `fetcher` itself are ignored in favor of the ones set on
    /// the builder.
    #[must_use]
    pub fn build<K, I, F>(self, fetcher: F) -> Pipeline<F, I>
    where
        F: Fetcher<K, I>,
    {
        let retry = Retry::layer(self.retry, &self.config).layer(Fetch::new(fetcher));
        let limited = RateLimit::layer(self.rate_limit, &self.config).layer(retry);
        let joined = JoinInProgress::layer().layer(limited);

        FetcherService::new(joined)
    }
}
