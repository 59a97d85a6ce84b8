// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use dashmap::DashMap;
use layered::{Layer, Service};
use tick::Clock;

use crate::{FetchRequest, FetcherResult, Key, RateLimitPolicy, RateLimiter, StoreConfig};

/// Message of the [`FetcherResult::NoData`] returned for fetches skipped by rate limiting.
pub(crate) const NOT_EXECUTED: &str = "Fetch not executed";

/// Rate limits non-forced fetches, keeping one [`RateLimiter`] per key.
///
/// Skipped fetches return [`FetcherResult::NoData`]. Forced fetches always pass, and so do all
/// fetches when rate limiting is disabled in the [`StoreConfig`].
#[derive(Debug)]
pub struct RateLimit<S> {
    inner: S,
    policy: RateLimitPolicy,
    clock: Clock,
    enabled: bool,
    limiters: DashMap<String, Arc<RateLimiter>>,
}

impl RateLimit<()> {
    /// Creates a layer applying `policy` per key.
    #[must_use]
    pub fn layer(policy: RateLimitPolicy, config: &StoreConfig) -> RateLimitLayer {
        RateLimitLayer {
            policy,
            clock: config.clock().clone(),
            enabled: config.rate_limiter_enabled(),
        }
    }
}

impl<S> RateLimit<S> {
    fn should_fetch(&self, key: String) -> bool {
        let limiter = Arc::clone(
            &self
                .limiters
                .entry(key)
                .or_insert_with(|| Arc::new(RateLimiter::new(self.policy, &self.clock))),
        );

        limiter.should_fetch()
    }
}

impl<K, I, S> Service<FetchRequest<K>> for RateLimit<S>
where
    K: Key,
    I: Send,
    S: Service<FetchRequest<K>, Out = FetcherResult<I>>,
{
    type Out = FetcherResult<I>;

    async fn execute(&self, request: FetchRequest<K>) -> Self::Out {
        if request.force || !self.enabled || self.should_fetch(request.key.to_string()) {
            return self.inner.execute(request).await;
        }

        tracing::event!(
            name: "larder.rate_limit.skipped",
            tracing::Level::DEBUG,
            fetch.key = %request.key,
        );

        FetcherResult::no_data(NOT_EXECUTED)
    }
}

/// Builds [`RateLimit`] services.
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    policy: RateLimitPolicy,
    clock: Clock,
    enabled: bool,
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimit<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimit {
            inner,
            policy: self.policy,
            clock: self.clock.clone(),
            enabled: self.enabled,
            limiters: DashMap::new(),
        }
    }
}
