// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;

use crate::fetcher::catch_panic;
use crate::in_flight::CallSlot;
use crate::layers::NOT_EXECUTED;
use crate::{Entity, FetchRequest, Fetcher, FetcherError, FetcherResult, Key, RateLimiter, StoreConfig, retry};

/// Decides, per key, whether a store calls its fetcher.
///
/// Each key gets a [`RateLimiter`] built from the fetcher's [`rate_limit_policy`][Fetcher::rate_limit_policy]
/// and a slot tracking its in-flight fetches. A call to [`fetch`][Self::fetch]:
///
/// 1. Proceeds when it is forced, when rate limiting is disabled, or when the rate limiter
///    allows it. Otherwise it waits for the fetch in flight for the same key and returns its
///    result marked as not cacheable, or returns [`FetcherResult::NoData`] when there is none.
/// 2. Returns [`FetcherError::Throttling`] without calling the fetcher while the shared
///    [`ThrottlingController`][crate::ThrottlingController] is throttling.
/// 3. Calls the fetcher, retrying according to its [`retry_policy`][Fetcher::retry_policy].
///    Failures are reported to the throttling controller and a panic becomes a
///    [`FetcherError::Client`].
///
/// Per-key state lives as long as the controller and is never evicted.
#[derive(Debug)]
pub struct FetcherController<K, I, F> {
    fetcher: F,
    config: StoreConfig,
    controllers: DashMap<String, Arc<KeyController<I>>>,
    _key: PhantomData<fn(K)>,
}

#[derive(Debug)]
struct KeyController<I> {
    limiter: RateLimiter,
    slot: CallSlot<I>,
}

impl<K, I, F> FetcherController<K, I, F>
where
    K: Key,
    I: Entity,
    F: Fetcher<K, I>,
{
    /// Creates a controller driving `fetcher`.
    #[must_use]
    pub fn new(fetcher: F, config: StoreConfig) -> Self {
        Self {
            fetcher,
            config,
            controllers: DashMap::new(),
            _key: PhantomData,
        }
    }

    /// Returns the driven fetcher.
    #[must_use]
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Returns the configuration this controller applies.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Fetches `key`, bypassing the rate limiter when `force` is set.
    pub async fn fetch(&self, key: K, force: bool) -> FetcherResult<I> {
        let controller = self.controller(&key);

        if force || !self.config.rate_limiter_enabled() || controller.limiter.should_fetch() {
            return self.execute(&controller, key, force).await;
        }

        let follower = controller.slot.follow();
        if controller.slot.is_in_flight() {
            tracing::event!(
                name: "larder.fetcher.joined",
                tracing::Level::DEBUG,
                fetch.key = %key,
            );

            if let Some(result) = follower.wait().await {
                return result.into_shared();
            }
        }

        tracing::event!(
            name: "larder.fetcher.skipped",
            tracing::Level::DEBUG,
            fetch.key = %key,
        );

        FetcherResult::no_data(NOT_EXECUTED)
    }

    async fn execute(&self, controller: &KeyController<I>, key: K, force: bool) -> FetcherResult<I> {
        if self.config.is_throttling() {
            tracing::event!(
                name: "larder.throttling.rejected",
                tracing::Level::DEBUG,
                fetch.key = %key,
            );
            return FetcherResult::Error(FetcherError::Throttling);
        }

        let guard = controller.slot.begin();
        let policy = self.fetcher.retry_policy();

        let result = catch_panic(retry::execute(&policy, self.config.clock(), || {
            self.fetcher.fetch_request(FetchRequest {
                key: key.clone(),
                force,
            })
        }))
        .await;

        if let FetcherResult::Error(error) = &result {
            self.config.record_error(error);
        }

        guard.complete(result.clone());
        result
    }

    fn controller(&self, key: &K) -> Arc<KeyController<I>> {
        Arc::clone(&self.controllers.entry(key.to_string()).or_insert_with(|| {
            Arc::new(KeyController {
                limiter: RateLimiter::new(self.fetcher.rate_limit_policy(), self.config.clock()),
                slot: CallSlot::new(),
            })
        }))
    }
}
