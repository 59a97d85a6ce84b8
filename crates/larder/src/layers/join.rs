// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use layered::{Layer, Service};

use crate::fetcher::catch_panic;
use crate::in_flight::CallSlot;
use crate::{FetchRequest, FetcherResult, Key};

/// Shares one fetch per key between concurrent callers.
///
/// The first caller for a key runs the inner service. Callers arriving while it runs wait for
/// its result instead of starting their own fetch, and receive a copy marked as not cacheable so
/// that only the first caller persists it. A panic in the inner service is returned to every
/// caller as a [`FetcherError::Client`][crate::FetcherError::Client].
///
/// If the first caller is dropped before completing, one of the waiting callers takes over.
#[derive(Debug)]
pub struct JoinInProgress<S, I> {
    inner: S,
    slots: DashMap<String, Arc<CallSlot<I>>>,
}

impl JoinInProgress<(), ()> {
    /// Creates a layer sharing in-flight fetches.
    #[must_use]
    pub fn layer<I>() -> JoinInProgressLayer<I> {
        JoinInProgressLayer { _item: PhantomData }
    }
}

impl<S, I: Clone> JoinInProgress<S, I> {
    fn slot(&self, key: String) -> Arc<CallSlot<I>> {
        Arc::clone(&self.slots.entry(key).or_insert_with(|| Arc::new(CallSlot::new())))
    }
}

impl<K, I, S> Service<FetchRequest<K>> for JoinInProgress<S, I>
where
    K: Key,
    I: Clone + Send + Sync,
    S: Service<FetchRequest<K>, Out = FetcherResult<I>>,
{
    type Out = FetcherResult<I>;

    async fn execute(&self, request: FetchRequest<K>) -> Self::Out {
        let slot = self.slot(request.key.to_string());

        loop {
            let follower = slot.follow();

            if let Some(guard) = slot.try_lead() {
                let result = catch_panic(self.inner.execute(request)).await;
                guard.complete(result.clone());
                return result;
            }

            tracing::event!(
                name: "larder.join_in_progress.joined",
                tracing::Level::DEBUG,
                fetch.key = %request.key,
            );

            if let Some(result) = follower.wait().await {
                return result.into_shared();
            }
        }
    }
}

/// Builds [`JoinInProgress`] services.
#[derive(Debug)]
pub struct JoinInProgressLayer<I> {
    _item: PhantomData<fn() -> I>,
}

impl<I> Clone for JoinInProgressLayer<I> {
    fn clone(&self) -> Self {
        Self { _item: PhantomData }
    }
}

impl<S, I> Layer<S> for JoinInProgressLayer<I> {
    type Service = JoinInProgress<S, I>;

    fn layer(&self, inner: S) -> Self::Service {
        JoinInProgress {
            inner,
            slots: DashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::sync::Notify;

    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let calls = Arc::new(AtomicU32::new(0));
        let release = Arc::new(Notify::new());

        let service = Arc::new(JoinInProgress::layer().layer(layered::Execute::new({
            let calls = Arc::clone(&calls);
            let release = Arc::clone(&release);
            move |request: FetchRequest<u8>| {
                let calls = Arc::clone(&calls);
                let release = Arc::clone(&release);
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    release.notified().await;
                    FetcherResult::data(request.key)
                }
            }
        })));

        let leader = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.execute(FetchRequest::new(4)).await }
        });
        while calls.load(Ordering::Relaxed) == 0 {
            tokio::task::yield_now().await;
        }

        let follower = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.execute(FetchRequest::new(4)).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        release.notify_one();

        let leader = leader.await.expect("leader task");
        let follower = follower.await.expect("follower task");

        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!(matches!(leader, FetcherResult::Data { value: 4, cacheable: true }));
        assert!(matches!(follower, FetcherResult::Data { value: 4, cacheable: false }));
    }

    #[tokio::test]
    async fn sequential_callers_fetch_again() {
        let calls = Arc::new(AtomicU32::new(0));
        let service = JoinInProgress::layer().layer(layered::Execute::new({
            let calls = Arc::clone(&calls);
            move |request: FetchRequest<u8>| {
                calls.fetch_add(1, Ordering::Relaxed);
                async move { FetcherResult::data(request.key) }
            }
        }));

        assert!(service.execute(FetchRequest::new(1)).await.is_data());
        assert!(service.execute(FetchRequest::new(1)).await.is_data());
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    fn broken_fetch(_: FetchRequest<u8>) -> FetcherResult<u8> {
        panic!("broken fetcher");
    }

    #[tokio::test]
    async fn panic_becomes_client_error() {
        let service = JoinInProgress::layer().layer(layered::Execute::new(|request| async move { broken_fetch(request) }));

        let result = service.execute(FetchRequest::new(1)).await;

        assert!(matches!(result, FetcherResult::Error(crate::FetcherError::Client(_))));
    }
}
