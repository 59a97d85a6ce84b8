// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use layered::{Layer, Service};

use crate::fetcher::catch_panic;
use crate::{FetchRequest, FetcherError, FetcherResult, StoreConfig, ThrottlingController};

/// Suppresses fetches while a shared [`ThrottlingController`] is throttling and reports failed
/// fetches to it.
///
/// Suppressed fetches return [`FetcherError::Throttling`]. A panic in the inner service is
/// reported as a [`FetcherError::Client`].
#[derive(Debug)]
pub struct ThrottleOnError<S> {
    inner: S,
    throttling: Arc<ThrottlingController>,
}

impl ThrottleOnError<()> {
    /// Creates a layer using the throttling controller shared through `config`.
    #[must_use]
    pub fn layer(config: &StoreConfig) -> ThrottleOnErrorLayer {
        ThrottleOnErrorLayer {
            throttling: Arc::clone(config.throttling()),
        }
    }
}

impl<K, I, S> Service<FetchRequest<K>> for ThrottleOnError<S>
where
    K: Send,
    I: Send,
    S: Service<FetchRequest<K>, Out = FetcherResult<I>>,
{
    type Out = FetcherResult<I>;

    async fn execute(&self, request: FetchRequest<K>) -> Self::Out {
        if self.throttling.is_throttling() {
            tracing::event!(name: "larder.throttling.rejected", tracing::Level::DEBUG, "fetch rejected while throttling");
            return FetcherResult::Error(FetcherError::Throttling);
        }

        let result = catch_panic(self.inner.execute(request)).await;

        if let FetcherResult::Error(error) = &result {
            self.throttling.on_error(error);
        }

        result
    }
}

/// Builds [`ThrottleOnError`] services.
#[derive(Debug, Clone)]
pub struct ThrottleOnErrorLayer {
    throttling: Arc<ThrottlingController>,
}

impl<S> Layer<S> for ThrottleOnErrorLayer {
    type Service = ThrottleOnError<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ThrottleOnError {
            inner,
            throttling: Arc::clone(&self.throttling),
        }
    }
}
