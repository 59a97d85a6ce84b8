// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use layered::{Layer, Service};

use crate::{FetchRequest, FetcherResult};

/// Message of the [`FetcherResult::NoData`] returned while a fetcher is disabled.
const DISABLED: &str = "Fetcher disabled";

type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Skips fetches while a predicate returns `true`.
pub struct DisableOn<S> {
    inner: S,
    predicate: Predicate,
}

impl DisableOn<()> {
    /// Creates a layer disabling fetches while `predicate` returns `true`.
    #[must_use]
    pub fn layer(predicate: impl Fn() -> bool + Send + Sync + 'static) -> DisableOnLayer {
        DisableOnLayer {
            predicate: Arc::new(predicate),
        }
    }
}

impl<K, I, S> Service<FetchRequest<K>> for DisableOn<S>
where
    K: Send,
    I: Send,
    S: Service<FetchRequest<K>, Out = FetcherResult<I>>,
{
    type Out = FetcherResult<I>;

    async fn execute(&self, request: FetchRequest<K>) -> Self::Out {
        if (self.predicate)() {
            return FetcherResult::no_data(DISABLED);
        }

        self.inner.execute(request).await
    }
}

impl<S: Debug> Debug for DisableOn<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisableOn").field("inner", &self.inner).finish_non_exhaustive()
    }
}

/// Builds [`DisableOn`] services.
#[derive(Clone)]
pub struct DisableOnLayer {
    predicate: Predicate,
}

impl Debug for DisableOnLayer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisableOnLayer").finish_non_exhaustive()
    }
}

impl<S> Layer<S> for DisableOnLayer {
    type Service = DisableOn<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DisableOn {
            inner,
            predicate: Arc::clone(&self.predicate),
        }
    }
}
