// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use layered::{Layer, Service};
use tick::Clock;

use crate::{FetchRequest, FetcherResult, RetryPolicy, StoreConfig, retry};

/// Retries failed fetches according to a [`RetryPolicy`].
///
/// Delays between attempts are awaited on the clock of the [`StoreConfig`] the layer was
/// created from.
#[derive(Debug)]
pub struct Retry<S> {
    inner: S,
    policy: RetryPolicy,
    clock: Clock,
}

impl Retry<()> {
    /// Creates a layer retrying with `policy`.
    #[must_use]
    pub fn layer(policy: impl Into<RetryPolicy>, config: &StoreConfig) -> RetryLayer {
        RetryLayer {
            policy: policy.into(),
            clock: config.clock().clone(),
        }
    }
}

impl<K, I, S> Service<FetchRequest<K>> for Retry<S>
where
    K: Clone + Send + Sync,
    I: Send,
    S: Service<FetchRequest<K>, Out = FetcherResult<I>>,
{
    type Out = FetcherResult<I>;

    async fn execute(&self, request: FetchRequest<K>) -> Self::Out {
        retry::execute(&self.policy, &self.clock, || self.inner.execute(request.clone())).await
    }
}

/// Builds [`Retry`] services.
#[derive(Debug, Clone)]
pub struct RetryLayer {
    policy: RetryPolicy,
    clock: Clock,
}

impl<S> Layer<S> for RetryLayer {
    type Service = Retry<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Retry {
            inner,
            policy: self.policy.clone(),
            clock: self.clock.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tick::ClockControl;

    use super::*;
    use crate::{ExponentialBackoff, FetcherError};

    #[tokio::test]
    async fn retries_until_policy_gives_up() {
        let config = StoreConfig::new(ClockControl::new().auto_advance_timers(true).to_clock());
        let calls = Arc::new(AtomicU32::new(0));

        let service = Retry::layer(ExponentialBackoff::default().max_retries(2), &config).layer(layered::Execute::new({
            let calls = Arc::clone(&calls);
            move |_: FetchRequest<u8>| {
                calls.fetch_add(1, Ordering::Relaxed);
                async { FetcherResult::<u8>::error(FetcherError::http(500, "boom")) }
            }
        }));

        assert!(service.execute(FetchRequest::new(1)).await.is_error());
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }
}
