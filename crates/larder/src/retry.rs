// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Retrying failed fetches with exponential backoff.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use recoverable::{Recovery, RecoveryKind};
use tick::Clock;

use crate::{FetcherError, FetcherResult};

/// Default number of retries of [`ExponentialBackoff`].
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 1;

/// Default delay before the first retry of [`ExponentialBackoff`].
pub(crate) const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(2);

/// Default multiplier applied to the delay after each retry of [`ExponentialBackoff`].
pub(crate) const DEFAULT_BACKOFF_RATE: u32 = 2;

/// How a failed fetch is retried.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub enum RetryPolicy {
    /// Failed fetches are returned as they are.
    #[default]
    DoNotRetry,
    /// Failed fetches are retried with exponentially growing delays.
    ExponentialBackoff(ExponentialBackoff),
}

impl From<ExponentialBackoff> for RetryPolicy {
    fn from(backoff: ExponentialBackoff) -> Self {
        Self::ExponentialBackoff(backoff)
    }
}

/// Retries a failed fetch up to [`max_retries`][Self::max_retries] times.
///
/// The first retry waits [`initial_backoff`][Self::initial_backoff]; each following retry waits
/// [`backoff_rate`][Self::backoff_rate] times longer than the previous one.
///
/// Which errors are retried is decided, in order of precedence, by the error code filter, the
/// predicate, or neither (every error is retried).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use larder::{ExponentialBackoff, RetryPolicy};
///
/// let policy: RetryPolicy = ExponentialBackoff::default()
///     .max_retries(3)
///     .initial_backoff(Duration::from_millis(500))
///     .retry_on_error_codes([502, 503])
///     .into();
/// ```
#[derive(Clone)]
pub struct ExponentialBackoff {
    max_retries: u32,
    initial_backoff: Duration,
    backoff_rate: u32,
    retry_on_error_codes: Option<Vec<u16>>,
    retry_on: Option<RetryPredicate>,
}

type RetryPredicate = Arc<dyn Fn(&FetcherError) -> bool + Send + Sync>;

impl ExponentialBackoff {
    /// Sets the maximum number of retries after the first attempt.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Sets the multiplier applied to the delay after each retry.
    #[must_use]
    pub fn backoff_rate(mut self, rate: u32) -> Self {
        self.backoff_rate = rate;
        self
    }

    /// Only retries HTTP errors whose status code is one of `codes`.
    #[must_use]
    pub fn retry_on_error_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_on_error_codes = Some(codes.into_iter().collect());
        self
    }

    /// Only retries errors for which `predicate` returns `true`.
    ///
    /// Ignored when an error code filter is set.
    #[must_use]
    pub fn retry_on(mut self, predicate: impl Fn(&FetcherError) -> bool + Send + Sync + 'static) -> Self {
        self.retry_on = Some(Arc::new(predicate));
        self
    }

    /// Only retries errors whose [`Recovery`] classification is [`RecoveryKind::Retry`].
    ///
    /// Transport failures and 5xx responses are retried; 4xx responses and throttling
    /// rejections are not.
    #[must_use]
    pub fn retry_recoverable(self) -> Self {
        self.retry_on(|error| matches!(error.recovery().kind(), RecoveryKind::Retry))
    }

    fn is_retryable(&self, error: &FetcherError) -> bool {
        match (&self.retry_on_error_codes, &self.retry_on) {
            (Some(codes), _) => error.code().is_some_and(|code| codes.contains(&code)),
            (None, Some(predicate)) => predicate(error),
            (None, None) => true,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            backoff_rate: DEFAULT_BACKOFF_RATE,
            retry_on_error_codes: None,
            retry_on: None,
        }
    }
}

impl Debug for ExponentialBackoff {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExponentialBackoff")
            .field("max_retries", &self.max_retries)
            .field("initial_backoff", &self.initial_backoff)
            .field("backoff_rate", &self.backoff_rate)
            .field("retry_on_error_codes", &self.retry_on_error_codes)
            .field("retry_on", &self.retry_on.is_some())
            .finish()
    }
}

/// Tracks the retries of one fetch.
#[derive(Debug)]
struct Attempts<'a> {
    policy: &'a RetryPolicy,
    retries: u32,
    next_delay: Duration,
}

impl<'a> Attempts<'a> {
    fn new(policy: &'a RetryPolicy) -> Self {
        let next_delay = match policy {
            RetryPolicy::DoNotRetry => Duration::ZERO,
            RetryPolicy::ExponentialBackoff(backoff) => backoff.initial_backoff,
        };

        Self {
            policy,
            retries: 0,
            next_delay,
        }
    }

    /// Returns the delay before retrying after `error`, or `None` when the fetch must not be retried.
    fn retry_after(&mut self, error: &FetcherError) -> Option<Duration> {
        let RetryPolicy::ExponentialBackoff(backoff) = self.policy else {
            return None;
        };

        if !backoff.is_retryable(error) {
            return None;
        }

        if self.retries > 0 {
            self.next_delay = self.next_delay.saturating_mul(backoff.backoff_rate);
        }

        self.retries = self.retries.saturating_add(1);
        (self.retries <= backoff.max_retries).then_some(self.next_delay)
    }
}

/// Runs `attempt` and retries it according to `policy` while it returns an error.
///
/// Returns the first result that is not an error, or the last error once the policy gives up.
pub(crate) async fn execute<I, F, Fut>(policy: &RetryPolicy, clock: &Clock, mut attempt: F) -> FetcherResult<I>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FetcherResult<I>>,
{
    let mut attempts = Attempts::new(policy);
    let mut result = attempt().await;

    while let FetcherResult::Error(error) = &result {
        let Some(delay) = attempts.retry_after(error) else {
            break;
        };

        tracing::event!(
            name: "larder.retry",
            tracing::Level::WARN,
            retry.attempt = attempts.retries,
            retry.delay = delay.as_secs_f32(),
            error = %error,
        );

        clock.delay(delay).await;
        result = attempt().await;
    }

    result
}
