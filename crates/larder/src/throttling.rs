// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A shared circuit breaker that suppresses fetches after repeated systemic failures.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tick::Clock;
use tokio::sync::watch;

use crate::{FetcherError, FetcherErrorKind};

/// Thresholds used by a [`ThrottlingController`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub struct ThrottlingConfig {
    /// Number of errors that must occur within [`Self::error_duration_threshold`] to start throttling.
    pub error_count_threshold: usize,
    /// Errors spread over a longer span than this are considered sparse and never throttle.
    /// Also the upper bound of a throttling window.
    pub error_duration_threshold: Duration,
    /// Length of the first throttling window. Each consecutive activation doubles it.
    pub initial_timeout: Duration,
    /// Kinds of fetcher errors that count towards throttling.
    pub detected_errors: HashSet<FetcherErrorKind>,
}

impl ThrottlingConfig {
    /// Sets [`Self::error_count_threshold`].
    #[must_use]
    pub fn error_count_threshold(mut self, threshold: usize) -> Self {
        self.error_count_threshold = threshold;
        self
    }

    /// Sets [`Self::error_duration_threshold`].
    #[must_use]
    pub fn error_duration_threshold(mut self, threshold: Duration) -> Self {
        self.error_duration_threshold = threshold;
        self
    }

    /// Sets [`Self::initial_timeout`].
    #[must_use]
    pub fn initial_timeout(mut self, timeout: Duration) -> Self {
        self.initial_timeout = timeout;
        self
    }

    /// Replaces [`Self::detected_errors`].
    #[must_use]
    pub fn detected_errors(mut self, kinds: impl IntoIterator<Item = FetcherErrorKind>) -> Self {
        self.detected_errors = kinds.into_iter().collect();
        self
    }
}

impl Default for ThrottlingConfig {
    fn default() -> Self {
        Self {
            error_count_threshold: 3,
            error_duration_threshold: Duration::from_secs(60),
            initial_timeout: Duration::from_secs(15),
            detected_errors: HashSet::from([FetcherErrorKind::Io]),
        }
    }
}

/// A snapshot of the throttling controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThrottlingState {
    /// Whether the last recorded error activated throttling.
    pub is_throttling: bool,
    /// Until when fetches are suppressed. Cleared by the next error that does not activate
    /// throttling.
    pub throttled_until: Option<Instant>,
}

/// Observes fetch failures across every store that shares it and suppresses all fetches for
/// a cooldown window after repeated failures.
///
/// The controller is constructed explicitly and shared through [`StoreConfig`][crate::StoreConfig];
/// stores built from configurations holding the same controller share one breaker.
///
/// # Examples
///
/// ```
/// use larder::{FetcherError, ThrottlingConfig, ThrottlingController};
/// use tick::Clock;
///
/// # fn example(clock: Clock) {
/// let throttling = ThrottlingController::new(ThrottlingConfig::default(), clock);
///
/// for _ in 0..3 {
///     throttling.on_error(&FetcherError::from(std::io::Error::other("offline")));
/// }
///
/// assert!(throttling.is_throttling());
/// # }
/// ```
#[derive(Debug)]
pub struct ThrottlingController {
    config: ThrottlingConfig,
    clock: Clock,
    inner: Mutex<Inner>,
    state: watch::Sender<ThrottlingState>,
}

#[derive(Debug)]
struct Inner {
    error_timestamps: VecDeque<Instant>,
    backoff_factor: u32,
    state: ThrottlingState,
}

impl ThrottlingController {
    /// Creates a controller applying `config` and reading time from `clock`.
    #[must_use]
    pub fn new(config: ThrottlingConfig, clock: Clock) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(Inner {
                error_timestamps: VecDeque::new(),
                backoff_factor: 1,
                state: ThrottlingState::default(),
            }),
            state: watch::Sender::new(ThrottlingState::default()),
        }
    }

    /// Returns the configuration of this controller.
    #[must_use]
    pub fn config(&self) -> &ThrottlingConfig {
        &self.config
    }

    /// Returns `true` while fetches are suppressed.
    #[must_use]
    pub fn is_throttling(&self) -> bool {
        let throttled_until = self.inner.lock().state.throttled_until;
        throttled_until.is_some_and(|until| self.clock.instant() < until)
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ThrottlingState {
        self.inner.lock().state
    }

    /// Returns a receiver observing every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ThrottlingState> {
        self.state.subscribe()
    }

    /// Returns whether `error` counts towards throttling.
    #[must_use]
    pub fn is_detected(&self, error: &FetcherError) -> bool {
        self.config.detected_errors.contains(&error.kind())
    }

    /// Records `error` if its kind counts towards throttling.
    pub fn on_error(&self, error: &FetcherError) {
        if self.is_detected(error) {
            self.on_server_error();
        }
    }

    /// Records a server error and activates throttling once enough errors occurred close together.
    pub fn on_server_error(&self) {
        let now = self.clock.instant();
        let mut inner = self.inner.lock();

        inner.error_timestamps.push_back(now);

        if inner.error_timestamps.len() < self.config.error_count_threshold {
            self.clear(&mut inner);
            return;
        }

        let oldest = inner.error_timestamps.pop_front().unwrap_or(now);
        if now.saturating_duration_since(oldest) > self.config.error_duration_threshold {
            self.clear(&mut inner);
            return;
        }

        inner.backoff_factor = if inner.state.throttled_until.is_some() {
            inner.backoff_factor.saturating_mul(2)
        } else {
            1
        };

        let window = self
            .config
            .initial_timeout
            .saturating_mul(inner.backoff_factor)
            .min(self.config.error_duration_threshold);

        inner.state = ThrottlingState {
            is_throttling: true,
            throttled_until: Some(now + window),
        };

        tracing::event!(
            name: "larder.throttling.activated",
            tracing::Level::WARN,
            throttling.window = window.as_secs_f32(),
            throttling.backoff_factor = inner.backoff_factor,
        );

        self.state.send_replace(inner.state);
    }

    fn clear(&self, inner: &mut Inner) {
        // The next activation starts over from the initial timeout.
        inner.state = ThrottlingState::default();
        self.state.send_replace(inner.state);
    }
}
