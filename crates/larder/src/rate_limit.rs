// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Rate limiting of fetch attempts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tick::Clock;

/// Default window of [`RateLimitPolicy::FixedWindow`].
pub(crate) const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Default number of fetches allowed per window of [`RateLimitPolicy::FixedWindow`].
pub(crate) const DEFAULT_MAX_EVENTS: u32 = 1;

/// Decides how often a fetcher may be called for the same key.
///
/// The default policy allows a single fetch every five seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum RateLimitPolicy {
    /// Allows up to `max_events` fetches per fixed window of `duration`.
    ///
    /// The window opens on the first fetch and resets once `duration` has elapsed.
    FixedWindow {
        /// Length of the window.
        duration: Duration,
        /// Number of fetches allowed within one window, including the one that opens it.
        max_events: u32,
    },
    /// Every fetch is allowed.
    FetchAlways,
    /// Only the first fetch is ever allowed.
    FetchOnlyOnce,
}

impl RateLimitPolicy {
    /// Creates a [`RateLimitPolicy::FixedWindow`] policy.
    #[must_use]
    pub fn fixed_window(duration: Duration, max_events: u32) -> Self {
        Self::FixedWindow { duration, max_events }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::fixed_window(DEFAULT_WINDOW, DEFAULT_MAX_EVENTS)
    }
}

/// The stateful limiter built from a [`RateLimitPolicy`].
///
/// Safe to share between tasks; concurrent callers never observe more admitted fetches per
/// window than the policy allows.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use larder::{RateLimitPolicy, RateLimiter};
/// use tick::Clock;
///
/// # fn example(clock: &Clock) {
/// let limiter = RateLimiter::new(RateLimitPolicy::fixed_window(Duration::from_secs(1), 2), clock);
///
/// assert!(limiter.should_fetch());
/// assert!(limiter.should_fetch());
/// assert!(!limiter.should_fetch());
/// # }
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    kind: LimiterKind,
}

#[derive(Debug)]
enum LimiterKind {
    Always,
    OnlyOnce(AtomicBool),
    FixedWindow(FixedWindow),
}

impl RateLimiter {
    /// Creates a limiter enforcing `policy`, reading time from `clock`.
    #[must_use]
    pub fn new(policy: RateLimitPolicy, clock: &Clock) -> Self {
        let kind = match policy {
            RateLimitPolicy::FetchAlways => LimiterKind::Always,
            RateLimitPolicy::FetchOnlyOnce => LimiterKind::OnlyOnce(AtomicBool::new(false)),
            RateLimitPolicy::FixedWindow { duration, max_events } => {
                LimiterKind::FixedWindow(FixedWindow::new(clock.clone(), duration, max_events))
            }
        };

        Self { kind }
    }

    /// Records a fetch attempt and returns whether it is allowed.
    pub fn should_fetch(&self) -> bool {
        match &self.kind {
            LimiterKind::Always => true,
            LimiterKind::OnlyOnce(fetched) => !fetched.swap(true, Ordering::AcqRel),
            LimiterKind::FixedWindow(window) => window.should_fetch(),
        }
    }
}

#[derive(Debug)]
struct FixedWindow {
    clock: Clock,
    duration: Duration,
    max_events: u32,
    state: Mutex<WindowState>,
}

#[derive(Debug, Default)]
struct WindowState {
    opened_at: Option<Instant>,
    count: u32,
}

impl FixedWindow {
    fn new(clock: Clock, duration: Duration, max_events: u32) -> Self {
        Self {
            clock,
            duration,
            max_events,
            state: Mutex::new(WindowState::default()),
        }
    }

    fn should_fetch(&self) -> bool {
        let now = self.clock.instant();
        let mut state = self.state.lock();

        match state.opened_at {
            Some(opened_at) if now.saturating_duration_since(opened_at) < self.duration => {
                state.count = state.count.saturating_add(1);
                state.count <= self.max_events
            }
            _ => {
                state.opened_at = Some(now);
                state.count = 1;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tick::ClockControl;

    use super::*;

    #[test]
    fn fixed_window_allows_max_events_then_resets() {
        let control = ClockControl::new();
        let limiter = RateLimiter::new(RateLimitPolicy::fixed_window(Duration::from_secs(1), 2), &control.to_clock());

        assert!(limiter.should_fetch());
        assert!(limiter.should_fetch());
        assert!(!limiter.should_fetch());

        control.advance(Duration::from_secs(3));
        assert!(limiter.should_fetch());
    }

    #[test]
    fn fixed_window_counts_from_the_opening_fetch() {
        let control = ClockControl::new();
        let limiter = RateLimiter::new(RateLimitPolicy::fixed_window(Duration::from_secs(1), 3), &control.to_clock());

        assert!(limiter.should_fetch());

        control.advance(Duration::from_secs(3));
        assert!(limiter.should_fetch());
        assert!(limiter.should_fetch());
        assert!(limiter.should_fetch());
        assert!(!limiter.should_fetch());

        control.advance(Duration::from_secs(2));
        assert!(limiter.should_fetch());
    }

    #[test]
    fn fixed_window_stays_closed_until_elapsed() {
        let control = ClockControl::new();
        let limiter = RateLimiter::new(RateLimitPolicy::default(), &control.to_clock());

        assert!(limiter.should_fetch());
        control.advance(Duration::from_millis(4_999));
        assert!(!limiter.should_fetch());
        control.advance(Duration::from_millis(1));
        assert!(limiter.should_fetch());
    }

    #[test]
    fn fetch_only_once() {
        let limiter = RateLimiter::new(RateLimitPolicy::FetchOnlyOnce, &Clock::new_frozen());

        assert!(limiter.should_fetch());
        assert!(!limiter.should_fetch());
        assert!(!limiter.should_fetch());
    }

    #[test]
    fn fetch_always() {
        let limiter = RateLimiter::new(RateLimitPolicy::FetchAlways, &Clock::new_frozen());

        assert!((0..100).all(|_| limiter.should_fetch()));
    }

    #[test]
    fn concurrent_callers_share_one_window() {
        let limiter = Arc::new(RateLimiter::new(
            RateLimitPolicy::fixed_window(Duration::from_secs(60), 5),
            &Clock::new_frozen(),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || (0..10).filter(|_| limiter.should_fetch()).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().expect("thread panicked")).sum();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn default_policy_is_one_fetch_per_five_seconds() {
        assert_eq!(
            RateLimitPolicy::default(),
            RateLimitPolicy::FixedWindow {
                duration: Duration::from_secs(5),
                max_events: 1,
            }
        );
    }

    #[test]
    #[cfg(feature = "serde")]
    fn policy_serialize_deserialize() {
        let policy = RateLimitPolicy::fixed_window(Duration::from_secs(30), 3);
        let serialized = serde_json::to_string(&policy).expect("serializable");
        let deserialized: RateLimitPolicy = serde_json::from_str(&serialized).expect("deserializable");

        assert_eq!(policy, deserialized);
    }
}
