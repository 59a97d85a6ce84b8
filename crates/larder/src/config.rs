// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use tick::Clock;

use crate::{ThrottlingConfig, ThrottlingController};

/// Configuration shared by the stores of an application.
///
/// The configuration is constructed once and handed to every store. Cloning it is cheap, and
/// clones share the same [`ThrottlingController`], so all stores built from them trip and
/// recover together.
///
/// # Examples
///
/// ```
/// use larder::StoreConfig;
/// use tick::Clock;
///
/// # fn example(clock: Clock) {
/// let config = StoreConfig::new(clock).with_rate_limiter_enabled(false);
///
/// assert!(!config.rate_limiter_enabled());
/// assert!(config.throttling_enabled());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    clock: Clock,
    rate_limiter_enabled: bool,
    throttling_enabled: bool,
    throttling: Arc<ThrottlingController>,
}

impl StoreConfig {
    /// Creates a configuration with rate limiting and throttling enabled and a fresh
    /// [`ThrottlingController`] using [`ThrottlingConfig::default`].
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            throttling: Arc::new(ThrottlingController::new(ThrottlingConfig::default(), clock.clone())),
            clock,
            rate_limiter_enabled: true,
            throttling_enabled: true,
        }
    }

    /// Enables or disables rate limiting of non-forced fetches.
    #[must_use]
    pub fn with_rate_limiter_enabled(mut self, enabled: bool) -> Self {
        self.rate_limiter_enabled = enabled;
        self
    }

    /// Enables or disables throttling.
    #[must_use]
    pub fn with_throttling_enabled(mut self, enabled: bool) -> Self {
        self.throttling_enabled = enabled;
        self
    }

    /// Replaces the throttling controller, for example to share one between configurations.
    #[must_use]
    pub fn with_throttling(mut self, throttling: Arc<ThrottlingController>) -> Self {
        self.throttling = throttling;
        self
    }

    /// Replaces the throttling controller with a fresh one applying `config`.
    #[must_use]
    pub fn with_throttling_config(self, config: ThrottlingConfig) -> Self {
        let throttling = Arc::new(ThrottlingController::new(config, self.clock.clone()));
        self.with_throttling(throttling)
    }

    /// The clock every component reads time from.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Whether non-forced fetches are rate limited.
    #[must_use]
    pub fn rate_limiter_enabled(&self) -> bool {
        self.rate_limiter_enabled
    }

    /// Whether throttling is applied.
    #[must_use]
    pub fn throttling_enabled(&self) -> bool {
        self.throttling_enabled
    }

    /// The shared throttling controller.
    #[must_use]
    pub fn throttling(&self) -> &Arc<ThrottlingController> {
        &self.throttling
    }

    pub(crate) fn is_throttling(&self) -> bool {
        self.throttling_enabled && self.throttling.is_throttling()
    }

    pub(crate) fn record_error(&self, error: &crate::FetcherError) {
        if self.throttling_enabled {
            self.throttling.on_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_throttling() {
        let config = StoreConfig::new(Clock::new_frozen());
        let clone = config.clone().with_rate_limiter_enabled(false);

        assert!(Arc::ptr_eq(config.throttling(), clone.throttling()));
        assert!(config.rate_limiter_enabled());
        assert!(!clone.rate_limiter_enabled());
    }

    #[test]
    fn disabled_throttling_ignores_errors() {
        let config = StoreConfig::new(Clock::new_frozen()).with_throttling_enabled(false);

        for _ in 0..5 {
            config.record_error(&crate::FetcherError::from(std::io::Error::other("offline")));
        }

        assert!(!config.is_throttling());
        assert!(!config.throttling().is_throttling());
    }

    #[test]
    fn throttling_config_replaces_controller() {
        let config = StoreConfig::new(Clock::new_frozen());
        let custom = config
            .clone()
            .with_throttling_config(ThrottlingConfig::default().error_count_threshold(1));

        assert!(!Arc::ptr_eq(config.throttling(), custom.throttling()));
        assert_eq!(custom.throttling().config().error_count_threshold, 1);
    }
}
