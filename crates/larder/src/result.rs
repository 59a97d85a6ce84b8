// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use recoverable::{Recovery, RecoveryInfo};

use crate::FetcherError;

/// The outcome of a single fetch attempt.
#[derive(Debug, Clone)]
pub enum FetcherResult<I> {
    /// The fetch returned an entity.
    Data {
        /// The fetched entity.
        value: I,
        /// `false` when the entity was shared from another caller's in-flight fetch. That
        /// caller persists it, so the receiver must not write it to storage again.
        cacheable: bool,
    },

    /// The remote acknowledged an operation without returning an entity.
    Success(bool),

    /// The fetch was skipped, for example by a rate limiter.
    NoData(String),

    /// The fetch failed.
    Error(FetcherError),
}

impl<I> FetcherResult<I> {
    /// Creates a cacheable [`FetcherResult::Data`].
    #[must_use]
    pub fn data(value: I) -> Self {
        Self::Data { value, cacheable: true }
    }

    /// Creates a [`FetcherResult::NoData`] with the given message.
    #[must_use]
    pub fn no_data(message: impl Into<String>) -> Self {
        Self::NoData(message.into())
    }

    /// Creates a [`FetcherResult::Error`].
    #[must_use]
    pub fn error(error: impl Into<FetcherError>) -> Self {
        Self::Error(error.into())
    }

    /// Returns `true` for [`FetcherResult::Data`].
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    /// Returns `true` for [`FetcherResult::Error`].
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Returns `true` when the remote confirmed the operation, either with an entity or a
    /// positive acknowledgement.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Data { .. } | Self::Success(true))
    }

    /// Returns the entity, if any.
    #[must_use]
    pub fn value(&self) -> Option<&I> {
        match self {
            Self::Data { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Marks an entity result as shared so that it is not persisted a second time.
    #[must_use]
    pub fn into_shared(self) -> Self {
        match self {
            Self::Data { value, .. } => Self::Data { value, cacheable: false },
            other => other,
        }
    }

    /// Maps the entity of a [`FetcherResult::Data`], keeping every other variant.
    pub fn map<U>(self, f: impl FnOnce(I) -> U) -> FetcherResult<U> {
        match self {
            Self::Data { value, cacheable } => FetcherResult::Data {
                value: f(value),
                cacheable,
            },
            Self::Success(success) => FetcherResult::Success(success),
            Self::NoData(message) => FetcherResult::NoData(message),
            Self::Error(error) => FetcherResult::Error(error),
        }
    }
}

impl<I> Recovery for FetcherResult<I> {
    fn recovery(&self) -> RecoveryInfo {
        match self {
            Self::Error(error) => error.recovery(),
            Self::Data { .. } | Self::Success(_) | Self::NoData(_) => RecoveryInfo::never(),
        }
    }
}
