// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error taxonomy for fetches and store responses.

use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use recoverable::{Recovery, RecoveryInfo};

use crate::source_of_truth;

type BoxedCause = Arc<dyn std::error::Error + Send + Sync>;

/// Why a fetch attempt failed.
///
/// Fetchers map transport failures into one of these variants. Decorators such as retry,
/// throttling and join-in-progress only inspect and forward them, so the final error of a
/// fetch always reaches the store and the caller.
///
/// The type is cheap to clone: causes are reference counted so that a single failure can be
/// broadcast to every caller waiting on the same in-flight request.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum FetcherError {
    /// Transport-level failure such as a lost connection.
    #[error("i/o error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// The remote rejected the request.
    #[error("http error {code}: {message}")]
    Http {
        /// Status code returned by the remote.
        code: u16,
        /// Status message or body text returned by the remote.
        message: String,
    },

    /// The remote rejected the request and returned an error payload the caller parsed.
    #[error("http error {code}: {message}")]
    EntityHttp {
        /// Status code returned by the remote.
        code: u16,
        /// Status message returned by the remote.
        message: String,
        /// The parsed error payload, see [`FetcherError::body`].
        body: ErrorBody,
    },

    /// An unexpected failure raised inside the fetch pipeline rather than by the transport.
    #[error("client error: {0}")]
    Client(#[source] BoxedCause),

    /// Synthetic error returned while the throttling controller suppresses fetches.
    #[error("throttled request, too many API errors")]
    Throttling,

    /// Catch-all for failures that fit no other variant.
    #[error("unknown error: {0}")]
    Unknown(#[source] BoxedCause),
}

impl FetcherError {
    /// Creates an [`FetcherError::Http`] error.
    pub fn http(code: u16, message: impl Into<String>) -> Self {
        Self::Http {
            code,
            message: message.into(),
        }
    }

    /// Creates an [`FetcherError::EntityHttp`] error carrying a parsed payload.
    ///
    /// # Examples
    ///
    /// ```
    /// use larder::FetcherError;
    ///
    /// #[derive(Debug, PartialEq)]
    /// struct ApiError {
    ///     reason: String,
    /// }
    ///
    /// let error = FetcherError::entity_http(
    ///     422,
    ///     "unprocessable",
    ///     ApiError {
    ///         reason: "title is empty".into(),
    ///     },
    /// );
    ///
    /// assert_eq!(error.body::<ApiError>().map(|e| e.reason.as_str()), Some("title is empty"));
    /// assert!(error.body::<String>().is_none());
    /// ```
    pub fn entity_http<E>(code: u16, message: impl Into<String>, body: E) -> Self
    where
        E: Debug + Send + Sync + 'static,
    {
        Self::EntityHttp {
            code,
            message: message.into(),
            body: ErrorBody::new(body),
        }
    }

    /// Creates an [`FetcherError::Client`] error from any error or message.
    pub fn client(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Client(Arc::from(cause.into()))
    }

    /// Creates an [`FetcherError::Unknown`] error from any error or message.
    pub fn unknown(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Unknown(Arc::from(cause.into()))
    }

    /// Returns the discriminant of this error.
    #[must_use]
    pub fn kind(&self) -> FetcherErrorKind {
        match self {
            Self::Io(_) => FetcherErrorKind::Io,
            Self::Http { .. } => FetcherErrorKind::Http,
            Self::EntityHttp { .. } => FetcherErrorKind::EntityHttp,
            Self::Client(_) => FetcherErrorKind::Client,
            Self::Throttling => FetcherErrorKind::Throttling,
            Self::Unknown(_) => FetcherErrorKind::Unknown,
        }
    }

    /// Returns the status code for HTTP errors.
    #[must_use]
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Http { code, .. } | Self::EntityHttp { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns the parsed error payload of an [`FetcherError::EntityHttp`] error when it has type `E`.
    #[must_use]
    pub fn body<E: 'static>(&self) -> Option<&E> {
        match self {
            Self::EntityHttp { body, .. } => body.downcast_ref(),
            _ => None,
        }
    }

    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "fetcher panicked".to_string());

        Self::client(message)
    }
}

impl From<std::io::Error> for FetcherError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

impl Recovery for FetcherError {
    fn recovery(&self) -> RecoveryInfo {
        match self {
            Self::Io(_) => RecoveryInfo::retry(),
            Self::Http { code, .. } | Self::EntityHttp { code, .. } => match code {
                500..=599 => RecoveryInfo::retry(),
                400..=499 => RecoveryInfo::never(),
                _ => RecoveryInfo::unknown(),
            },
            Self::Throttling => RecoveryInfo::unavailable(),
            Self::Client(_) | Self::Unknown(_) => RecoveryInfo::unknown(),
        }
    }
}

/// The discriminant of a [`FetcherError`], used to classify failures in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum FetcherErrorKind {
    /// See [`FetcherError::Io`].
    Io,
    /// See [`FetcherError::Http`].
    Http,
    /// See [`FetcherError::EntityHttp`].
    EntityHttp,
    /// See [`FetcherError::Client`].
    Client,
    /// See [`FetcherError::Throttling`].
    Throttling,
    /// See [`FetcherError::Unknown`].
    Unknown,
}

/// A type-erased error payload parsed by a fetcher.
#[derive(Clone)]
pub struct ErrorBody {
    value: Arc<dyn Any + Send + Sync>,
    debug: Arc<str>,
}

impl ErrorBody {
    fn new<E>(value: E) -> Self
    where
        E: Debug + Send + Sync + 'static,
    {
        Self {
            debug: Arc::from(format!("{value:?}")),
            value: Arc::new(value),
        }
    }

    fn downcast_ref<E: 'static>(&self) -> Option<&E> {
        self.value.downcast_ref()
    }
}

impl Debug for ErrorBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.debug)
    }
}

/// The error carried by [`StoreResponse::Error`][crate::StoreResponse::Error].
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The fetch failed.
    #[error(transparent)]
    Fetcher(#[from] FetcherError),

    /// The source of truth failed.
    #[error("source of truth error: {0}")]
    Storage(#[source] Arc<source_of_truth::Error>),

    /// No data exists for the key and none was fetched.
    #[error("no data found")]
    NoDataFound,

    /// The fetcher returned a result that carries no entity.
    #[error("unexpected fetcher result")]
    UnexpectedResult,
}

impl From<source_of_truth::Error> for StoreError {
    fn from(error: source_of_truth::Error) -> Self {
        Self::Storage(Arc::new(error))
    }
}

impl Recovery for StoreError {
    fn recovery(&self) -> RecoveryInfo {
        match self {
            Self::Fetcher(error) => error.recovery(),
            Self::Storage(_) => RecoveryInfo::unknown(),
            Self::NoDataFound | Self::UnexpectedResult => RecoveryInfo::never(),
        }
    }
}
