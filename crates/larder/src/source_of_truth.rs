// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The local storage contract a store reads from and writes fetched entities into.

use std::fmt::Display;
use std::sync::Arc;

use futures_util::stream::BoxStream;

/// An error from a source of truth operation.
///
/// This is an opaque error type that can wrap any underlying error from a storage
/// implementation. Use [`std::error::Error::source()`] to access the underlying
/// cause if needed.
///
/// # Example
///
/// ```
/// use larder::source_of_truth::Error;
///
/// let error = Error::caused_by("disk full");
/// assert!(error.to_string().contains("disk full"));
/// ```
#[ohno::error]
pub struct Error {}

impl Error {
    /// Creates the error returned by [`SourceOfTruth::get`] when the key holds no entity.
    pub fn not_found(key: impl Display) -> Self {
        Self::caused_by(format!("no entity stored for key {key}"))
    }
}

/// A specialized [`Result`] type for source of truth operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Durable, observable local storage for entities of type `T` addressed by keys of type `K`.
///
/// Implementations wrap a concrete storage engine and own its change-notification
/// mechanism: every successful [`store`][Self::store] or [`delete`][Self::delete] must be
/// observed by the streams returned from [`listen`][Self::listen] for the affected key.
pub trait SourceOfTruth<K, T>: Send + Sync {
    /// Returns whether an entity is stored for `key`.
    fn exists(&self, key: &K) -> impl Future<Output = Result<bool>> + Send;

    /// Returns the entity stored for `key`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::not_found`] when nothing is stored for `key`.
    fn get(&self, key: &K) -> impl Future<Output = Result<T>> + Send;

    /// Streams the entity stored for `key`, starting with the current one, then once per change.
    ///
    /// The stream does not end on its own; dropping it stops the observation.
    fn listen(&self, key: &K) -> BoxStream<'static, T>;

    /// Stores `value` under `key` and returns what was stored.
    ///
    /// When `remove_stale` is set, the implementation applies its staleness policy before
    /// the upsert.
    fn store(&self, key: &K, value: T, remove_stale: bool) -> impl Future<Output = Result<T>> + Send;

    /// Deletes the entity stored for `key`, returning whether anything was removed.
    fn delete(&self, key: &K) -> impl Future<Output = Result<bool>> + Send;
}

impl<K, T, S> SourceOfTruth<K, T> for Arc<S>
where
    S: SourceOfTruth<K, T>,
{
    fn exists(&self, key: &K) -> impl Future<Output = Result<bool>> + Send {
        (**self).exists(key)
    }

    fn get(&self, key: &K) -> impl Future<Output = Result<T>> + Send {
        (**self).get(key)
    }

    fn listen(&self, key: &K) -> BoxStream<'static, T> {
        (**self).listen(key)
    }

    fn store(&self, key: &K, value: T, remove_stale: bool) -> impl Future<Output = Result<T>> + Send {
        (**self).store(key, value, remove_stale)
    }

    fn delete(&self, key: &K) -> impl Future<Output = Result<bool>> + Send {
        (**self).delete(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_mentions_key() {
        let error = Error::not_found("users/7");
        let display = error.to_string();
        assert!(display.contains("users/7"), "display should mention the key, got: {display}");
    }

    #[test]
    fn result_alias_propagates_errors() {
        fn returns_err() -> Result<u8> {
            Err(Error::caused_by("expected failure"))
        }

        let err = returns_err().expect_err("should return an error");
        assert!(format!("{err}").contains("expected failure"));
    }
}
