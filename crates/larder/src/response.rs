// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::StoreError;

/// Where the entity of a [`StoreResponse`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseOrigin {
    /// Read from the local source of truth.
    SourceOfTruth,
    /// Returned by the fetcher and just written to the source of truth.
    Fetcher,
}

/// A response surfaced by a store.
#[derive(Debug, Clone)]
pub enum StoreResponse<T> {
    /// An entity together with its origin.
    Data(T, ResponseOrigin),
    /// Nothing to return, for example because the fetch was skipped by the rate limiter.
    NoData(String),
    /// A fetch for the given origin has started.
    Loading(ResponseOrigin),
    /// The operation failed.
    Error(StoreError),
}

impl<T> StoreResponse<T> {
    /// Returns the entity, if this is a [`StoreResponse::Data`].
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Data(value, _) => Some(value),
            _ => None,
        }
    }

    /// Returns the entity.
    ///
    /// # Errors
    ///
    /// Returns the carried error for [`StoreResponse::Error`] and [`StoreError::NoDataFound`] for
    /// [`StoreResponse::NoData`] and [`StoreResponse::Loading`].
    pub fn require_data(self) -> Result<T, StoreError> {
        match self {
            Self::Data(value, _) => Ok(value),
            Self::Error(error) => Err(error),
            Self::NoData(_) | Self::Loading(_) => Err(StoreError::NoDataFound),
        }
    }

    /// Returns the origin of a [`StoreResponse::Data`] or [`StoreResponse::Loading`].
    ///
    /// # Errors
    ///
    /// Returns the carried error for [`StoreResponse::Error`] and [`StoreError::NoDataFound`] for
    /// [`StoreResponse::NoData`].
    pub fn require_origin(&self) -> Result<ResponseOrigin, StoreError> {
        match self {
            Self::Data(_, origin) | Self::Loading(origin) => Ok(*origin),
            Self::Error(error) => Err(error.clone()),
            Self::NoData(_) => Err(StoreError::NoDataFound),
        }
    }

    /// Returns `true` for [`StoreResponse::Data`].
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data(..))
    }

    /// Returns `true` for [`StoreResponse::Error`].
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Maps the entity of a [`StoreResponse::Data`], keeping every other variant.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StoreResponse<U> {
        match self {
            Self::Data(value, origin) => StoreResponse::Data(f(value), origin),
            Self::NoData(message) => StoreResponse::NoData(message),
            Self::Loading(origin) => StoreResponse::Loading(origin),
            Self::Error(error) => StoreResponse::Error(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FetcherError;

    #[test]
    fn require_data_returns_value() {
        let response = StoreResponse::Data("post", ResponseOrigin::Fetcher);
        assert_eq!(response.require_origin().ok(), Some(ResponseOrigin::Fetcher));
        assert_eq!(response.require_data().ok(), Some("post"));
    }

    #[test]
    fn require_data_fails_for_other_variants() {
        let error = StoreResponse::<u8>::Error(FetcherError::Throttling.into())
            .require_data()
            .expect_err("error response has no data");
        assert!(matches!(error, StoreError::Fetcher(FetcherError::Throttling)));

        let error = StoreResponse::<u8>::NoData("skipped".into())
            .require_data()
            .expect_err("no data response has no data");
        assert!(matches!(error, StoreError::NoDataFound));

        let error = StoreResponse::<u8>::Loading(ResponseOrigin::Fetcher)
            .require_data()
            .expect_err("loading response has no data");
        assert!(matches!(error, StoreError::NoDataFound));
    }

    #[test]
    fn loading_has_an_origin() {
        let response = StoreResponse::<u8>::Loading(ResponseOrigin::Fetcher);
        assert_eq!(response.require_origin().ok(), Some(ResponseOrigin::Fetcher));
        assert!(StoreResponse::<u8>::NoData(String::new()).require_origin().is_err());
    }

    #[test]
    fn map_keeps_origin() {
        let response = StoreResponse::Data(2, ResponseOrigin::SourceOfTruth).map(|v| v * 10);
        assert!(matches!(response, StoreResponse::Data(20, ResponseOrigin::SourceOfTruth)));
    }
}
