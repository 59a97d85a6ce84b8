// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Read-through data stores that coordinate a remote source with a local source of truth.
//!
//! A [`Store`] combines a [`Fetcher`], which reads entities from a remote source, with a
//! [`SourceOfTruth`](source_of_truth::SourceOfTruth), which keeps them locally and notifies
//! listeners when they change. Callers read through the store and never talk to the remote
//! source directly. The store decides when a fetch is worth making:
//!
//! - [`RateLimiter`]: limits how often a key is fetched, per [`RateLimitPolicy`].
//! - [`ThrottlingController`]: a circuit breaker shared by every store built from the same
//!   [`StoreConfig`]. Repeated connectivity failures pause all fetches for a while.
//! - [`RetryPolicy`]: retries a failed fetch with exponential backoff.
//! - Join in progress: concurrent fetches of the same key share one remote call.
//!
//! [`CrudStore`] adds writes. They are applied locally right away and sent to the remote
//! source in the background until it confirms them.
//!
//! # Reading
//!
//! ```
//! use futures_util::StreamExt;
//! use larder::source_of_truth::SourceOfTruth;
//! use larder::{FetcherResult, Store, StoreConfig, StoreImpl, StoreResponse, fetcher_fn};
//! use tick::Clock;
//!
//! # async fn example(clock: Clock, sot: impl SourceOfTruth<u32, String> + 'static) {
//! let store = StoreImpl::new(
//!     fetcher_fn(|id: u32| async move { FetcherResult::data(format!("user {id}")) }),
//!     sot,
//!     StoreConfig::new(clock),
//! );
//!
//! // Reads storage, fetching on a miss.
//! if let StoreResponse::Data(user, origin) = store.get_key(7).await {
//!     println!("{user} from {origin:?}");
//! }
//!
//! // Follows storage while refreshing the key in the background.
//! let mut updates = store.stream_key(7, true);
//! while let Some(response) = updates.next().await {
//!     println!("{response:?}");
//! }
//! # }
//! ```
//!
//! # Fetch Pipelines
//!
//! The decisions the store makes are also available as middleware in [`layers`], for
//! composing fetchers outside of a store.
//!
//! # Logging
//!
//! Decisions are reported as [`tracing`](https://docs.rs/tracing) events named
//! `larder.<component>.<event>`, for example `larder.rate_limit.skipped` or
//! `larder.throttling.activated`.

mod config;
mod controller;
mod crud;
mod error;
mod fetcher;
mod in_flight;
pub mod layers;
mod pending;
mod rate_limit;
mod request;
mod response;
mod result;
mod retry;
mod scope;
pub mod source_of_truth;
mod store;
mod throttling;

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
pub(crate) mod testing;

pub use config::StoreConfig;
pub use controller::FetcherController;
pub use crud::{CrudStore, Sender};
pub use error::{ErrorBody, FetcherError, FetcherErrorKind, StoreError};
pub use fetcher::{Entity, FetchRequest, Fetcher, FnFetcher, Key, Mapper, SameEntityMapper, fetcher_fn};
pub use pending::{CrudOperation, PendingChange};
pub use rate_limit::{RateLimitPolicy, RateLimiter};
#[doc(inline)]
pub use recoverable::{Recovery, RecoveryInfo, RecoveryKind};
pub use request::StoreRequest;
pub use response::{ResponseOrigin, StoreResponse};
pub use result::FetcherResult;
pub use retry::{ExponentialBackoff, RetryPolicy};
pub use scope::{CloseableResourceManager, ScopedStore};
pub use store::{Store, StoreImpl};
pub use throttling::{ThrottlingConfig, ThrottlingController, ThrottlingState};
