// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! In-memory sources of truth for `larder` stores.
//!
//! [`InMemorySourceOfTruth`] keeps one entity per key and [`InMemoryListSourceOfTruth`] keeps
//! a collection per key. Both assign entities to keys with a predicate, notify listeners of
//! a key whenever it changes, and apply a [`StalenessPolicy`] when a store replaces fetched
//! data.
//!
//! # Quick Start
//!
//! ```
//! use larder::{FetcherResult, Store, StoreConfig, StoreImpl, StoreResponse, fetcher_fn};
//! use larder_memory::InMemorySourceOfTruth;
//! use tick::Clock;
//!
//! #[derive(Clone, Debug)]
//! struct User {
//!     id: u32,
//! }
//!
//! # async fn example(clock: Clock) {
//! let store = StoreImpl::new(
//!     fetcher_fn(|id: u32| async move { FetcherResult::data(User { id }) }),
//!     InMemorySourceOfTruth::new(|id: &u32, user: &User| user.id == *id),
//!     StoreConfig::new(clock),
//! );
//!
//! let user = store.get_key(1).await.require_data();
//! # let _ = user;
//! # }
//! ```

mod entity;
mod list;
mod shared;
mod staleness;

#[doc(inline)]
pub use entity::InMemorySourceOfTruth;
#[doc(inline)]
pub use list::InMemoryListSourceOfTruth;
#[doc(inline)]
pub use staleness::StalenessPolicy;
