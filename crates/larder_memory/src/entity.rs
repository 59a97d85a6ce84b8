// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use futures_util::stream::BoxStream;
use larder::source_of_truth::{self, SourceOfTruth};
use larder::{CloseableResourceManager, Entity, Key};

use crate::StalenessPolicy;
use crate::shared::Shared;

pub(crate) type Predicate<K, T> = Arc<dyn Fn(&K, &T) -> bool + Send + Sync>;

/// A source of truth keeping entities in memory.
///
/// Entities are not stored under their key. Instead, `predicate` decides which entities
/// belong to a key, so the same entity can be reached through different keys. Storing
/// replaces the first entity matching the key, or adds the entity when none matches.
///
/// [`listen`](SourceOfTruth::listen) replays the entity currently stored for the key and then
/// emits it again after every `store` or `delete` made through that key.
///
/// Clones share the same entities.
///
/// # Examples
///
/// ```
/// use larder::source_of_truth::SourceOfTruth;
/// use larder_memory::InMemorySourceOfTruth;
///
/// #[derive(Clone)]
/// struct User {
///     id: u32,
///     name: String,
/// }
///
/// # futures::executor::block_on(async {
/// let users = InMemorySourceOfTruth::new(|id: &u32, user: &User| user.id == *id);
///
/// users.store(&7, User { id: 7, name: "Ada".into() }, false).await?;
///
/// assert!(users.exists(&7).await?);
/// assert_eq!(users.get(&7).await?.name, "Ada");
/// # Ok::<(), larder::source_of_truth::Error>(())
/// # });
/// ```
pub struct InMemorySourceOfTruth<K, T> {
    shared: Arc<Shared<T>>,
    predicate: Predicate<K, T>,
    staleness: StalenessPolicy<T>,
}

impl<K, T> InMemorySourceOfTruth<K, T> {
    /// Creates an empty source of truth assigning entities to keys with `predicate`.
    #[must_use]
    pub fn new(predicate: impl Fn(&K, &T) -> bool + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            predicate: Arc::new(predicate),
            staleness: StalenessPolicy::DoNotExpire,
        }
    }

    /// Sets the policy applied when a store asks to remove stale entities.
    ///
    /// Any policy other than [`StalenessPolicy::DoNotExpire`] removes every entity matching
    /// the key before the new one is added.
    #[must_use]
    pub fn with_staleness_policy(mut self, policy: StalenessPolicy<T>) -> Self {
        self.staleness = policy;
        self
    }

    /// Returns the number of stored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.with_items(|items| items.len())
    }

    /// Returns whether no entity is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ends every listen stream. Later calls to `listen` start new streams.
    pub fn close_listeners(&self) {
        self.shared.close_listeners();
    }
}

impl<K, T: Send + 'static> InMemorySourceOfTruth<K, T> {
    /// Ends the listen streams when `resources` closes.
    pub fn release_on(&self, resources: &CloseableResourceManager) {
        let shared = Arc::clone(&self.shared);
        resources.add_close_listener(move || shared.close_listeners());
    }
}

impl<K, T: Clone> InMemorySourceOfTruth<K, T> {
    /// Returns a copy of every stored entity, in insertion order.
    #[must_use]
    pub fn entities(&self) -> Vec<T> {
        self.shared.with_items(|items| items.clone())
    }
}

impl<K: Key, T: Entity> SourceOfTruth<K, T> for InMemorySourceOfTruth<K, T> {
    async fn exists(&self, key: &K) -> source_of_truth::Result<bool> {
        Ok(self.shared.with_items(|items| items.iter().any(|item| (self.predicate)(key, item))))
    }

    async fn get(&self, key: &K) -> source_of_truth::Result<T> {
        self.shared
            .with_items(|items| items.iter().find(|item| (self.predicate)(key, item)).cloned())
            .ok_or_else(|| source_of_truth::Error::not_found(key))
    }

    fn listen(&self, key: &K) -> BoxStream<'static, T> {
        let predicate = Arc::clone(&self.predicate);
        let owned = key.clone();

        self.shared.listen(key.to_string(), move |items, _| {
            items.iter().find(|item| predicate(&owned, item)).cloned()
        })
    }

    async fn store(&self, key: &K, value: T, remove_stale: bool) -> source_of_truth::Result<T> {
        let matches = |item: &T| (self.predicate)(key, item);
        let stored = value.clone();

        let removed = self.shared.with_items(|items| {
            if remove_stale && self.staleness.expires() {
                let before = items.len();
                items.retain(|item| !matches(item));
                let removed = before - items.len();
                items.push(value);
                removed
            } else {
                match items.iter_mut().find(|item| matches(item)) {
                    Some(slot) => *slot = value,
                    None => items.push(value),
                }
                0
            }
        });

        if removed > 0 {
            tracing::event!(
                name: "larder.memory.stale_removed",
                tracing::Level::DEBUG,
                memory.key = %key,
                memory.removed = removed,
            );
        }

        self.shared.notify(&key.to_string());
        Ok(stored)
    }

    async fn delete(&self, key: &K) -> source_of_truth::Result<bool> {
        let removed = self.shared.with_items(|items| {
            let before = items.len();
            items.retain(|item| !(self.predicate)(key, item));
            items.len() != before
        });

        self.shared.notify(&key.to_string());
        Ok(removed)
    }
}

impl<K, T> Clone for InMemorySourceOfTruth<K, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            predicate: Arc::clone(&self.predicate),
            staleness: self.staleness.clone(),
        }
    }
}

impl<K, T> Debug for InMemorySourceOfTruth<K, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySourceOfTruth")
            .field("len", &self.len())
            .field("staleness", &self.staleness)
            .finish_non_exhaustive()
    }
}
