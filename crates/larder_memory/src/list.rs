// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use futures_util::stream::BoxStream;
use larder::source_of_truth::{self, SourceOfTruth};
use larder::{CloseableResourceManager, Entity, Key};

use crate::StalenessPolicy;
use crate::entity::Predicate;
use crate::shared::Shared;

/// A source of truth keeping collections in memory.
///
/// The collection for a key is every stored entity for which `predicate` holds, in insertion
/// order. Storing a collection adds its entities; when the store asks to remove stale
/// entities, the [`StalenessPolicy`] decides which of the key's entities are dropped or
/// replaced first.
///
/// [`get`](SourceOfTruth::get) returns an empty collection for a key without entities, while
/// [`exists`](SourceOfTruth::exists) reports `false`. [`listen`](SourceOfTruth::listen)
/// replays the current collection when it is not empty, then emits it after every change made
/// through the key, including changes that leave it empty.
///
/// # Examples
///
/// ```
/// use larder::source_of_truth::SourceOfTruth;
/// use larder_memory::{InMemoryListSourceOfTruth, StalenessPolicy};
///
/// #[derive(Clone)]
/// struct Article {
///     id: u32,
///     topic: &'static str,
/// }
///
/// # futures::executor::block_on(async {
/// let articles = InMemoryListSourceOfTruth::new(|topic: &&str, article: &Article| article.topic == *topic)
///     .with_staleness_policy(StalenessPolicy::delete_all_not_in_fetch(|article: &Article| article.id));
///
/// let fetched = vec![Article { id: 1, topic: "rust" }, Article { id: 2, topic: "rust" }];
/// articles.store(&"rust", fetched, true).await?;
///
/// assert_eq!(articles.get(&"rust").await?.len(), 2);
/// # Ok::<(), larder::source_of_truth::Error>(())
/// # });
/// ```
pub struct InMemoryListSourceOfTruth<K, T> {
    shared: Arc<Shared<T>>,
    predicate: Predicate<K, T>,
    staleness: StalenessPolicy<T>,
}

impl<K, T> InMemoryListSourceOfTruth<K, T> {
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
    #[must_use]
    pub fn with_staleness_policy(mut self, policy: StalenessPolicy<T>) -> Self {
        self.staleness = policy;
        self
    }

    /// Returns the number of stored entities across all keys.
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

impl<K, T: Send + 'static> InMemoryListSourceOfTruth<K, T> {
    /// Ends the listen streams when `resources` closes.
    pub fn release_on(&self, resources: &CloseableResourceManager) {
        let shared = Arc::clone(&self.shared);
        resources.add_close_listener(move || shared.close_listeners());
    }
}

impl<K: Key, T: Entity> SourceOfTruth<K, Vec<T>> for InMemoryListSourceOfTruth<K, T> {
    async fn exists(&self, key: &K) -> source_of_truth::Result<bool> {
        Ok(self.shared.with_items(|items| items.iter().any(|item| (self.predicate)(key, item))))
    }

    async fn get(&self, key: &K) -> source_of_truth::Result<Vec<T>> {
        Ok(self
            .shared
            .with_items(|items| items.iter().filter(|item| (self.predicate)(key, item)).cloned().collect()))
    }

    fn listen(&self, key: &K) -> BoxStream<'static, Vec<T>> {
        let predicate = Arc::clone(&self.predicate);
        let owned = key.clone();

        self.shared.listen(key.to_string(), move |items, first| {
            let found: Vec<T> = items.iter().filter(|item| predicate(&owned, item)).cloned().collect();
            (!first || !found.is_empty()).then_some(found)
        })
    }

    async fn store(&self, key: &K, value: Vec<T>, remove_stale: bool) -> source_of_truth::Result<Vec<T>> {
        let stored = value.clone();
        let append = StalenessPolicy::DoNotExpire;
        let policy = if remove_stale { &self.staleness } else { &append };

        let removed = self
            .shared
            .with_items(|items| policy.merge(items, value, |item| (self.predicate)(key, item)));

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

impl<K, T> Clone for InMemoryListSourceOfTruth<K, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            predicate: Arc::clone(&self.predicate),
            staleness: self.staleness.clone(),
        }
    }
}

impl<K, T> Debug for InMemoryListSourceOfTruth<K, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryListSourceOfTruth")
            .field("len", &self.len())
            .field("staleness", &self.staleness)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use futures::executor::block_on;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Article {
        id: u32,
        topic: &'static str,
        title: &'static str,
    }

    fn article(id: u32, topic: &'static str, title: &'static str) -> Article {
        Article { id, topic, title }
    }

    fn articles(policy: StalenessPolicy<Article>) -> InMemoryListSourceOfTruth<&'static str, Article> {
        InMemoryListSourceOfTruth::new(|topic: &&'static str, article: &Article| article.topic == *topic).with_staleness_policy(policy)
    }

    #[test]
    fn missing_collection_is_empty() {
        block_on(async {
            let sot = articles(StalenessPolicy::DoNotExpire);

            assert!(!sot.exists(&"rust").await.expect("exists"));
            assert_eq!(sot.get(&"rust").await.expect("get"), Vec::new());
        });
    }

    #[test]
    fn refresh_drops_entities_missing_from_fetch() {
        block_on(async {
            let sot = articles(StalenessPolicy::delete_all_not_in_fetch(|a: &Article| a.id));
            sot.store(&"rust", vec![article(1, "rust", "a"), article(2, "rust", "b")], true)
                .await
                .expect("store");
            sot.store(&"go", vec![article(3, "go", "c")], true).await.expect("store");

            sot.store(&"rust", vec![article(2, "rust", "b2"), article(4, "rust", "d")], true)
                .await
                .expect("store");

            assert_eq!(
                sot.get(&"rust").await.expect("get"),
                vec![article(2, "rust", "b2"), article(4, "rust", "d")]
            );
            assert_eq!(sot.get(&"go").await.expect("get").len(), 1);
        });
    }

    #[test]
    fn writes_without_stale_removal_append() {
        block_on(async {
            let sot = articles(StalenessPolicy::DeleteAll);
            sot.store(&"rust", vec![article(1, "rust", "a")], false).await.expect("store");
            sot.store(&"rust", vec![article(2, "rust", "b")], false).await.expect("store");

            assert_eq!(sot.len(), 2);

            sot.store(&"rust", vec![article(3, "rust", "c")], true).await.expect("store");
            assert_eq!(sot.get(&"rust").await.expect("get"), vec![article(3, "rust", "c")]);
        });
    }

    #[test]
    fn listen_emits_emptied_collection() {
        block_on(async {
            let sot = articles(StalenessPolicy::DoNotExpire);
            let mut updates = sot.listen(&"rust");

            sot.store(&"rust", vec![article(1, "rust", "a")], false).await.expect("store");
            assert_eq!(updates.next().await.map(|list| list.len()), Some(1));

            assert!(sot.delete(&"rust").await.expect("delete"));
            assert_eq!(updates.next().await, Some(Vec::new()));
        });
    }
}
