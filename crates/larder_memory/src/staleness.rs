// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashSet;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;

type NaturalKey<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// Decides which stored entities a fresh fetch makes stale.
///
/// Applied by the in-memory sources of truth when a store asks to remove stale entities,
/// which a store does for every fetched result it persists.
pub enum StalenessPolicy<T> {
    /// Keeps every stored entity. Fetched entities are added next to them.
    DoNotExpire,
    /// Removes every entity stored for the key before the fetched ones are stored.
    DeleteAll,
    /// Removes the entities stored for the key whose natural key is missing from the fetch.
    ///
    /// Entities sharing a natural key with a fetched one are replaced in place.
    DeleteAllNotInFetch(NaturalKey<T>),
}

impl<T> StalenessPolicy<T> {
    /// Creates a [`StalenessPolicy::DeleteAllNotInFetch`] identifying entities by `natural_key`,
    /// typically their primary id.
    ///
    /// # Examples
    ///
    /// ```
    /// use larder_memory::StalenessPolicy;
    ///
    /// struct Article {
    ///     id: u64,
    /// }
    ///
    /// let policy = StalenessPolicy::delete_all_not_in_fetch(|article: &Article| article.id);
    /// # let _ = policy;
    /// ```
    #[must_use]
    pub fn delete_all_not_in_fetch<P: Display>(natural_key: impl Fn(&T) -> P + Send + Sync + 'static) -> Self {
        Self::DeleteAllNotInFetch(Arc::new(move |entity| natural_key(entity).to_string()))
    }

    /// Returns whether the policy ever removes stored entities.
    pub(crate) fn expires(&self) -> bool {
        !matches!(self, Self::DoNotExpire)
    }

    /// Merges `fetched` into `items`, touching only the entities for which `matches` holds.
    ///
    /// Returns how many stored entities were removed as stale.
    pub(crate) fn merge(&self, items: &mut Vec<T>, fetched: Vec<T>, matches: impl Fn(&T) -> bool) -> usize {
        let before = items.len();

        match self {
            Self::DoNotExpire => {
                items.extend(fetched);
                0
            }
            Self::DeleteAll => {
                items.retain(|item| !matches(item));
                let removed = before - items.len();
                items.extend(fetched);
                removed
            }
            Self::DeleteAllNotInFetch(natural_key) => {
                let mut fetched: Vec<(String, T)> = fetched.into_iter().map(|entity| (natural_key(&entity), entity)).collect();
                let keys: HashSet<String> = fetched.iter().map(|(key, _)| key.clone()).collect();

                items.retain(|item| !matches(item) || keys.contains(&natural_key(item)));
                let removed = before - items.len();

                for item in items.iter_mut().filter(|item| matches(item)) {
                    let key = natural_key(item);
                    if let Some(position) = fetched.iter().position(|(fetched_key, _)| *fetched_key == key) {
                        *item = fetched.remove(position).1;
                    }
                }

                items.extend(fetched.into_iter().map(|(_, entity)| entity));
                removed
            }
        }
    }
}

impl<T> Default for StalenessPolicy<T> {
    fn default() -> Self {
        Self::DoNotExpire
    }
}

impl<T> Clone for StalenessPolicy<T> {
    fn clone(&self) -> Self {
        match self {
            Self::DoNotExpire => Self::DoNotExpire,
            Self::DeleteAll => Self::DeleteAll,
            Self::DeleteAllNotInFetch(natural_key) => Self::DeleteAllNotInFetch(Arc::clone(natural_key)),
        }
    }
}

impl<T> Debug for StalenessPolicy<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoNotExpire => f.write_str("DoNotExpire"),
            Self::DeleteAll => f.write_str("DeleteAll"),
            Self::DeleteAllNotInFetch(_) => f.write_str("DeleteAllNotInFetch"),
        }
    }
}
