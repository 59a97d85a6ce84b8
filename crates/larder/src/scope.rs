// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

type CloseListener = Box<dyn FnOnce() + Send>;

/// Releases the resources registered with it when its scope ends.
///
/// Every listener passed to [`add_close_listener`][Self::add_close_listener] runs exactly
/// once: on the first call to [`close`][Self::close], or immediately when it is added after
/// the manager was closed.
#[derive(Default)]
pub struct CloseableResourceManager {
    listeners: Mutex<Vec<CloseListener>>,
    closed: AtomicBool,
}

impl CloseableResourceManager {
    /// Creates an open manager without listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` to run when the manager closes.
    pub fn add_close_listener(&self, listener: impl FnOnce() + Send + 'static) {
        let mut listeners = self.listeners.lock();

        if self.closed.load(Ordering::Acquire) {
            drop(listeners);
            listener();
        } else {
            listeners.push(Box::new(listener));
        }
    }

    /// Runs every registered listener. Later calls do nothing.
    pub fn close(&self) {
        let listeners = {
            let mut listeners = self.listeners.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *listeners)
        };

        tracing::event!(
            name: "larder.scope.closed",
            tracing::Level::DEBUG,
            scope.listeners = listeners.len(),
        );

        for listener in listeners {
            listener();
        }
    }

    /// Returns whether [`close`][Self::close] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for CloseableResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseableResourceManager")
            .field("listeners", &self.listeners.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A store bound to a scope.
///
/// Dereferences to the wrapped store. The resources registered with its
/// [`CloseableResourceManager`] are released when the scoped store is dropped, when
/// [`close`][Self::close] is called, or when the future given to
/// [`auto_close`][Self::auto_close] completes, whichever happens first.
///
/// # Examples
///
/// ```
/// use larder::ScopedStore;
///
/// # async fn example<S: Send + Sync>(store: S) {
/// let scoped = ScopedStore::new(store);
/// scoped.resources().add_close_listener(|| println!("released"));
///
/// let (cancel, cancelled) = tokio::sync::oneshot::channel::<()>();
/// let _task = scoped.auto_close(async move {
///     let _ = cancelled.await;
/// });
///
/// drop(cancel);
/// # }
/// ```
#[derive(Debug)]
pub struct ScopedStore<S> {
    store: S,
    resources: Arc<CloseableResourceManager>,
}

impl<S> ScopedStore<S> {
    /// Binds `store` to a new scope.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self::with_resources(store, Arc::new(CloseableResourceManager::new()))
    }

    /// Binds `store` to the scope of an existing manager, typically one shared with the
    /// source of truth.
    #[must_use]
    pub fn with_resources(store: S, resources: Arc<CloseableResourceManager>) -> Self {
        Self { store, resources }
    }

    /// Returns the manager releasing this scope's resources.
    #[must_use]
    pub fn resources(&self) -> &Arc<CloseableResourceManager> {
        &self.resources
    }

    /// Releases the scope's resources.
    pub fn close(&self) {
        self.resources.close();
    }

    /// Releases the scope's resources once `cancelled` completes.
    ///
    /// The returned task can be aborted to detach the scope from `cancelled`.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn auto_close(&self, cancelled: impl Future<Output = ()> + Send + 'static) -> JoinHandle<()> {
        let resources = Arc::clone(&self.resources);

        tokio::spawn(async move {
            cancelled.await;
            resources.close();
        })
    }
}

impl<S> Deref for ScopedStore<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.store
    }
}

impl<S> Drop for ScopedStore<S> {
    fn drop(&mut self) {
        self.resources.close();
    }
}
