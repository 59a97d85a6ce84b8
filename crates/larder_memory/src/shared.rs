// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use parking_lot::Mutex;
use tokio::sync::watch;

/// Entities shared by the clones of an in-memory source of truth, with per-key change
/// notification.
#[derive(Debug)]
pub(crate) struct Shared<T> {
    items: Mutex<Vec<T>>,
    watchers: Mutex<HashMap<String, watch::Sender<u64>>>,
}

impl<T> Shared<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `f` with exclusive access to the stored entities.
    pub(crate) fn with_items<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> R {
        f(&mut self.items.lock())
    }

    /// Wakes the listeners of `key`.
    pub(crate) fn notify(&self, key: &str) {
        if let Some(watcher) = self.watchers.lock().get(key) {
            watcher.send_modify(|version| *version = version.wrapping_add(1));
        }
    }

    /// Ends every listen stream.
    pub(crate) fn close_listeners(&self) {
        let closed = std::mem::take(&mut *self.watchers.lock());

        tracing::event!(
            name: "larder.memory.listeners_closed",
            tracing::Level::DEBUG,
            memory.keys = closed.len(),
        );
    }

    fn subscribe(&self, key: String) -> watch::Receiver<u64> {
        self.watchers.lock().entry(key).or_insert_with(|| watch::Sender::new(0)).subscribe()
    }
}

impl<T: Send + Sync + 'static> Shared<T> {
    /// Streams `read` for `key`: once right away, then after every change to `key`.
    ///
    /// `read` is told whether it runs for the first emission. Reads returning `None` are
    /// skipped. The stream ends when the listeners are closed.
    pub(crate) fn listen<R, F>(self: &Arc<Self>, key: String, read: F) -> BoxStream<'static, R>
    where
        R: Send + 'static,
        F: Fn(&[T], bool) -> Option<R> + Send + Sync + 'static,
    {
        let receiver = self.subscribe(key);
        let shared = Arc::clone(self);
        let read = Arc::new(read);

        stream::unfold((receiver, true), move |(mut receiver, first)| {
            let shared = Arc::clone(&shared);
            let read = Arc::clone(&read);

            async move {
                if first {
                    // The first read observes every change made since subscribing.
                    drop(receiver.borrow_and_update());
                    if let Some(value) = shared.with_items(|items| read(items.as_slice(), true)) {
                        return Some((value, (receiver, false)));
                    }
                }

                loop {
                    receiver.changed().await.ok()?;
                    if let Some(value) = shared.with_items(|items| read(items.as_slice(), false)) {
                        return Some((value, (receiver, false)));
                    }
                }
            }
        })
        .boxed()
    }
}
