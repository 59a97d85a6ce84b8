// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test helpers shared by the unit tests of this crate.

use std::collections::HashMap;
use std::fmt::Display;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;

use crate::source_of_truth::{self, SourceOfTruth};

/// Captures log output written while its subscriber is the default.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).to_string()
    }

    pub(crate) fn assert_contains(&self, expected: &str) {
        let output = self.output();
        assert!(
            output.contains(expected),
            "log output does not contain '{expected}', got:\n{output}"
        );
    }

    pub(crate) fn subscriber(&self) -> impl tracing::Subscriber {
        tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_writer(self.clone()).with_ansi(false))
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

#[derive(Debug)]
pub(crate) struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A source of truth keeping one entity per key in memory, with an injectable failure.
#[derive(Debug)]
pub(crate) struct MockSourceOfTruth<T> {
    entries: Mutex<HashMap<String, watch::Sender<Option<T>>>>,
    fail: AtomicBool,
}

impl<T> Default for MockSourceOfTruth<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> MockSourceOfTruth<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(key: impl Display, value: T) -> Self {
        let sot = Self::new();
        sot.put(key, value);
        sot
    }

    pub(crate) fn put(&self, key: impl Display, value: T) {
        self.channel(&key.to_string()).send_replace(Some(value));
    }

    pub(crate) fn value(&self, key: impl Display) -> Option<T> {
        self.entries.lock().get(&key.to_string()).and_then(|sender| sender.borrow().clone())
    }

    pub(crate) fn fail_operations(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    fn channel(&self, key: &str) -> watch::Sender<Option<T>> {
        self.entries
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| watch::Sender::new(None))
            .clone()
    }

    fn check(&self) -> source_of_truth::Result<()> {
        if self.fail.load(Ordering::Relaxed) {
            Err(source_of_truth::Error::caused_by("storage offline"))
        } else {
            Ok(())
        }
    }
}

impl<K, T> SourceOfTruth<K, T> for MockSourceOfTruth<T>
where
    K: Display + Sync,
    T: Clone + Send + Sync + 'static,
{
    async fn exists(&self, key: &K) -> source_of_truth::Result<bool> {
        self.check()?;
        Ok(self.value(key).is_some())
    }

    async fn get(&self, key: &K) -> source_of_truth::Result<T> {
        self.check()?;
        self.value(key).ok_or_else(|| source_of_truth::Error::not_found(key))
    }

    fn listen(&self, key: &K) -> BoxStream<'static, T> {
        let receiver = self.channel(&key.to_string()).subscribe();

        stream::unfold((receiver, true), |(mut receiver, mut first)| async move {
            loop {
                if !first {
                    receiver.changed().await.ok()?;
                }
                first = false;

                let current = receiver.borrow_and_update().clone();
                if let Some(value) = current {
                    return Some((value, (receiver, false)));
                }
            }
        })
        .boxed()
    }

    async fn store(&self, key: &K, value: T, _remove_stale: bool) -> source_of_truth::Result<T> {
        self.check()?;
        self.put(key, value.clone());
        Ok(value)
    }

    async fn delete(&self, key: &K) -> source_of_truth::Result<bool> {
        self.check()?;
        let removed = self.channel(&key.to_string()).send_replace(None);
        Ok(removed.is_some())
    }
}
