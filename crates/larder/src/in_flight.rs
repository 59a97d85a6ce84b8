// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Sharing the result of an in-flight fetch with concurrent callers for the same key.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;

use crate::FetcherResult;

/// The last event published by a [`CallSlot`].
#[derive(Debug, Clone)]
enum Outcome<I> {
    Idle,
    Done(FetcherResult<I>),
    Abandoned,
}

/// Tracks the fetches in flight for one key and broadcasts their results.
///
/// A caller either leads a fetch, holding a [`CallGuard`] until it completes, or follows one by
/// awaiting the next published result. Followers always subscribe before checking whether a
/// fetch is in flight, so a result published after the check is never missed.
#[derive(Debug)]
pub(crate) struct CallSlot<I> {
    in_flight: AtomicUsize,
    outcome: watch::Sender<Outcome<I>>,
}

impl<I: Clone> CallSlot<I> {
    pub(crate) fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            outcome: watch::Sender::new(Outcome::Idle),
        }
    }

    /// Starts following the slot. Must be called before [`Self::try_lead`] or [`Self::is_in_flight`].
    pub(crate) fn follow(&self) -> Follower<I> {
        Follower {
            receiver: self.outcome.subscribe(),
        }
    }

    /// Becomes the leader if no fetch is in flight.
    pub(crate) fn try_lead(&self) -> Option<CallGuard<'_, I>> {
        self.in_flight
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CallGuard { slot: self, done: false })
    }

    /// Starts a fetch regardless of the ones already in flight.
    pub(crate) fn begin(&self) -> CallGuard<'_, I> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        CallGuard { slot: self, done: false }
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    fn finish(&self, outcome: Outcome<I>) {
        // Decrement first so that woken followers never observe a stale in-flight fetch.
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.outcome.send_replace(outcome);
    }
}

/// Waits for the next result published on a [`CallSlot`].
#[derive(Debug)]
pub(crate) struct Follower<I> {
    receiver: watch::Receiver<Outcome<I>>,
}

impl<I: Clone> Follower<I> {
    /// Returns the next published result, or `None` if the leader was dropped before completing.
    pub(crate) async fn wait(mut self) -> Option<FetcherResult<I>> {
        self.receiver.changed().await.ok()?;

        match &*self.receiver.borrow_and_update() {
            Outcome::Done(result) => Some(result.clone()),
            Outcome::Idle | Outcome::Abandoned => None,
        }
    }
}

/// Marks a fetch as in flight until completed or dropped.
#[derive(Debug)]
pub(crate) struct CallGuard<'a, I: Clone> {
    slot: &'a CallSlot<I>,
    done: bool,
}

impl<I: Clone> CallGuard<'_, I> {
    /// Publishes `result` to every follower.
    pub(crate) fn complete(mut self, result: FetcherResult<I>) {
        self.done = true;
        self.slot.finish(Outcome::Done(result));
    }
}

impl<I: Clone> Drop for CallGuard<'_, I> {
    fn drop(&mut self) {
        if !self.done {
            self.slot.finish(Outcome::Abandoned);
        }
    }
}
