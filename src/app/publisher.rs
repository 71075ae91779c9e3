use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::app::models::BatchSnapshot;

struct Inner {
    latest: BatchSnapshot,
    subscribers: Vec<Sender<BatchSnapshot>>,
}

/// Latest run snapshot plus push delivery to subscribers. Only the batch
/// controller publishes; everyone else reads.
pub struct StatusPublisher {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                latest: BatchSnapshot::default(),
                subscribers: Vec::new(),
            }),
            changed: Condvar::new(),
        }
    }

    pub fn latest(&self) -> BatchSnapshot {
        self.lock().latest.clone()
    }

    /// The current snapshot is delivered first, then every change.
    pub fn subscribe(&self) -> StatusSubscription {
        let (sender, receiver) = mpsc::channel();
        let mut inner = self.lock();
        let _ = sender.send(inner.latest.clone());
        inner.subscribers.push(sender);
        StatusSubscription { receiver }
    }

    /// Blocks until the latest snapshot satisfies `predicate` or `timeout` passes.
    pub fn wait_until<F>(&self, timeout: Duration, predicate: F) -> Option<BatchSnapshot>
    where
        F: Fn(&BatchSnapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if predicate(&inner.latest) {
                return Some(inner.latest.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .changed
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            inner = guard;
        }
    }

    /// Stores `snapshot` and pushes it if anything but the version changed.
    /// Returns the stored version.
    pub(crate) fn publish(&self, mut snapshot: BatchSnapshot) -> u64 {
        let mut inner = self.lock();
        snapshot.version = inner.latest.version;
        if snapshot == inner.latest {
            return inner.latest.version;
        }
        snapshot.version += 1;
        inner.latest = snapshot;
        let latest = inner.latest.clone();
        inner
            .subscribers
            .retain(|subscriber| subscriber.send(latest.clone()).is_ok());
        self.changed.notify_all();
        latest.version
    }

    pub(crate) fn update<F>(&self, change: F) -> BatchSnapshot
    where
        F: FnOnce(&mut BatchSnapshot),
    {
        let mut snapshot = self.latest();
        change(&mut snapshot);
        snapshot.version = self.publish(snapshot.clone());
        snapshot
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct StatusSubscription {
    receiver: Receiver<BatchSnapshot>,
}

impl StatusSubscription {
    /// `None` on timeout or once the publisher is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<BatchSnapshot> {
        match self.receiver.recv_timeout(timeout) {
            Ok(snapshot) => Some(snapshot),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drains pending updates and keeps only the newest.
    pub fn latest_pending(&self) -> Option<BatchSnapshot> {
        self.receiver.try_iter().last()
    }

    pub fn iter(&self) -> impl Iterator<Item = BatchSnapshot> + '_ {
        self.receiver.iter()
    }
}
