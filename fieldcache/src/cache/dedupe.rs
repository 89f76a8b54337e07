//! Coalescing of concurrent identical resolutions
//!
//! The first caller to miss on a key becomes the leader and resolves
//! upstream; callers arriving while that resolution is pending follow and
//! receive a clone of the leader's outcome. Each pending slot is a
//! `tokio::sync::watch` channel: the leader publishes once, followers wait
//! for the first published value.

use crate::cache::types::CacheKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Tracks at most one pending resolution per key
pub struct DedupeTracker<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    pending: DashMap<CacheKey, Slot<T>>,
    next_id: AtomicU64,
}

struct Slot<T> {
    id: u64,
    receiver: watch::Receiver<Option<T>>,
}

/// Role assigned by [`DedupeTracker::join`]
pub enum Pending<T> {
    /// This caller must resolve and settle
    Leader(PendingGuard<T>),
    /// Another caller is already resolving this key
    Follower(PendingWaiter<T>),
}

/// Held by the leader until the resolution settles
///
/// Dropping the guard removes the pending slot. If it was never settled the
/// channel closes and followers are told to resolve on their own.
pub struct PendingGuard<T> {
    shared: Arc<Shared<T>>,
    key: CacheKey,
    id: u64,
    sender: watch::Sender<Option<T>>,
}

/// Waits for the leader's outcome
pub struct PendingWaiter<T> {
    receiver: watch::Receiver<Option<T>>,
}

impl<T> DedupeTracker<T>
where
    T: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Become the leader for `key`, or follow the one already resolving it
    pub fn join(&self, key: &str) -> Pending<T> {
        match self.shared.pending.entry(key.to_string()) {
            Entry::Occupied(slot) => {
                debug!("Joining pending resolution for {}", key);
                Pending::Follower(PendingWaiter {
                    receiver: slot.get().receiver.clone(),
                })
            }
            Entry::Vacant(vacant) => {
                let (sender, receiver) = watch::channel(None);
                let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
                vacant.insert(Slot { id, receiver });

                Pending::Leader(PendingGuard {
                    shared: Arc::clone(&self.shared),
                    key: key.to_string(),
                    id,
                    sender,
                })
            }
        }
    }

    /// Number of keys with a resolution in flight
    pub fn in_flight(&self) -> usize {
        self.shared.pending.len()
    }
}

impl<T> Default for DedupeTracker<T>
where
    T: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for DedupeTracker<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> PendingGuard<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Publish the outcome to every follower and release the key
    pub fn settle(self, outcome: T) {
        self.sender.send_replace(Some(outcome));
        // Drop removes the slot after the value is visible
    }
}

impl<T> Drop for PendingGuard<T> {
    fn drop(&mut self) {
        let id = self.id;
        self.shared
            .pending
            .remove_if(&self.key, |_, slot| slot.id == id);
    }
}

impl<T> PendingWaiter<T>
where
    T: Clone,
{
    /// Wait for the leader; `None` means it gave up without an outcome
    pub async fn wait(mut self) -> Option<T> {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn leader(pending: Pending<u32>) -> PendingGuard<u32> {
        match pending {
            Pending::Leader(guard) => guard,
            Pending::Follower(_) => panic!("expected leader"),
        }
    }

    fn follower(pending: Pending<u32>) -> PendingWaiter<u32> {
        match pending {
            Pending::Follower(waiter) => waiter,
            Pending::Leader(_) => panic!("expected follower"),
        }
    }

    #[tokio::test]
    async fn test_first_join_leads() {
        let tracker = DedupeTracker::<u32>::new();

        let guard = leader(tracker.join("k"));
        assert_eq!(guard.key(), "k");
        assert_eq!(tracker.in_flight(), 1);

        let _waiter = follower(tracker.join("k"));
        // A different key gets its own leader
        let _other = leader(tracker.join("other"));
        assert_eq!(tracker.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_followers_receive_outcome() {
        let tracker = DedupeTracker::<u32>::new();
        let guard = leader(tracker.join("k"));

        let waiters: Vec<_> = (0..5)
            .map(|_| tokio::spawn(follower(tracker.join("k")).wait()))
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        guard.settle(42);

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Some(42));
        }
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_late_follower_sees_settled_value() {
        let tracker = DedupeTracker::<u32>::new();
        let guard = leader(tracker.join("k"));
        let waiter = follower(tracker.join("k"));

        guard.settle(7);
        assert_eq!(waiter.wait().await, Some(7));
    }

    #[tokio::test]
    async fn test_abandoned_leader_releases_followers() {
        let tracker = DedupeTracker::<u32>::new();
        let guard = leader(tracker.join("k"));
        let waiter = follower(tracker.join("k"));

        drop(guard);

        assert_eq!(waiter.wait().await, None);
        assert_eq!(tracker.in_flight(), 0);
        // The key is free for a new leader
        let _guard = leader(tracker.join("k"));
    }

    #[tokio::test]
    async fn test_stale_guard_does_not_remove_new_slot() {
        let tracker = DedupeTracker::<u32>::new();
        let first = leader(tracker.join("k"));

        // Simulate the slot being replaced while the first guard is alive
        tracker.shared.pending.remove("k");
        let _second = leader(tracker.join("k"));

        drop(first);
        assert_eq!(tracker.in_flight(), 1);
    }
}
