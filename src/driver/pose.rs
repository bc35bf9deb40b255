//! Pose subscription plumbing
//!
//! Robots report their chassis pose from a transport thread the core never
//! sees. [`PoseFeed`] is the hub a driver publishes into; consumers register
//! a handler and get back a [`Subscription`] token that unsubscribes when
//! cancelled or dropped. [`PoseCell`] holds the last-known pose for
//! components that only need the latest value.

use crate::types::Pose;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Callback invoked with every published pose
pub type PoseHandler = Box<dyn Fn(Pose) + Send + Sync + 'static>;

type SharedHandler = Arc<dyn Fn(Pose) + Send + Sync + 'static>;

#[derive(Default)]
struct FeedInner {
    next_id: u64,
    handlers: Vec<(u64, SharedHandler)>,
    latest: Option<Pose>,
}

fn lock_feed(inner: &Mutex<FeedInner>) -> MutexGuard<'_, FeedInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fan-out hub for pose updates
#[derive(Clone, Default)]
pub struct PoseFeed {
    inner: Arc<Mutex<FeedInner>>,
}

impl std::fmt::Debug for PoseFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock_feed(&self.inner);
        f.debug_struct("PoseFeed")
            .field("subscribers", &inner.handlers.len())
            .field("latest", &inner.latest)
            .finish()
    }
}

impl PoseFeed {
    /// Create an empty feed
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; it stays registered while the token is alive
    ///
    /// When a pose has already been published the handler is called with it
    /// before this returns, outside the feed lock.
    pub fn subscribe(&self, handler: PoseHandler) -> Subscription {
        let handler: SharedHandler = Arc::from(handler);
        let (id, latest) = {
            let mut inner = lock_feed(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;
            inner.handlers.push((id, Arc::clone(&handler)));
            (id, inner.latest)
        };
        if let Some(pose) = latest {
            handler(pose);
        }
        Subscription {
            feed: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Deliver a pose to every subscriber
    ///
    /// Handlers run on the caller's thread, outside the feed lock, so they
    /// may subscribe or cancel without deadlocking.
    pub fn publish(&self, pose: Pose) {
        let handlers: Vec<SharedHandler> = {
            let mut inner = lock_feed(&self.inner);
            inner.latest = Some(pose);
            inner.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
        };
        for handler in handlers {
            handler(pose);
        }
    }

    /// Most recently published pose
    pub fn latest(&self) -> Option<Pose> {
        lock_feed(&self.inner).latest
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        lock_feed(&self.inner).handlers.len()
    }
}

/// Cancellation token for a pose subscription
#[derive(Debug)]
pub struct Subscription {
    feed: Weak<Mutex<FeedInner>>,
    id: u64,
}

impl Subscription {
    /// Token that is not attached to any feed
    pub fn detached() -> Self {
        Self {
            feed: Weak::new(),
            id: 0,
        }
    }

    /// Whether the handler is still registered
    pub fn is_active(&self) -> bool {
        match self.feed.upgrade() {
            Some(inner) => lock_feed(&inner).handlers.iter().any(|(id, _)| *id == self.id),
            None => false,
        }
    }

    /// Unregister the handler; idempotent
    pub fn cancel(&mut self) {
        if let Some(inner) = self.feed.upgrade() {
            lock_feed(&inner).handlers.retain(|(id, _)| *id != self.id);
        }
        self.feed = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Shared last-known pose
#[derive(Debug, Clone, Default)]
pub struct PoseCell {
    inner: Arc<Mutex<Pose>>,
}

impl PoseCell {
    /// Create a cell holding `pose`
    pub fn new(pose: Pose) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pose)),
        }
    }

    /// Current value
    pub fn get(&self) -> Pose {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the value
    pub fn set(&self, pose: Pose) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = pose;
    }

    /// Handler that keeps this cell updated from a [`PoseFeed`]
    pub fn handler(&self) -> PoseHandler {
        let cell = self.clone();
        Box::new(move |pose| cell.set(pose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_publish_reaches_subscribers() {
        let feed = PoseFeed::new();
        let cell = PoseCell::default();
        let _sub = feed.subscribe(cell.handler());

        feed.publish(Pose::new(1.0, 2.0, 90.0));
        assert_eq!(cell.get(), Pose::new(1.0, 2.0, 90.0));
        assert_eq!(feed.latest(), Some(Pose::new(1.0, 2.0, 90.0)));
    }

    #[test]
    fn test_late_subscriber_gets_latest() {
        let feed = PoseFeed::new();
        let early = PoseCell::new(Pose::new(9.0, 9.0, 9.0));
        let _early_sub = feed.subscribe(early.handler());
        // Nothing published yet, so nothing is delivered
        assert_eq!(early.get(), Pose::new(9.0, 9.0, 9.0));

        feed.publish(Pose::new(3.0, -1.0, 45.0));
        let late = PoseCell::default();
        let _late_sub = feed.subscribe(late.handler());
        assert_eq!(late.get(), Pose::new(3.0, -1.0, 45.0));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let feed = PoseFeed::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let sub = feed.subscribe(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        feed.publish(Pose::default());
        assert!(sub.is_active());
        drop(sub);
        feed.publish(Pose::default());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn test_cancel_only_removes_own_handler() {
        let feed = PoseFeed::new();
        let a = PoseCell::default();
        let b = PoseCell::default();
        let mut sub_a = feed.subscribe(a.handler());
        let _sub_b = feed.subscribe(b.handler());

        sub_a.cancel();
        sub_a.cancel();
        feed.publish(Pose::new(3.0, 0.0, 0.0));

        assert!(!sub_a.is_active());
        assert_eq!(a.get(), Pose::default());
        assert_eq!(b.get().x, 3.0);
    }

    #[test]
    fn test_token_outlives_feed() {
        let feed = PoseFeed::new();
        let mut sub = feed.subscribe(Box::new(|_| {}));
        drop(feed);
        assert!(!sub.is_active());
        sub.cancel();
        assert!(!Subscription::detached().is_active());
    }
}
