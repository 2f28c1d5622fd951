//! Typed publish/subscribe hubs.
//!
//! Every observable stream in this crate (`leader`, `connect`, `connection`,
//! `ready`, `error`, `message`) is its own [`EventHub`]: an independent
//! publish point with multi-subscriber fan-out and per-subscription
//! cancellation. There is no buffering for late subscribers: an event
//! published before `subscribe()` is never replayed.
//!
//! Publishing enqueues the event into every live subscriber's queue before
//! returning, so per-subscriber ordering always matches publish order.
//! Subscribers consume at their own pace through [`EventSubscription::next`].

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tokio::sync::mpsc;

struct HubSubscriber<T> {
    id: u64,
    tx: mpsc::UnboundedSender<T>,
}

struct HubInner<T> {
    next_id: u64,
    subscribers: Vec<HubSubscriber<T>>,
}

/// A single named event stream with fan-out to any number of subscribers.
pub struct EventHub<T> {
    inner: Rc<RefCell<HubInner<T>>>,
}

impl<T> Clone for EventHub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Default for EventHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventHub<T> {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(HubInner {
                next_id: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Register a new subscriber.
    ///
    /// Only events published after this call are delivered. Dropping the
    /// returned subscription (or calling [`EventSubscription::cancel`])
    /// unsubscribes.
    pub fn subscribe(&self) -> EventSubscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(HubSubscriber { id, tx });
        EventSubscription {
            id,
            rx,
            hub: Rc::downgrade(&self.inner),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }
}

impl<T: Clone> EventHub<T> {
    /// Publish an event to every live subscriber, in subscription order.
    ///
    /// Returns the number of subscribers the event was enqueued for.
    pub fn publish(&self, event: T) -> usize {
        let mut inner = self.inner.borrow_mut();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        let mut delivered = 0;
        for subscriber in &inner.subscribers {
            if subscriber.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

/// One subscriber's view of an [`EventHub`].
///
/// The subscription is also the cancel handle: dropping it removes the
/// subscriber from the hub.
pub struct EventSubscription<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
    hub: Weak<RefCell<HubInner<T>>>,
}

impl<T> EventSubscription<T> {
    /// Wait for the next event.
    ///
    /// Returns `None` once the hub has been dropped and all pending events
    /// are drained.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Cancel this subscription explicitly.
    ///
    /// Equivalent to dropping it; provided for call sites where the intent
    /// should be visible.
    pub fn cancel(self) {}
}

impl<T> Drop for EventSubscription<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            inner.borrow_mut().subscribers.retain(|s| s.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_to_all_subscribers() {
        let hub: EventHub<u32> = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        assert_eq!(hub.publish(7), 2);

        assert_eq!(a.next().await, Some(7));
        assert_eq!(b.next().await, Some(7));
    }

    #[tokio::test]
    async fn no_replay_for_late_subscribers() {
        let hub: EventHub<u32> = EventHub::new();
        hub.publish(1);

        let mut late = hub.subscribe();
        assert_eq!(late.try_next(), None);

        hub.publish(2);
        assert_eq!(late.next().await, Some(2));
    }

    #[tokio::test]
    async fn delivery_preserves_publish_order() {
        let hub: EventHub<u32> = EventHub::new();
        let mut sub = hub.subscribe();
        for n in 0..10 {
            hub.publish(n);
        }
        for n in 0..10 {
            assert_eq!(sub.next().await, Some(n));
        }
    }

    #[tokio::test]
    async fn cancel_removes_subscriber() {
        let hub: EventHub<u32> = EventHub::new();
        let sub = hub.subscribe();
        let mut kept = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        sub.cancel();
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.publish(3), 1);
        assert_eq!(kept.next().await, Some(3));
    }

    #[tokio::test]
    async fn drop_removes_subscriber() {
        let hub: EventHub<u32> = EventHub::new();
        {
            let _sub = hub.subscribe();
            assert_eq!(hub.subscriber_count(), 1);
        }
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.publish(1), 0);
    }

    #[tokio::test]
    async fn independent_hubs_do_not_cross_deliver() {
        let numbers: EventHub<u32> = EventHub::new();
        let words: EventHub<&'static str> = EventHub::new();
        let mut n = numbers.subscribe();
        let mut w = words.subscribe();

        numbers.publish(5);
        words.publish("five");

        assert_eq!(n.next().await, Some(5));
        assert_eq!(w.next().await, Some("five"));
        assert_eq!(n.try_next(), None);
        assert_eq!(w.try_next(), None);
    }
}
