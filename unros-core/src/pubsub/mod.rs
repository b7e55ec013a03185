//! Publishers and Subscribers are an essential component of many frameworks in many different disciplines.
//!
//! We offer an `API` for pubsub that is more similar to `Rust`'s channels. Subscribers are
//! bounded queues that are polled by their owners, unlike `ROS` subscriber callbacks, so a
//! node that publishes never runs code belonging to another node.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, PoisonError, Weak,
};

use crossbeam::queue::{ArrayQueue, SegQueue};
use tokio::sync::Notify;

struct SubscriberInner<T> {
    queue: ArrayQueue<T>,
    notify: Notify,
    pub_count: AtomicUsize,
}

/// A handle that lets a `Publisher` push into a `Subscriber`.
///
/// Subscriptions hold a weak reference, so dropping the `Subscriber`
/// automatically unsubscribes it.
pub struct Subscription<T> {
    sub: Weak<SubscriberInner<T>>,
}

struct PublisherShared<T> {
    subs: SegQueue<Subscription<T>>,
    latched: Mutex<Option<T>>,
}

/// Publishers provide a simple way to send a message to receivers, much
/// like Rust's channels. These are analagous to single-producer-multi-consumer
/// channels.
///
/// Publishers make numerous clones of the values they send, so you should
/// use a type `T` that is cheap to clone. A good default is `Arc`.
///
/// A latched publisher remembers the last value it sent and hands it to
/// every subscription accepted afterwards, which is what low-rate topics
/// such as static captures want.
pub struct Publisher<T> {
    latch: bool,
    shared: Arc<PublisherShared<T>>,
}

impl<T> Publisher<T> {
    pub fn new() -> Self {
        Self {
            latch: false,
            shared: Arc::new(PublisherShared {
                subs: SegQueue::new(),
                latched: Mutex::new(None),
            }),
        }
    }

    pub fn new_latched() -> Self {
        let mut publisher = Self::new();
        publisher.latch = true;
        publisher
    }

    /// The number of subscriptions that have not been dropped yet.
    pub fn get_subscriber_count(&self) -> usize {
        let mut count = 0;
        for _ in 0..self.shared.subs.len() {
            let Some(sub) = self.shared.subs.pop() else {
                break;
            };
            if sub.sub.strong_count() > 0 {
                count += 1;
                self.shared.subs.push(sub);
            }
        }
        count
    }

    pub fn get_ref(&self) -> PublisherRef<T> {
        PublisherRef {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl<T> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Publisher<T> {
    /// Sets a value into this publisher, allowing it to be received by Subscribers.
    ///
    /// Only the node that owns this publisher should call this method.
    pub fn set(&self, value: T) {
        if self.latch {
            *self
                .shared
                .latched
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(value.clone());
        }
        for _ in 0..self.shared.subs.len() {
            let Some(sub) = self.shared.subs.pop() else {
                break;
            };
            if sub.push(value.clone()) {
                self.shared.subs.push(sub);
            }
        }
    }

    /// Accepts a given subscription, allowing the corresponding `Subscriber` to
    /// receive new messages.
    pub fn accept_subscription(&self, sub: Subscription<T>) {
        self.shared.accept(sub);
    }
}

impl<T: Clone> PublisherShared<T> {
    fn accept(&self, sub: Subscription<T>) {
        let Some(inner) = sub.sub.upgrade() else {
            return;
        };
        inner.pub_count.fetch_add(1, Ordering::AcqRel);
        if let Some(value) = self
            .latched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            sub.push(value);
        }
        self.subs.push(sub);
    }
}

impl<T> Drop for Publisher<T> {
    fn drop(&mut self) {
        while let Some(sub) = self.shared.subs.pop() {
            if let Some(inner) = sub.sub.upgrade() {
                inner.pub_count.fetch_sub(1, Ordering::AcqRel);
                inner.notify.notify_waiters();
            }
        }
    }
}

/// A weak reference to a `Publisher`, used to subscribe to it
/// without keeping it alive.
pub struct PublisherRef<T> {
    shared: Weak<PublisherShared<T>>,
}

impl<T> Clone for PublisherRef<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> PublisherRef<T> {
    /// Whether the owning `Publisher` has been dropped.
    pub fn is_closed(&self) -> bool {
        self.shared.strong_count() == 0
    }
}

impl<T: Clone> PublisherRef<T> {
    /// Accepts a given subscription, allowing the corresponding `Subscriber` to
    /// receive new messages.
    ///
    /// Returns true iff the owning `Publisher` has not been dropped.
    pub fn accept_subscription_or_closed(&self, sub: Subscription<T>) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        shared.accept(sub);
        true
    }
}

impl<T> Subscription<T> {
    /// Pushes a value into the subscriber, dropping the oldest
    /// message if it is full.
    ///
    /// Returns false iff the subscriber has been dropped.
    fn push(&self, value: T) -> bool {
        let Some(inner) = self.sub.upgrade() else {
            return false;
        };
        let _ = inner.queue.force_push(value);
        inner.notify.notify_waiters();
        true
    }
}

/// An essential companion to the `Publisher`.
///
/// Subscribers are bounded queues that can receive messages `T`
/// from multiple Publishers concurrently. When the queue is full,
/// the oldest message is dropped.
pub struct Subscriber<T> {
    inner: Arc<SubscriberInner<T>>,
}

impl<T> Subscriber<T> {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            inner: Arc::new(SubscriberInner {
                queue: ArrayQueue::new(size.max(1)),
                notify: Notify::default(),
                pub_count: AtomicUsize::default(),
            }),
        }
    }

    /// Creates a `Subscription` that needs to be passed to a `Publisher`.
    #[must_use]
    pub fn create_subscription(&self) -> Subscription<T> {
        Subscription {
            sub: Arc::downgrade(&self.inner),
        }
    }

    /// Try to receive a message if one is available.
    pub fn try_recv(&mut self) -> Option<T> {
        self.inner.queue.pop()
    }

    /// Receive some message (waiting if none are available), or `None` if all `Publishers` have been dropped.
    pub async fn recv_or_closed(&mut self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(value) = self.inner.queue.pop() {
                return Some(value);
            }

            if self.inner.pub_count.load(Ordering::Acquire) == 0 {
                return None;
            }

            notified.await;
        }
    }

    /// Pops every pending message and returns the newest one.
    pub fn try_recv_latest(&mut self) -> Option<T> {
        let mut latest = None;
        while let Some(value) = self.inner.queue.pop() {
            latest = Some(value);
        }
        latest
    }
}

#[cfg(test)]
mod tests {
    use super::{Publisher, Subscriber};

    #[test]
    fn set_reaches_every_subscriber() {
        let publisher = Publisher::new();
        let mut sub_a = Subscriber::new(4);
        let mut sub_b = Subscriber::new(4);
        publisher.accept_subscription(sub_a.create_subscription());
        publisher.get_ref().accept_subscription_or_closed(sub_b.create_subscription());

        publisher.set(3usize);
        assert_eq!(sub_a.try_recv(), Some(3));
        assert_eq!(sub_b.try_recv(), Some(3));
        assert_eq!(sub_a.try_recv(), None);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let publisher = Publisher::new();
        let mut sub = Subscriber::new(2);
        publisher.accept_subscription(sub.create_subscription());
        for i in 0..5 {
            publisher.set(i);
        }
        assert_eq!(sub.try_recv(), Some(3));
        assert_eq!(sub.try_recv(), Some(4));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn latched_value_reaches_late_subscribers() {
        let publisher = Publisher::new_latched();
        publisher.set("first");
        publisher.set("second");

        let mut late = Subscriber::new(1);
        publisher.accept_subscription(late.create_subscription());
        assert_eq!(late.try_recv(), Some("second"));
    }

    #[test]
    fn dropped_subscribers_are_forgotten() {
        let publisher = Publisher::new();
        let sub = Subscriber::new(1);
        let kept = Subscriber::new(1);
        publisher.accept_subscription(sub.create_subscription());
        publisher.accept_subscription(kept.create_subscription());
        assert_eq!(publisher.get_subscriber_count(), 2);
        drop(sub);
        publisher.set(1u8);
        assert_eq!(publisher.get_subscriber_count(), 1);
    }

    #[test]
    fn ref_is_closed_after_publisher_drop() {
        let publisher = Publisher::<u8>::new();
        let pub_ref = publisher.get_ref();
        drop(publisher);
        let sub = Subscriber::new(1);
        assert!(!pub_ref.accept_subscription_or_closed(sub.create_subscription()));
    }

    #[tokio::test]
    async fn recv_or_closed_ends_with_publisher() {
        let publisher = Publisher::new();
        let mut sub = Subscriber::new(4);
        publisher.accept_subscription(sub.create_subscription());
        publisher.set(7u32);
        drop(publisher);
        assert_eq!(sub.recv_or_closed().await, Some(7));
        assert_eq!(sub.recv_or_closed().await, None);
    }

    #[test]
    fn latest_skips_stale_messages() {
        let publisher = Publisher::new();
        let mut sub = Subscriber::new(8);
        publisher.accept_subscription(sub.create_subscription());
        publisher.set(1);
        publisher.set(2);
        publisher.set(3);
        assert_eq!(sub.try_recv_latest(), Some(3));
        assert_eq!(sub.try_recv_latest(), None);
    }
}
