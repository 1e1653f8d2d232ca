//! Typed event delivery shared by every component.
//!
//! An [`EventHub`] delivers each event twice:
//! 1. synchronously to registered [`Observer`]s, on the sending thread,
//!    in registration order
//! 2. to every channel handed out by [`EventHub::subscribe`]
//!
//! Observers are held weakly; dropping the observer unregisters it.
//! Channel subscribers are pruned when their receiver is dropped.

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// Synchronous receiver of events of type `E`.
///
/// Called on the sending thread with no hub lock held. Implementations must
/// not block for long: they run inside the operation that produced the event.
pub trait Observer<E>: Send + Sync {
    fn notify(&self, event: &E);
}

/// Pub/sub hub for one event type.
pub struct EventHub<E> {
    name: &'static str,
    senders: Mutex<Vec<Sender<E>>>,
    observers: Mutex<Vec<Weak<dyn Observer<E>>>>,
}

impl<E> EventHub<E>
where
    E: Clone + fmt::Debug + Send + 'static,
{
    /// Create a hub; `name` only shows up in debug logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            senders: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Receive every future event on a channel.
    pub fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = unbounded();
        self.senders.lock().push(tx);
        rx
    }

    /// Register a synchronous observer. The hub keeps only a weak reference.
    pub fn observe<O>(&self, observer: &Arc<O>)
    where
        O: Observer<E> + 'static,
    {
        let weak: Weak<dyn Observer<E>> = Arc::downgrade(observer) as Weak<dyn Observer<E>>;
        self.observers.lock().push(weak);
    }

    /// Deliver an event to observers, then to channel subscribers.
    pub fn send(&self, event: E) {
        let observers: Vec<Arc<dyn Observer<E>>> = {
            let mut observers = self.observers.lock();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };

        for observer in &observers {
            observer.notify(&event);
        }

        let mut senders = self.senders.lock();
        let before = senders.len();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        let delivered = senders.len();
        drop(senders);

        if before != delivered {
            crate::debug_event!(
                "events",
                "pruned",
                "{} closed {} subscribers",
                before - delivered,
                self.name
            );
        }
        crate::debug_event!(
            "events",
            "sent",
            "{} {event:?} to {} observers, {delivered} subscribers",
            self.name,
            observers.len()
        );
    }

    /// Number of live channel subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().len()
    }
}

impl<E> fmt::Debug for EventHub<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("name", &self.name)
            .field("subscribers", &self.senders.lock().len())
            .field("observers", &self.observers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl Observer<u32> for Counter {
        fn notify(&self, event: &u32) {
            self.0.fetch_add(*event as usize, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_channel_subscribers_receive_events() {
        let hub = EventHub::new("test");
        let rx1 = hub.subscribe();
        let rx2 = hub.subscribe();

        hub.send(5u32);

        assert_eq!(rx1.try_recv().unwrap(), 5);
        assert_eq!(rx2.try_recv().unwrap(), 5);
    }

    #[test]
    fn test_observer_called_synchronously() {
        let hub = EventHub::new("test");
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        hub.observe(&counter);

        hub.send(3u32);
        hub.send(4u32);

        // No waiting needed: delivery happened inside send()
        assert_eq!(counter.0.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let hub = EventHub::new("test");
        let rx = hub.subscribe();
        drop(rx);
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        hub.observe(&counter);
        drop(counter);

        hub.send(1u32);

        assert_eq!(hub.subscriber_count(), 0);
    }
}
