use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::trace;

use crate::window::WindowState;

/// Change notifications published by a [`PagedWindowList`](super::PagedWindowList).
#[derive(Debug, Clone, PartialEq)]
pub enum ListEvent {
    /// The mounted range or its spacers moved.
    WindowChanged(WindowState),
    /// Pages covering the current window finished loading.
    PagesLoaded {
        first_index: usize,
        last_index: usize,
        fetched: usize,
    },
    /// The backing query changed; every slot is a placeholder again.
    Invalidated { total_count: usize },
    Disposed,
}

/// Fan-out of events to any number of subscribers.
pub(crate) struct EventBus<E> {
    subscribers: Mutex<Vec<Sender<E>>>,
}

impl<E: Clone> EventBus<E> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Send `event` to every live subscriber, pruning dropped receivers.
    pub(crate) fn publish(&self, event: E) {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        if subscribers.len() != before {
            trace!(pruned = before - subscribers.len(), "Dropped closed subscribers");
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.subscribers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(ListEvent::Disposed);

        assert_eq!(a.try_recv().unwrap(), ListEvent::Disposed);
        assert_eq!(b.try_recv().unwrap(), ListEvent::Disposed);
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(ListEvent::Invalidated { total_count: 3 });

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap(), ListEvent::Invalidated { total_count: 3 });
    }
}
