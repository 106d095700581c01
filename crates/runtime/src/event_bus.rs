use std::sync::Arc;

use parking_lot::Mutex;

/// Identifies a subscriber so it can later be removed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Synchronous observer bus.
///
/// Emitted events are delivered to every listener in subscription order and
/// also retained in a log until drained, so callers that prefer polling (or
/// tests) can inspect what happened.
pub struct EventBus<E> {
    inner: Mutex<BusInner<E>>,
}

struct BusInner<E> {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener<E>)>,
    log: Vec<E>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                next_id: 0,
                listeners: Vec::new(),
                log: Vec::new(),
            }),
        }
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventBus")
            .field("listeners", &inner.listeners.len())
            .field("pending", &inner.log.len())
            .finish()
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        let mut inner = self.inner.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(sid, _)| *sid != id);
        inner.listeners.len() != before
    }

    pub fn emit(&self, event: E) {
        // Listeners run outside the lock so they may emit or subscribe themselves.
        let listeners: Vec<Listener<E>> = {
            let mut inner = self.inner.lock();
            inner.log.push(event.clone());
            inner.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn events(&self) -> Vec<E> {
        self.inner.lock().log.clone()
    }

    pub fn drain(&self) -> Vec<E> {
        std::mem::take(&mut self.inner.lock().log)
    }
}
