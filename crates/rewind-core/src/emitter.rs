//! Typed publish/subscribe for outbound events.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// An event that can be dispatched through an [`EventEmitter`].
pub trait Event: Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Token identifying one registered handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription<K> {
    kind: K,
    id: u64,
}

impl<K: Copy> Subscription<K> {
    pub fn kind(&self) -> K {
        self.kind
    }
}

/// Dispatches events to handlers registered per event kind.
///
/// Handlers run synchronously on the emitting task, in registration order.
/// The handler list is snapshotted before dispatch, so a handler may
/// subscribe or unsubscribe without deadlocking.
pub struct EventEmitter<E: Event> {
    handlers: Mutex<HashMap<E::Kind, Vec<(u64, Handler<E>)>>>,
    next_id: AtomicU64,
}

impl<E: Event> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> EventEmitter<E> {
    pub fn new() -> Self {
        EventEmitter {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, kind: E::Kind, handler: F) -> Subscription<E::Kind>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription { kind, id }
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, subscription: &Subscription<E::Kind>) -> bool {
        let mut handlers = self.handlers.lock();
        let Some(list) = handlers.get_mut(&subscription.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscription.id);
        before != list.len()
    }

    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = self
            .handlers
            .lock()
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        for handler in snapshot {
            handler(event);
        }
    }

    pub fn handler_count(&self, kind: E::Kind) -> usize {
        self.handlers.lock().get(&kind).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Ping {
        A(u32),
        B,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum PingKind {
        A,
        B,
    }

    impl Event for Ping {
        type Kind = PingKind;

        fn kind(&self) -> PingKind {
            match self {
                Ping::A(_) => PingKind::A,
                Ping::B => PingKind::B,
            }
        }
    }

    #[test]
    fn test_emit_reaches_matching_kind_only() {
        let emitter = EventEmitter::<Ping>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_a = Arc::clone(&seen);
        emitter.subscribe(PingKind::A, move |e| seen_a.lock().push(e.clone()));

        emitter.emit(&Ping::A(1));
        emitter.emit(&Ping::B);
        emitter.emit(&Ping::A(2));

        assert_eq!(*seen.lock(), vec![Ping::A(1), Ping::A(2)]);
    }

    #[test]
    fn test_unsubscribe() {
        let emitter = EventEmitter::<Ping>::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let sub = emitter.subscribe(PingKind::B, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit(&Ping::B);
        assert!(emitter.unsubscribe(&sub));
        assert!(!emitter.unsubscribe(&sub));
        emitter.emit(&Ping::B);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.handler_count(PingKind::B), 0);
    }

    #[test]
    fn test_handler_can_subscribe_during_emit() {
        let emitter = Arc::new(EventEmitter::<Ping>::new());
        let inner = Arc::clone(&emitter);
        emitter.subscribe(PingKind::A, move |_| {
            inner.subscribe(PingKind::B, |_| {});
        });
        emitter.emit(&Ping::A(0));
        assert_eq!(emitter.handler_count(PingKind::B), 1);
    }
}
