use std::sync::Arc;

use parking_lot::Mutex;

/// Handle returned by [`Notifier::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerKey(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Synchronous listener registry.
///
/// Listeners run in subscription order on the emitting task. The registry lock is released
/// before any listener runs, so a listener may subscribe, unsubscribe or emit again without
/// deadlocking.
pub struct Notifier<E> {
    inner: Mutex<NotifierInner<E>>,
}

struct NotifierInner<E> {
    next_key: u64,
    listeners: Vec<(ListenerKey, Listener<E>)>,
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(NotifierInner {
                next_key: 0,
                listeners: Vec::new(),
            }),
        }
    }
}

impl<E> std::fmt::Debug for Notifier<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.len())
            .finish()
    }
}

impl<E> Notifier<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> ListenerKey {
        let mut inner = self.inner.lock();
        let key = ListenerKey(inner.next_key);
        inner.next_key += 1;
        inner.listeners.push((key, Arc::new(listener)));
        key
    }

    /// Returns `true` if the listener was still registered.
    pub fn unsubscribe(&self, key: ListenerKey) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(k, _)| *k != key);
        inner.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emit(&self, event: &E) {
        let listeners: Vec<Listener<E>> = self
            .inner
            .lock()
            .listeners
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}
