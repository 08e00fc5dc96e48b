use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Identifies one scheduling of a key. A fired timer is only honoured if its ticket is
/// still the current one for that key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

/// A timer that elapsed, as delivered on the debouncer's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<K> {
    pub key: K,
    pub ticket: Ticket,
}

struct Pending {
    ticket: Ticket,
    abort: AbortHandle,
}

/// Keyed, cancellable one-shot timers on tokio time.
///
/// Scheduling a key that is already pending cancels the earlier timer. Elapsed timers are
/// delivered as [`Fired`] messages on the receiver returned by [`Debouncer::new`]; the owner
/// must call [`Debouncer::accept`] before acting on one, which filters out timers that were
/// superseded or cancelled after they had already been queued.
pub struct Debouncer<K> {
    next_ticket: u64,
    pending: HashMap<K, Pending>,
    tx: mpsc::UnboundedSender<Fired<K>>,
}

impl<K> Debouncer<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Fired<K>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                next_ticket: 0,
                pending: HashMap::new(),
                tx,
            },
            rx,
        )
    }

    pub fn schedule(&mut self, key: K, delay: Duration) -> Ticket {
        self.cancel(&key);

        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;

        let tx = self.tx.clone();
        let fired = Fired {
            key: key.clone(),
            ticket,
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver only goes away when the owner is dropped.
            let _ = tx.send(fired);
        });
        self.pending.insert(
            key,
            Pending {
                ticket,
                abort: handle.abort_handle(),
            },
        );
        ticket
    }

    /// Returns `true` if a timer was pending for `key`.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.pending.remove(key) {
            Some(p) => {
                p.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every timer and returns the keys that were pending.
    pub fn cancel_all(&mut self) -> Vec<K> {
        self.pending
            .drain()
            .map(|(k, p)| {
                p.abort.abort();
                k
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Consumes a fired timer. Returns `false` for stale tickets.
    pub fn accept(&mut self, fired: &Fired<K>) -> bool {
        match self.pending.get(&fired.key) {
            Some(p) if p.ticket == fired.ticket => {
                self.pending.remove(&fired.key);
                true
            }
            _ => false,
        }
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        for p in self.pending.values() {
            p.abort.abort();
        }
    }
}
