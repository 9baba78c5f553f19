//! In-process fan-out of messages to any number of subscribers.
//!
//! Each subscriber owns a bounded queue. Publishing never blocks: a message
//! that does not fit into a full queue is dropped for that subscriber only.
//! A subscriber may register a filter; messages it rejects never reach its
//! queue and so cannot crowd out the ones it wants.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, trace};

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Receiving end handed out by [`Broadcaster::subscribe`].
#[derive(Debug)]
pub struct Subscription<T> {
    id: SubscriberId,
    receiver: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next message, `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.receiver.try_recv()
    }
}

type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct Subscriber<T> {
    id: SubscriberId,
    sender: mpsc::Sender<T>,
    filter: Option<Filter<T>>,
}

impl<T> Subscriber<T> {
    fn wants(&self, message: &T) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(message))
    }
}

pub struct Broadcaster<T> {
    capacity: usize,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber<T>>>,
}

impl<T: Clone> Broadcaster<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Broadcaster whose subscribers buffer up to `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        self.register(None)
    }

    /// Subscribes to the messages for which `filter` returns true.
    pub fn subscribe_filtered<F>(&self, filter: F) -> Subscription<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.register(Some(Arc::new(filter)))
    }

    fn register(&self, filter: Option<Filter<T>>) -> Subscription<T> {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.lock().push(Subscriber { id, sender, filter });
        debug!(subscriber = id.0, "subscriber registered");
        Subscription { id, receiver }
    }

    /// Closes the subscriber's queue. Messages already buffered can still be
    /// received. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut subscribers = self.lock();
        if let Some(index) = subscribers.iter().position(|sub| sub.id == id) {
            subscribers.swap_remove(index);
            debug!(subscriber = id.0, "subscriber removed");
        }
    }

    /// Offers `message` to every interested subscriber without waiting.
    /// Returns how many subscribers accepted it.
    pub fn broadcast(&self, message: T) -> usize {
        let mut delivered = 0;
        self.lock().retain(|sub| {
            if sub.sender.is_closed() {
                debug!(subscriber = sub.id.0, "subscriber gone, pruning");
                return false;
            }
            if !sub.wants(&message) {
                return true;
            }
            match sub.sender.try_send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    trace!(subscriber = sub.id.0, "subscriber queue full, message dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = sub.id.0, "subscriber gone, pruning");
                    false
                }
            }
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber<T>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self
            .subscribers
            .lock()
            .map(|subs| subs.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len());
        f.debug_struct("Broadcaster")
            .field("capacity", &self.capacity)
            .field("subscribers", &subscribers)
            .finish()
    }
}

impl<T: Clone> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}
