/*!
 * Event fan-out for HapticFlow.
 *
 * An [`EventHub`] keeps an explicit table of listeners keyed by a
 * [`SubscriptionId`]. Listeners are either channels (the subscriber owns the
 * receiving end) or synchronous callbacks. Subscribers unsubscribe explicitly
 * when they are torn down; channel listeners whose receiver was dropped are
 * pruned on the next publish.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Token identifying one listener of an [`EventHub`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

enum Listener<T> {
    Channel(mpsc::UnboundedSender<T>),
    Callback(Callback<T>),
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        match self {
            Listener::Channel(tx) => Listener::Channel(tx.clone()),
            Listener::Callback(cb) => Listener::Callback(cb.clone()),
        }
    }
}

/// The receiving end of a channel subscription
#[derive(Debug)]
pub struct Subscription<T> {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Token to pass to [`EventHub::unsubscribe`]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. Returns `None` once the hub is dropped or
    /// the subscription was removed.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Take the next event if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

/// Observer table for one event type
pub struct EventHub<T> {
    name: &'static str,
    listeners: Mutex<HashMap<SubscriptionId, Listener<T>>>,
}

impl<T> fmt::Debug for EventHub<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("name", &self.name)
            .field("listeners", &self.subscriber_count())
            .finish()
    }
}

impl<T> EventHub<T> {
    /// Number of registered listeners
    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

impl<T: Clone + Send + 'static> EventHub<T> {
    /// Create a hub; `name` only appears in logs
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Register a channel listener
    pub fn subscribe(&self) -> Result<Subscription<T>> {
        let (tx, receiver) = mpsc::unbounded_channel();
        let id = self.insert(Listener::Channel(tx))?;
        Ok(Subscription { id, receiver })
    }

    /// Register a callback listener. The callback runs on the publishing
    /// task and must not block.
    pub fn subscribe_fn<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.insert(Listener::Callback(Arc::new(callback)))
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        let mut listeners = self.lock()?;
        let removed = listeners.remove(&id).is_some();
        if removed {
            debug!(hub = self.name, %id, "Listener unsubscribed");
        }
        Ok(removed)
    }

    /// Deliver an event to every listener. Returns the number reached.
    pub fn publish(&self, event: T) -> Result<usize> {
        let snapshot: Vec<(SubscriptionId, Listener<T>)> = self
            .lock()?
            .iter()
            .map(|(id, listener)| (*id, listener.clone()))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, listener) in snapshot {
            match listener {
                Listener::Channel(tx) => {
                    if tx.send(event.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        closed.push(id);
                    }
                }
                Listener::Callback(callback) => {
                    callback(&event);
                    delivered += 1;
                }
            }
        }

        if !closed.is_empty() {
            let mut listeners = self.lock()?;
            for id in closed {
                listeners.remove(&id);
                debug!(hub = self.name, %id, "Pruned closed listener");
            }
        }

        trace!(hub = self.name, delivered, "Published event");
        Ok(delivered)
    }

    fn insert(&self, listener: Listener<T>) -> Result<SubscriptionId> {
        let id = SubscriptionId::new();
        self.lock()?.insert(id, listener);
        debug!(hub = self.name, %id, "Listener subscribed");
        Ok(id)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SubscriptionId, Listener<T>>>> {
        self.listeners
            .lock()
            .map_err(|_| Error::event(format!("Listener table of {} is poisoned", self.name)))
    }
}
