//! Synchronous fan-out of world events.
//!
//! [`EventBus`] keeps the list of [`WorldObserver`]s registered on a
//! world. The world calls [`EventBus::publish`] while it still holds its
//! entity write lock, so every observer sees events in mutation order and
//! sees each one exactly once. Nothing is buffered and nothing is dropped.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::RwLock;

use super::WorldEvent;

/// Receives every [`WorldEvent`] of the world it is subscribed to.
///
/// `on_event` runs while the world's entity write lock is held. It must
/// stay short and must not call back into the world.
pub trait WorldObserver: Send + Sync + fmt::Debug {
    /// Handles one event.
    fn on_event<'a>(&'a self, event: &'a WorldEvent) -> BoxFuture<'a, ()>;
}

/// Observer list for one [`super::World`].
#[derive(Debug, Default)]
pub struct EventBus {
    observers: RwLock<Vec<Arc<dyn WorldObserver>>>,
}

impl EventBus {
    /// Creates a bus with no observers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `observer`; it receives every event published from now on.
    pub async fn subscribe(&self, observer: Arc<dyn WorldObserver>) {
        self.observers.write().await.push(observer);
    }

    /// Hands `event` to every observer in subscription order.
    ///
    /// Returns the number of observers notified.
    pub async fn publish(&self, event: &WorldEvent) -> usize {
        let observers = self.observers.read().await;
        for observer in observers.iter() {
            observer.on_event(event).await;
        }
        tracing::trace!(
            event_type = event.event_type_str(),
            entity_id = %event.entity_id(),
            observers = observers.len(),
            "world event published"
        );
        observers.len()
    }
}

/// Observer that stores every event it sees.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct EventLog {
    events: tokio::sync::Mutex<Vec<WorldEvent>>,
}

#[cfg(test)]
impl EventLog {
    pub(crate) async fn take(&self) -> Vec<WorldEvent> {
        std::mem::take(&mut *self.events.lock().await)
    }
}

#[cfg(test)]
impl WorldObserver for EventLog {
    fn on_event<'a>(&'a self, event: &'a WorldEvent) -> BoxFuture<'a, ()> {
        Box::pin(async move { self.events.lock().await.push(event.clone()) })
    }
}
