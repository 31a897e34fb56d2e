//! Turns world events into client pushes.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::Mutex;

use super::sessions::Sessions;
use super::update_queue::UpdateInfo;
use crate::domain::{WorldEvent, WorldObserver};

/// Forwards entity lifecycle events to every authenticated connection.
///
/// Subscribed to the world as a [`WorldObserver`], so it runs inside the
/// mutation that produced the event. The targets of a push are the
/// connections authenticated at that moment. Added entities are pushed as
/// the snapshot taken at insertion, removals as the bare entity id.
/// Attribute changes go to the update queue and reach clients on the next
/// flush tick.
#[derive(Debug, Clone)]
pub struct EntityChangeBroadcaster {
    sessions: Arc<Mutex<Sessions>>,
}

impl EntityChangeBroadcaster {
    /// Creates a broadcaster delivering through `sessions`.
    #[must_use]
    pub fn new(sessions: Arc<Mutex<Sessions>>) -> Self {
        Self { sessions }
    }

    /// Handles a single world event.
    pub async fn handle_event(&self, event: &WorldEvent) {
        match event {
            WorldEvent::EntityAdded {
                entity_id,
                snapshot,
                ..
            } => {
                let report = self.sessions.lock().await.broadcast_new_entity(snapshot);
                tracing::debug!(
                    %entity_id,
                    delivered = report.delivered,
                    failed = report.failed,
                    "new entity broadcast"
                );
            }
            WorldEvent::EntityRemoved { entity_id, .. } => {
                let report = self
                    .sessions
                    .lock()
                    .await
                    .broadcast_removed_entity(*entity_id);
                tracing::debug!(
                    %entity_id,
                    delivered = report.delivered,
                    failed = report.failed,
                    "entity removal broadcast"
                );
            }
            WorldEvent::AttributeChanged {
                entity_id,
                component,
                attribute,
                value,
                ..
            } => {
                let update = UpdateInfo {
                    entity_guid: *entity_id,
                    component_name: component.clone(),
                    attribute_name: attribute.clone(),
                    value: value.clone(),
                };
                self.sessions.lock().await.enqueue_update(&update);
            }
        }
    }
}

impl WorldObserver for EntityChangeBroadcaster {
    fn on_event<'a>(&'a self, event: &'a WorldEvent) -> BoxFuture<'a, ()> {
        Box::pin(self.handle_event(event))
    }
}
