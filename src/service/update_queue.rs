//! Per-connection coalescing buffer for attribute updates.
//!
//! Attribute writes are queued for every registered client and flushed on
//! the server tick as one `objectsync.receiveObjectUpdates` push per
//! client. Several writes to the same `(entity, component, attribute)`
//! inside one window collapse to the latest value.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::EntityId;
use crate::rpc::{ClientFunction, ConnectionId};

/// One attribute change as delivered to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    /// Entity owning the attribute.
    pub entity_guid: EntityId,
    /// Component name.
    pub component_name: String,
    /// Attribute name.
    pub attribute_name: String,
    /// Latest value.
    pub value: Value,
}

impl UpdateInfo {
    fn key(&self) -> UpdateKey {
        UpdateKey {
            entity_guid: self.entity_guid,
            component_name: self.component_name.clone(),
            attribute_name: self.attribute_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UpdateKey {
    entity_guid: EntityId,
    component_name: String,
    attribute_name: String,
}

/// Updates waiting for the next flush, last write wins per key.
///
/// Keys keep the position of their first write in the window.
#[derive(Debug, Default)]
pub struct PendingUpdateBuffer {
    updates: Vec<UpdateInfo>,
    index: HashMap<UpdateKey, usize>,
}

impl PendingUpdateBuffer {
    /// Queues `update`, replacing the value of an earlier write to the same key.
    pub fn push(&mut self, update: UpdateInfo) {
        let key = update.key();
        if let Some(slot) = self.index.get(&key).and_then(|&i| self.updates.get_mut(i)) {
            slot.value = update.value;
            return;
        }
        self.index.insert(key, self.updates.len());
        self.updates.push(update);
    }

    /// Takes every pending update, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<UpdateInfo> {
        self.index.clear();
        std::mem::take(&mut self.updates)
    }

    /// Number of distinct keys pending.
    #[must_use]
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

#[derive(Debug)]
struct QueuedClient {
    push: ClientFunction,
    buffer: PendingUpdateBuffer,
}

/// Outcome of one flush tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Clients whose batch was queued for delivery.
    pub delivered: usize,
    /// Clients whose batch could not be queued.
    pub failed: usize,
    /// Total updates taken from the buffers.
    pub updates: usize,
}

/// Update buffers for every client registered for attribute updates.
///
/// Not synchronized on its own; it lives inside the session table lock.
#[derive(Debug, Default)]
pub struct ClientUpdateQueue {
    clients: HashMap<ConnectionId, QueuedClient>,
}

impl ClientUpdateQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts buffering updates for the stub's connection.
    ///
    /// The connection takes part from the next flush on.
    pub fn register_to_client_updates(&mut self, push: ClientFunction) {
        self.clients.insert(
            push.connection_id(),
            QueuedClient {
                push,
                buffer: PendingUpdateBuffer::default(),
            },
        );
    }

    /// Stops delivery to `connection_id` and discards its pending updates.
    ///
    /// Returns the number of updates dropped, or `None` if the connection
    /// was not registered.
    pub fn stop_client_updates(&mut self, connection_id: ConnectionId) -> Option<usize> {
        self.clients
            .remove(&connection_id)
            .map(|client| client.buffer.len())
    }

    /// Queues `update` for every registered client.
    pub fn enqueue(&mut self, update: &UpdateInfo) {
        for client in self.clients.values_mut() {
            client.buffer.push(update.clone());
        }
    }

    /// Sends each non-empty buffer as one batched push and clears it.
    ///
    /// A failed delivery is logged and does not affect other clients; the
    /// failed batch is dropped rather than requeued.
    pub fn flush(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        for client in self.clients.values_mut() {
            if client.buffer.is_empty() {
                continue;
            }
            let batch = client.buffer.drain();
            report.updates = report.updates.saturating_add(batch.len());
            let payload = match serde_json::to_value(&batch) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize update batch");
                    report.failed = report.failed.saturating_add(1);
                    continue;
                }
            };
            match client.push.invoke(vec![payload]) {
                Ok(()) => report.delivered = report.delivered.saturating_add(1),
                Err(e) => {
                    tracing::warn!(
                        connection_id = %client.push.connection_id(),
                        error = %e,
                        "update batch delivery failed"
                    );
                    report.failed = report.failed.saturating_add(1);
                }
            }
        }
        report
    }

    /// Returns `true` if `connection_id` is registered.
    #[must_use]
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.clients.contains_key(&connection_id)
    }

    /// Number of pending updates for `connection_id`.
    #[must_use]
    pub fn pending(&self, connection_id: ConnectionId) -> usize {
        self.clients
            .get(&connection_id)
            .map_or(0, |client| client.buffer.len())
    }
}
