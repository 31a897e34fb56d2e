//! Authenticated session table.
//!
//! [`Sessions`] holds the authenticated connection set, the push stubs of
//! each authenticated connection and the update queue. The client manager
//! keeps it behind one mutex so that login, teardown, broadcast and flush
//! are serialized against each other: a broadcast never sees a connection
//! that is half torn down.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use super::update_queue::{ClientUpdateQueue, FlushReport, UpdateInfo};
use crate::domain::{EntityId, EntitySnapshot};
use crate::error::GatewayError;
use crate::rpc::{ClientFunction, Connection, ConnectionId};

/// Client-side namespace of every entity push.
pub const OBJECTSYNC: &str = "objectsync";

/// The three client-bound stubs created for an authenticated connection.
#[derive(Debug, Clone)]
pub struct ClientStubs {
    /// `objectsync.receiveNewObjects`
    pub new_entity: ClientFunction,
    /// `objectsync.removeObject`
    pub removed_entity: ClientFunction,
    /// `objectsync.receiveObjectUpdates`
    pub object_updates: ClientFunction,
}

impl ClientStubs {
    /// Builds the stubs for `connection`.
    #[must_use]
    pub fn for_connection(connection: &Connection) -> Self {
        Self {
            new_entity: connection.client_function(OBJECTSYNC, "receiveNewObjects"),
            removed_entity: connection.client_function(OBJECTSYNC, "removeObject"),
            object_updates: connection.client_function(OBJECTSYNC, "receiveObjectUpdates"),
        }
    }
}

/// Outcome of pushing one event to every authenticated connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Pushes queued successfully.
    pub delivered: usize,
    /// Pushes that could not be queued.
    pub failed: usize,
}

/// State shared by login, teardown, broadcast and flush.
#[derive(Debug, Default)]
pub struct Sessions {
    authenticating: HashSet<ConnectionId>,
    authenticated: HashSet<ConnectionId>,
    new_entity_handlers: HashMap<ConnectionId, ClientFunction>,
    removed_entity_handlers: HashMap<ConnectionId, ClientFunction>,
    update_queue: ClientUpdateQueue,
}

impl Sessions {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `connection_id` as authenticating.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::AlreadyAuthenticated`] if the connection is
    /// already authenticated or has a login in flight.
    pub fn begin_authentication(&mut self, connection_id: ConnectionId) -> Result<(), GatewayError> {
        if self.authenticated.contains(&connection_id)
            || !self.authenticating.insert(connection_id)
        {
            return Err(GatewayError::AlreadyAuthenticated(connection_id));
        }
        Ok(())
    }

    /// Returns an authenticating connection to the anonymous state.
    pub fn abort_authentication(&mut self, connection_id: ConnectionId) {
        self.authenticating.remove(&connection_id);
    }

    /// Adds the stubs' connection to the authenticated set and installs its
    /// push handlers and update buffer in one step.
    pub fn complete_authentication(&mut self, stubs: ClientStubs) {
        let connection_id = stubs.new_entity.connection_id();
        self.authenticating.remove(&connection_id);
        self.authenticated.insert(connection_id);
        self.new_entity_handlers.insert(connection_id, stubs.new_entity);
        self.removed_entity_handlers
            .insert(connection_id, stubs.removed_entity);
        self.update_queue
            .register_to_client_updates(stubs.object_updates);
    }

    /// Drops every trace of `connection_id`.
    ///
    /// Returns `true` if the connection was authenticated.
    pub fn remove(&mut self, connection_id: ConnectionId) -> bool {
        self.authenticating.remove(&connection_id);
        self.new_entity_handlers.remove(&connection_id);
        self.removed_entity_handlers.remove(&connection_id);
        if let Some(dropped) = self.update_queue.stop_client_updates(connection_id)
            && dropped > 0
        {
            tracing::debug!(%connection_id, dropped, "discarded pending updates");
        }
        self.authenticated.remove(&connection_id)
    }

    /// Pushes `snapshot` to every authenticated connection.
    pub fn broadcast_new_entity(&self, snapshot: &EntitySnapshot) -> DeliveryReport {
        match serde_json::to_value(snapshot) {
            Ok(payload) => deliver(self.new_entity_handlers.values(), &payload),
            Err(e) => {
                tracing::warn!(entity_id = %snapshot.guid, error = %e, "failed to serialize snapshot");
                DeliveryReport::default()
            }
        }
    }

    /// Pushes the removal of `entity_id` to every authenticated connection.
    pub fn broadcast_removed_entity(&self, entity_id: EntityId) -> DeliveryReport {
        let payload = Value::String(entity_id.to_string());
        deliver(self.removed_entity_handlers.values(), &payload)
    }

    /// Buffers an attribute change for every authenticated connection.
    pub fn enqueue_update(&mut self, update: &UpdateInfo) {
        self.update_queue.enqueue(update);
    }

    /// Flushes every non-empty update buffer.
    pub fn flush_updates(&mut self) -> FlushReport {
        self.update_queue.flush()
    }

    /// Returns `true` if `connection_id` is authenticated.
    #[must_use]
    pub fn is_authenticated(&self, connection_id: ConnectionId) -> bool {
        self.authenticated.contains(&connection_id)
    }

    /// Returns `true` if push handlers exist for `connection_id`.
    #[must_use]
    pub fn has_push_handlers(&self, connection_id: ConnectionId) -> bool {
        self.new_entity_handlers.contains_key(&connection_id)
            || self.removed_entity_handlers.contains_key(&connection_id)
            || self.update_queue.contains(connection_id)
    }

    /// Number of authenticated connections.
    #[must_use]
    pub fn authenticated_count(&self) -> usize {
        self.authenticated.len()
    }
}

fn deliver<'a, I>(handlers: I, payload: &Value) -> DeliveryReport
where
    I: Iterator<Item = &'a ClientFunction>,
{
    let mut report = DeliveryReport::default();
    for push in handlers {
        match push.invoke(vec![payload.clone()]) {
            Ok(()) => report.delivered = report.delivered.saturating_add(1),
            Err(e) => {
                tracing::warn!(
                    connection_id = %push.connection_id(),
                    method = push.method(),
                    error = %e,
                    "push delivery failed"
                );
                report.failed = report.failed.saturating_add(1);
            }
        }
    }
    report
}
