//! Notifications emitted by the world graph.
//!
//! Every mutation of the [`super::World`] publishes a [`WorldEvent`]
//! through the [`super::EventBus`]. The entity change broadcaster is the
//! main observer and turns them into client pushes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::{EntityId, EntitySnapshot};

/// Change notification for the shared entity graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum WorldEvent {
    /// An entity was inserted into the world.
    EntityAdded {
        /// Identifier of the new entity.
        entity_id: EntityId,
        /// State of the entity at insertion, captured under the write lock.
        snapshot: EntitySnapshot,
        /// Insertion timestamp.
        timestamp: DateTime<Utc>,
    },

    /// An entity was removed from the world.
    EntityRemoved {
        /// Identifier of the removed entity.
        entity_id: EntityId,
        /// Removal timestamp.
        timestamp: DateTime<Utc>,
    },

    /// An attribute of an existing entity was written.
    AttributeChanged {
        /// Entity owning the attribute.
        entity_id: EntityId,
        /// Component name.
        component: String,
        /// Attribute name.
        attribute: String,
        /// New value.
        value: Value,
        /// Time of the write.
        timestamp: DateTime<Utc>,
    },
}

impl WorldEvent {
    /// Returns the entity this event refers to.
    #[must_use]
    pub fn entity_id(&self) -> EntityId {
        match self {
            Self::EntityAdded { entity_id, .. }
            | Self::EntityRemoved { entity_id, .. }
            | Self::AttributeChanged { entity_id, .. } => *entity_id,
        }
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::EntityAdded { .. } => "entity_added",
            Self::EntityRemoved { .. } => "entity_removed",
            Self::AttributeChanged { .. } => "attribute_changed",
        }
    }
}
