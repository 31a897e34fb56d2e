//! Point-in-time serialized view of an entity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Entity, EntityId};

/// Attribute values of one component, keyed by attribute name.
pub type ComponentSnapshot = BTreeMap<String, Value>;

/// Transport-neutral copy of an entity's full component state.
///
/// Serializes flat: `{"guid": "...", "<component>": {"<attr>": value}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Entity identifier.
    pub guid: EntityId,
    /// Every attached component with its current attribute values.
    #[serde(flatten)]
    pub components: BTreeMap<String, ComponentSnapshot>,
}

impl EntitySnapshot {
    /// Captures the live state of `entity`.
    ///
    /// Nothing is cached; call this at the moment the snapshot is needed.
    #[must_use]
    pub fn capture(entity: &Entity) -> Self {
        let components = entity
            .components
            .iter()
            .map(|(name, component)| (name.clone(), component.attributes.clone()))
            .collect();
        Self {
            guid: entity.guid,
            components,
        }
    }
}
