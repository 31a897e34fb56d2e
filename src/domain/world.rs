//! In-memory entity graph shared by every connected client.
//!
//! [`World`] owns the component definitions and all live entities. Each
//! mutation hands a [`WorldEvent`] to the [`EventBus`] before the entity
//! write lock is released. Observers therefore see events in mutation
//! order, and a reader taking the lock afterwards always sees the state
//! the last event described.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use super::entity::{AttributeWrite, ComponentDefinition, Entity};
use super::event_bus::WorldObserver;
use super::{EntityId, EntitySnapshot, EventBus, WorldEvent};
use crate::error::GatewayError;

/// Snapshot key holding the entity id; no component may use it.
pub const RESERVED_GUID_KEY: &str = "guid";

/// The shared mutable entity graph.
///
/// # Concurrency
///
/// - Entities live in one `RwLock<HashMap<..>>`; snapshots take the read lock.
/// - Observers run under the entity write lock and must not call back in.
/// - Component definitions have their own lock and are rarely written.
#[derive(Debug, Default)]
pub struct World {
    entities: RwLock<HashMap<EntityId, Entity>>,
    definitions: RwLock<HashMap<String, ComponentDefinition>>,
    event_bus: EventBus,
}

impl World {
    /// Creates an empty world with no observers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer` for every event published from now on.
    pub async fn subscribe(&self, observer: Arc<dyn WorldObserver>) {
        self.event_bus.subscribe(observer).await;
    }

    /// Registers a component type.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ReservedComponentName`] for `"guid"`, which
    /// snapshots use for the entity id, and
    /// [`GatewayError::ComponentAlreadyDefined`] if a definition with the
    /// same name exists.
    pub async fn register_component(
        &self,
        definition: ComponentDefinition,
    ) -> Result<(), GatewayError> {
        if definition.name == RESERVED_GUID_KEY {
            return Err(GatewayError::ReservedComponentName(definition.name));
        }
        let mut defs = self.definitions.write().await;
        if defs.contains_key(&definition.name) {
            return Err(GatewayError::ComponentAlreadyDefined(definition.name));
        }
        tracing::debug!(component = %definition.name, "component registered");
        defs.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Creates a new entity seeded with `writes` and returns its id.
    ///
    /// Components named by the writes are attached with their defaults
    /// before the writes are applied. The published event carries the
    /// snapshot taken at insertion.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UnknownComponent`] or
    /// [`GatewayError::UnknownAttribute`] if a write does not match a
    /// registered definition. Nothing is inserted in that case.
    pub async fn add_entity(&self, writes: Vec<AttributeWrite>) -> Result<EntityId, GatewayError> {
        let mut entity = Entity::new(EntityId::new());
        {
            let defs = self.definitions.read().await;
            for write in writes {
                let definition = defs
                    .get(&write.component)
                    .ok_or_else(|| GatewayError::UnknownComponent(write.component.clone()))?;
                entity.set_attribute(definition, &write.attribute, write.value)?;
            }
        }

        let entity_id = entity.guid;
        let snapshot = EntitySnapshot::capture(&entity);
        let mut entities = self.entities.write().await;
        entities.insert(entity_id, entity);
        self.event_bus
            .publish(&WorldEvent::EntityAdded {
                entity_id,
                snapshot,
                timestamp: Utc::now(),
            })
            .await;
        drop(entities);

        tracing::debug!(%entity_id, "entity added");
        Ok(entity_id)
    }

    /// Removes an entity from the world and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::EntityNotFound`] if no such entity exists.
    pub async fn remove_entity(&self, entity_id: EntityId) -> Result<Entity, GatewayError> {
        let mut entities = self.entities.write().await;
        let entity = entities
            .remove(&entity_id)
            .ok_or(GatewayError::EntityNotFound(entity_id))?;
        self.event_bus
            .publish(&WorldEvent::EntityRemoved {
                entity_id,
                timestamp: Utc::now(),
            })
            .await;
        drop(entities);

        tracing::debug!(%entity_id, "entity removed");
        Ok(entity)
    }

    /// Writes one attribute of an existing entity.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UnknownComponent`],
    /// [`GatewayError::UnknownAttribute`] or [`GatewayError::EntityNotFound`].
    pub async fn set_attribute(
        &self,
        entity_id: EntityId,
        component: &str,
        attribute: &str,
        value: Value,
    ) -> Result<(), GatewayError> {
        let definition = self
            .definitions
            .read()
            .await
            .get(component)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownComponent(component.to_string()))?;

        let mut entities = self.entities.write().await;
        let entity = entities
            .get_mut(&entity_id)
            .ok_or(GatewayError::EntityNotFound(entity_id))?;
        entity.set_attribute(&definition, attribute, value.clone())?;
        self.event_bus
            .publish(&WorldEvent::AttributeChanged {
                entity_id,
                component: component.to_string(),
                attribute: attribute.to_string(),
                value,
                timestamp: Utc::now(),
            })
            .await;
        Ok(())
    }

    /// Captures the current state of one entity.
    pub async fn snapshot(&self, entity_id: EntityId) -> Option<EntitySnapshot> {
        self.entities
            .read()
            .await
            .get(&entity_id)
            .map(EntitySnapshot::capture)
    }

    /// Captures the current state of every entity in the world.
    pub async fn snapshots(&self) -> Vec<EntitySnapshot> {
        self.entities
            .read()
            .await
            .values()
            .map(EntitySnapshot::capture)
            .collect()
    }

    /// Returns the number of entities.
    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    /// Returns `true` if the world contains no entities.
    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::event_bus::EventLog;
    use serde_json::json;

    async fn make_world() -> (World, Arc<EventLog>) {
        let world = World::new();
        let def = ComponentDefinition::new("location")
            .with_attribute("x", json!(0.0))
            .with_attribute("y", json!(0.0));
        let Ok(()) = world.register_component(def).await else {
            panic!("definition should register");
        };
        let log = Arc::new(EventLog::default());
        world.subscribe(Arc::clone(&log) as Arc<dyn WorldObserver>).await;
        (world, log)
    }

    #[tokio::test]
    async fn duplicate_component_is_rejected() {
        let (world, _log) = make_world().await;
        let result = world
            .register_component(ComponentDefinition::new("location"))
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::ComponentAlreadyDefined(_))
        ));
    }

    #[tokio::test]
    async fn guid_is_not_a_component_name() {
        let (world, _log) = make_world().await;
        let def = ComponentDefinition::new("guid").with_attribute("x", json!(0));
        let result = world.register_component(def).await;
        assert!(matches!(
            result,
            Err(GatewayError::ReservedComponentName(name)) if name == "guid"
        ));
        let result = world
            .add_entity(vec![AttributeWrite::new("guid", "x", json!(1))])
            .await;
        assert!(matches!(result, Err(GatewayError::UnknownComponent(_))));
    }

    #[tokio::test]
    async fn add_entity_publishes_snapshot_and_applies_writes() {
        let (world, log) = make_world().await;

        let Ok(id) = world
            .add_entity(vec![AttributeWrite::new("location", "x", json!(4.0))])
            .await
        else {
            panic!("entity should be created");
        };

        let events = log.take().await;
        let [WorldEvent::EntityAdded { entity_id, snapshot, .. }] = events.as_slice() else {
            panic!("expected one entity_added event, got {events:?}");
        };
        assert_eq!(*entity_id, id);
        let Ok(value) = serde_json::to_value(snapshot) else {
            panic!("snapshot should serialize");
        };
        assert_eq!(value["location"], json!({ "x": 4.0, "y": 0.0 }));
        assert_eq!(world.snapshot(id).await.as_ref(), Some(snapshot));
    }

    #[tokio::test]
    async fn add_entity_with_unknown_component_inserts_nothing() {
        let (world, log) = make_world().await;
        let result = world
            .add_entity(vec![AttributeWrite::new("mesh", "uri", json!("a.xml"))])
            .await;
        assert!(matches!(result, Err(GatewayError::UnknownComponent(_))));
        assert!(world.is_empty().await);
        assert!(log.take().await.is_empty());
    }

    #[tokio::test]
    async fn set_attribute_publishes_change() {
        let (world, log) = make_world().await;
        let Ok(id) = world.add_entity(Vec::new()).await else {
            panic!("entity should be created");
        };
        let _ = log.take().await;

        let result = world.set_attribute(id, "location", "y", json!(7.0)).await;
        assert!(result.is_ok());

        let events = log.take().await;
        let [WorldEvent::AttributeChanged { value, .. }] = events.as_slice() else {
            panic!("expected attribute change, got {events:?}");
        };
        assert_eq!(value, &json!(7.0));
        let Some(snapshot) = world.snapshot(id).await else {
            panic!("entity should exist");
        };
        let Ok(value) = serde_json::to_value(&snapshot) else {
            panic!("snapshot should serialize");
        };
        assert_eq!(value["location"]["y"], json!(7.0));
    }

    #[tokio::test]
    async fn set_attribute_on_missing_entity_fails() {
        let (world, log) = make_world().await;
        let result = world
            .set_attribute(EntityId::new(), "location", "x", json!(1.0))
            .await;
        assert!(matches!(result, Err(GatewayError::EntityNotFound(_))));
        assert!(log.take().await.is_empty());
    }

    #[tokio::test]
    async fn remove_entity_publishes_event() {
        let (world, log) = make_world().await;
        let Ok(id) = world.add_entity(Vec::new()).await else {
            panic!("entity should be created");
        };

        assert!(world.remove_entity(id).await.is_ok());
        assert!(world.snapshot(id).await.is_none());

        let kinds: Vec<_> = log.take().await.iter().map(WorldEvent::event_type_str).collect();
        assert_eq!(kinds, vec!["entity_added", "entity_removed"]);
    }

    #[tokio::test]
    async fn snapshots_lists_every_entity() {
        let (world, _log) = make_world().await;
        let _ = world.add_entity(Vec::new()).await;
        let _ = world.add_entity(Vec::new()).await;
        assert_eq!(world.snapshots().await.len(), 2);
        assert_eq!(world.len().await, 2);
    }
}
