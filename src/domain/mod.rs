//! Domain layer: entity graph, snapshots and the world event system.
//!
//! The [`World`] is the shared mutable entity graph every client is kept
//! consistent with. It publishes [`WorldEvent`]s on the [`EventBus`];
//! [`EntitySnapshot`] is the serialized form clients receive.

pub mod entity;
pub mod entity_id;
pub mod event_bus;
pub mod snapshot;
pub mod world;
pub mod world_event;

pub use entity::{AttributeDefinition, AttributeWrite, Component, ComponentDefinition, Entity};
pub use entity_id::EntityId;
pub use event_bus::{EventBus, WorldObserver};
pub use snapshot::EntitySnapshot;
pub use world::{RESERVED_GUID_KEY, World};
pub use world_event::WorldEvent;
