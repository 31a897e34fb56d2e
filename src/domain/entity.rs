//! Entities, components and attribute definitions of the world graph.
//!
//! An [`Entity`] is a bag of named [`Component`]s. Each component is an
//! instance of a [`ComponentDefinition`] registered with the
//! [`super::World`], and carries one value per defined attribute.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EntityId;
use crate::error::GatewayError;

/// Declares one attribute of a component and its initial value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    /// Attribute name, unique within its component.
    pub name: String,
    /// Value a freshly attached component starts with.
    pub default: Value,
}

/// Schema of a component type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    /// Component name, unique within the world.
    pub name: String,
    /// Attributes every instance of this component carries.
    pub attributes: Vec<AttributeDefinition>,
}

impl ComponentDefinition {
    /// Creates an empty definition with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    /// Adds an attribute with a default value.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, default: Value) -> Self {
        self.attributes.push(AttributeDefinition {
            name: name.into(),
            default,
        });
        self
    }

    /// Returns `true` if the definition declares `attribute`.
    #[must_use]
    pub fn defines(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a.name == attribute)
    }
}

/// A component attached to an entity, holding live attribute values.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Name of the [`ComponentDefinition`] this instance was built from.
    pub name: String,
    /// Current attribute values keyed by attribute name.
    pub attributes: BTreeMap<String, Value>,
}

impl Component {
    /// Instantiates a component with every attribute set to its default.
    #[must_use]
    pub fn from_definition(definition: &ComponentDefinition) -> Self {
        let attributes = definition
            .attributes
            .iter()
            .map(|a| (a.name.clone(), a.default.clone()))
            .collect();
        Self {
            name: definition.name.clone(),
            attributes,
        }
    }
}

/// A single attribute assignment, used to seed new entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeWrite {
    /// Target component name.
    pub component: String,
    /// Target attribute name.
    pub attribute: String,
    /// Value to store.
    pub value: Value,
}

impl AttributeWrite {
    /// Convenience constructor.
    #[must_use]
    pub fn new(component: impl Into<String>, attribute: impl Into<String>, value: Value) -> Self {
        Self {
            component: component.into(),
            attribute: attribute.into(),
            value,
        }
    }
}

/// An addressable object in the world graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Entity identifier (immutable after creation).
    pub guid: EntityId,
    /// Attached components keyed by component name.
    pub components: BTreeMap<String, Component>,
}

impl Entity {
    /// Creates an entity without components.
    #[must_use]
    pub fn new(guid: EntityId) -> Self {
        Self {
            guid,
            components: BTreeMap::new(),
        }
    }

    /// Writes an attribute, attaching the component first if needed.
    ///
    /// Returns the previous value when the attribute was already present.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UnknownAttribute`] if `definition` does not
    /// declare `attribute`.
    pub fn set_attribute(
        &mut self,
        definition: &ComponentDefinition,
        attribute: &str,
        value: Value,
    ) -> Result<Option<Value>, GatewayError> {
        if !definition.defines(attribute) {
            return Err(GatewayError::UnknownAttribute {
                component: definition.name.clone(),
                attribute: attribute.to_string(),
            });
        }
        let component = self
            .components
            .entry(definition.name.clone())
            .or_insert_with(|| Component::from_definition(definition));
        Ok(component.attributes.insert(attribute.to_string(), value))
    }
}
