//! # Component Registry
//!
//! This module defines the [`Component`] capability and the per-world registry
//! that assigns stable `ComponentID` values to component names.
//!
//! ## Purpose
//! Components are identified by name throughout the engine: in the persisted
//! state layout, in CQL expressions and in archetype tables. The registry maps
//! each name to a compact `ComponentID` so archetypes can be described by
//! [`Signature`](crate::engine::types::Signature) bitsets, and it recovers the
//! concrete Rust type at the registration boundary.
//!
//! ## Design
//! - Components are registered once and assigned a compact `ComponentID` in
//!   `[0, COMPONENT_CAP)` in registration order.
//! - The registry is owned by its game state; there is no process-wide registry,
//!   so independent worlds (and tests) never share component ids.
//! - The registry is `freeze()`d when the game state initializes. Archetype
//!   signatures loaded from storage are only meaningful once ids are final.
//!
//! ## Invariants
//! - A name maps to exactly one Rust type.
//! - `ComponentID` values are unique and stable for the lifetime of the registry.
//! - When frozen, registration is rejected.
//!
//! ## Concurrency
//! The tables are protected by an `RwLock`. After freezing only reads happen,
//! so lookups from concurrent query tasks never contend.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::engine::error::{StateError, StateResult};
use crate::engine::types::{ComponentID, Signature, COMPONENT_CAP};

/// A named, serializable value type that can be attached to entities.
///
/// `NAME` is the identity of the component in storage and in CQL. Changing it
/// orphans previously persisted values.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use world_engine::Component;
///
/// #[derive(Debug, Default, Clone, Serialize, Deserialize)]
/// struct Health {
///     value: i64,
/// }
///
/// impl Component for Health {
///     const NAME: &'static str = "Health";
/// }
/// ```
pub trait Component: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Registered name of the component.
    const NAME: &'static str;
}

/// Describes a registered component type.
///
/// ### Fields
/// * `component_id`: runtime identifier assigned by the registry.
/// * `name`: component name ([`Component::NAME`]).
/// * `type_id`: `TypeId` of the Rust type registered under `name`.
/// * `type_name`: Rust type name, for diagnostics.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentDesc {
    /// Runtime identifier assigned to this component type.
    pub component_id: ComponentID,

    /// Registered component name.
    pub name: &'static str,

    /// Runtime `TypeId` of the component.
    pub type_id: TypeId,

    /// Rust type name for diagnostics.
    pub type_name: &'static str,
}

impl ComponentDesc {
    fn of<T: Component>(component_id: ComponentID) -> Self {
        Self {
            component_id,
            name: T::NAME,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }
}

impl std::fmt::Display for ComponentDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (id {}, type {})", self.name, self.component_id, self.type_name)
    }
}

#[derive(Default)]
struct RegistryTables {
    by_name: HashMap<&'static str, ComponentID>,
    by_id: Vec<ComponentDesc>,
}

/// Mapping between component names, Rust types and compact `ComponentID` values.
#[derive(Default)]
pub struct ComponentRegistry {
    tables: RwLock<RegistryTables>,
    frozen: AtomicBool,
}

impl ComponentRegistry {
    /// Creates an empty, unfrozen registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryTables> {
        self.tables.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryTables> {
        self.tables.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers component type `T` and returns its assigned `ComponentID`.
    ///
    /// ## Behavior
    /// - If `T` is already registered, returns the existing ID.
    /// - If another type already uses `T::NAME`, fails with `ComponentNameTaken`.
    /// - Fails with `RegistrationLocked` once the registry is frozen.
    pub fn register<T: Component>(&self) -> StateResult<ComponentID> {
        let mut tables = self.write();

        if let Some(&existing) = tables.by_name.get(T::NAME) {
            return if tables.by_id[existing as usize].type_id == TypeId::of::<T>() {
                Ok(existing)
            } else {
                Err(StateError::ComponentNameTaken(T::NAME.to_string()))
            };
        }

        if self.is_frozen() {
            return Err(StateError::RegistrationLocked);
        }
        if tables.by_id.len() >= COMPONENT_CAP {
            return Err(StateError::ComponentCapacity);
        }

        let id = tables.by_id.len() as ComponentID;
        tables.by_name.insert(T::NAME, id);
        tables.by_id.push(ComponentDesc::of::<T>(id));
        Ok(id)
    }

    /// Freezes the registry, preventing further component registrations.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Returns `true` if the registry has been frozen.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Returns the `ComponentID` registered under `name`.
    pub fn id_of_name(&self, name: &str) -> Option<ComponentID> {
        self.read().by_name.get(name).copied()
    }

    /// Returns the `ComponentID` for `name`, or `ComponentNotRegistered`.
    pub fn require_id_of_name(&self, name: &str) -> StateResult<ComponentID> {
        self.id_of_name(name)
            .ok_or_else(|| StateError::ComponentNotRegistered(name.to_string()))
    }

    /// Returns the `ComponentID` for `T`, checking that the name belongs to `T`.
    pub fn require_id_of<T: Component>(&self) -> StateResult<ComponentID> {
        let tables = self.read();
        match tables.by_name.get(T::NAME) {
            Some(&id) if tables.by_id[id as usize].type_id == TypeId::of::<T>() => Ok(id),
            Some(_) => Err(StateError::ComponentNameTaken(T::NAME.to_string())),
            None => Err(StateError::ComponentNotRegistered(T::NAME.to_string())),
        }
    }

    /// Returns the name registered for `component_id`.
    pub fn name_of(&self, component_id: ComponentID) -> Option<&'static str> {
        self.read().by_id.get(component_id as usize).map(|desc| desc.name)
    }

    /// Returns a copy of the descriptor for `component_id`, if registered.
    pub fn description(&self, component_id: ComponentID) -> Option<ComponentDesc> {
        self.read().by_id.get(component_id as usize).cloned()
    }

    /// All registered components in id order.
    pub fn descriptions(&self) -> Vec<ComponentDesc> {
        self.read().by_id.clone()
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    /// Returns `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds the signature of a set of component names.
    pub fn signature_of_names<S: AsRef<str>>(&self, names: &[S]) -> StateResult<Signature> {
        let mut signature = Signature::default();
        for name in names {
            signature.set(self.require_id_of_name(name.as_ref())?);
        }
        Ok(signature)
    }

    /// Component names of `signature`, in id order.
    pub fn names_of_signature(&self, signature: &Signature) -> Vec<&'static str> {
        let tables = self.read();
        signature
            .iterate_over_components()
            .filter_map(|id| tables.by_id.get(id as usize).map(|desc| desc.name))
            .collect()
    }
}

/// A group of component values attached together when an entity is created.
///
/// Implemented for tuples of up to eight components. A single component is
/// written as a one-element tuple: `(Health { value: 10 },)`.
pub trait Bundle {
    /// Serializes every component of the bundle, paired with its name.
    fn into_components(self) -> StateResult<Vec<(&'static str, Value)>>;
}

macro_rules! impl_bundle_for_tuple {
    ($($name:ident),+) => {
        impl<$($name: Component),+> Bundle for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_components(self) -> StateResult<Vec<(&'static str, Value)>> {
                let ($($name,)+) = self;
                Ok(vec![$(($name::NAME, serde_json::to_value(&$name)?)),+])
            }
        }
    };
}

impl_bundle_for_tuple!(A);
impl_bundle_for_tuple!(A, B);
impl_bundle_for_tuple!(A, B, C);
impl_bundle_for_tuple!(A, B, C, D);
impl_bundle_for_tuple!(A, B, C, D, E);
impl_bundle_for_tuple!(A, B, C, D, E, F);
impl_bundle_for_tuple!(A, B, C, D, E, F, G);
impl_bundle_for_tuple!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Default, Serialize, Deserialize)]
    struct Health {
        value: i64,
    }
    impl Component for Health {
        const NAME: &'static str = "Health";
    }

    #[derive(Default, Serialize, Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {
        const NAME: &'static str = "Position";
    }

    #[derive(Default, Serialize, Deserialize)]
    struct FakeHealth;
    impl Component for FakeHealth {
        const NAME: &'static str = "Health";
    }

    #[test]
    fn register_assigns_sequential_ids() {
        let registry = ComponentRegistry::new();
        assert_eq!(registry.register::<Health>().unwrap(), 0);
        assert_eq!(registry.register::<Position>().unwrap(), 1);
        assert_eq!(registry.register::<Health>().unwrap(), 0);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.name_of(1), Some("Position"));
        assert_eq!(registry.require_id_of::<Position>().unwrap(), 1);
    }

    #[test]
    fn name_collision_between_types_is_rejected() {
        let registry = ComponentRegistry::new();
        registry.register::<Health>().unwrap();
        assert!(matches!(
            registry.register::<FakeHealth>(),
            Err(StateError::ComponentNameTaken(name)) if name == "Health"
        ));
        assert!(registry.require_id_of::<FakeHealth>().is_err());
    }

    #[test]
    fn frozen_registry_rejects_new_components() {
        let registry = ComponentRegistry::new();
        registry.register::<Health>().unwrap();
        registry.freeze();
        assert!(matches!(registry.register::<Position>(), Err(StateError::RegistrationLocked)));
        assert_eq!(registry.register::<Health>().unwrap(), 0);
    }

    #[test]
    fn signatures_round_trip_through_names() {
        let registry = ComponentRegistry::new();
        registry.register::<Health>().unwrap();
        registry.register::<Position>().unwrap();

        let signature = registry.signature_of_names(&["Position", "Health"]).unwrap();
        assert_eq!(registry.names_of_signature(&signature), vec!["Health", "Position"]);
        assert!(registry.signature_of_names(&["Mana"]).is_err());
    }

    #[test]
    fn bundle_serializes_each_component() {
        let components = (Health { value: 5 }, Position { x: 1.0, y: 2.0 })
            .into_components()
            .unwrap();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].0, "Health");
        assert_eq!(components[0].1["value"], 5);
        assert_eq!(components[1].1["y"], 2.0);
    }
}
