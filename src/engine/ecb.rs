//! # Entity command buffer
//!
//! The working view of the game state. During a tick every entity and component
//! operation lands here: reads fall through to the key/value store and are
//! cached, writes stay pending in memory. Nothing reaches the store until
//! [`EntityCommandBuffer::commit`] packages the pending changes into a single
//! batch.
//!
//! ## Pending state
//!
//! * New archetypes are appended to the in-memory [`ArchetypeIndex`]; the
//!   persisted layout is rewritten only when it grew.
//! * `entity_archetypes` caches the archetype of every entity touched this tick.
//!   `None` records a removal.
//! * Component values are cached as JSON. `dirty_values` and `deleted_values`
//!   track which cached keys must be written or deleted on commit.
//!
//! [`EntityCommandBuffer::discard_pending`] drops all of it, after which reads
//! return exactly the committed data again.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::engine::archetype::{ActiveEntities, ArchetypeIndex, ArchetypeLayout};
use crate::engine::component::ComponentRegistry;
use crate::engine::error::{StateError, StateResult};
use crate::engine::filter::CompiledFilter;
use crate::engine::gamestate::{decode_json, decode_number, keys};
use crate::engine::storage::KvStore;
use crate::engine::types::{ArchetypeID, ComponentID, EntityID, Signature, TickHeight};

type ValueKey = (ComponentID, EntityID);

/// Pending, in-memory changes layered over the committed state.
pub struct EntityCommandBuffer {
    store: Arc<dyn KvStore>,
    registry: Arc<ComponentRegistry>,
    loaded: bool,

    archetypes: ArchetypeIndex,
    committed_archetypes: usize,

    next_entity_id: EntityID,
    committed_next_entity_id: EntityID,

    entity_archetypes: HashMap<EntityID, Option<ArchetypeID>>,
    dirty_entities: BTreeSet<EntityID>,

    active: HashMap<ArchetypeID, ActiveEntities>,

    values: HashMap<ValueKey, Value>,
    dirty_values: BTreeSet<ValueKey>,
    deleted_values: BTreeSet<ValueKey>,
}

impl EntityCommandBuffer {
    /// Creates an empty buffer over `store`. Call [`load`](Self::load) before use.
    pub fn new(store: Arc<dyn KvStore>, registry: Arc<ComponentRegistry>) -> Self {
        Self {
            store,
            registry,
            loaded: false,
            archetypes: ArchetypeIndex::new(),
            committed_archetypes: 0,
            next_entity_id: 0,
            committed_next_entity_id: 0,
            entity_archetypes: HashMap::new(),
            dirty_entities: BTreeSet::new(),
            active: HashMap::new(),
            values: HashMap::new(),
            dirty_values: BTreeSet::new(),
            deleted_values: BTreeSet::new(),
        }
    }

    /// Loads the archetype table and the entity id counter from storage.
    pub fn load(&mut self) -> StateResult<()> {
        if self.loaded {
            return Err(StateError::AlreadyInitialized);
        }

        self.archetypes = match self.store.get(keys::ARCHETYPES)? {
            Some(bytes) => {
                let layout: ArchetypeLayout = decode_json(keys::ARCHETYPES, &bytes)?;
                ArchetypeIndex::from_layout(&layout, &self.registry)?
            }
            None => ArchetypeIndex::new(),
        };
        self.committed_archetypes = self.archetypes.len();

        self.next_entity_id = match self.store.get(keys::NEXT_ENTITY_ID)? {
            Some(bytes) => decode_number(keys::NEXT_ENTITY_ID, &bytes)?,
            None => 0,
        };
        self.committed_next_entity_id = self.next_entity_id;

        self.loaded = true;
        Ok(())
    }

    fn ensure_loaded(&self) -> StateResult<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(StateError::NotInitialized)
        }
    }

    /// The component registry this buffer resolves names against.
    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// Archetype table including archetypes created this tick.
    pub fn archetypes(&self) -> &ArchetypeIndex {
        &self.archetypes
    }

    /// Returns `true` if anything is pending.
    pub fn has_pending(&self) -> bool {
        self.archetypes.len() != self.committed_archetypes
            || self.next_entity_id != self.committed_next_entity_id
            || !self.dirty_entities.is_empty()
            || !self.dirty_values.is_empty()
            || !self.deleted_values.is_empty()
            || self.active.values().any(|active| active.modified)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// Archetype of `id`, or `EntityDoesNotExist`.
    pub fn archetype_of(&mut self, id: EntityID) -> StateResult<ArchetypeID> {
        self.ensure_loaded()?;
        if let Some(cached) = self.entity_archetypes.get(&id) {
            return cached.ok_or(StateError::EntityDoesNotExist(id));
        }

        let key = keys::entity_archetype(id);
        let archetype = match self.store.get(&key)? {
            Some(bytes) => decode_number::<ArchetypeID>(&key, &bytes)?,
            None => return Err(StateError::EntityDoesNotExist(id)),
        };
        self.entity_archetypes.insert(id, Some(archetype));
        Ok(archetype)
    }

    /// Component signature of `id`.
    pub fn signature_of(&mut self, id: EntityID) -> StateResult<Signature> {
        let archetype = self.archetype_of(id)?;
        self.archetypes.signature(archetype).copied()
    }

    /// Raw JSON value of component `name` on `id`.
    pub fn component_raw(&mut self, name: &str, id: EntityID) -> StateResult<Value> {
        let component = self.registry.require_id_of_name(name)?;
        let signature = self.signature_of(id)?;
        if !signature.has(component) {
            return Err(StateError::ComponentNotOnEntity { component: name.to_string(), entity: id });
        }

        if let Some(value) = self.values.get(&(component, id)) {
            return Ok(value.clone());
        }

        let key = keys::component_value(name, id);
        let value: Value = match self.store.get(&key)? {
            Some(bytes) => decode_json(&key, &bytes)?,
            None => {
                return Err(StateError::ComponentNotOnEntity { component: name.to_string(), entity: id })
            }
        };
        self.values.insert((component, id), value.clone());
        Ok(value)
    }

    /// Member entities of `archetype`, in storage order.
    pub fn entities_for_archetype(&mut self, archetype: ArchetypeID) -> StateResult<Vec<EntityID>> {
        self.ensure_loaded()?;
        Ok(self.active_mut(archetype)?.ids.clone())
    }

    /// Archetypes accepted by `filter`.
    pub fn find_archetypes(&self, filter: &CompiledFilter) -> StateResult<Vec<ArchetypeID>> {
        self.ensure_loaded()?;
        Ok(self.archetypes.find(filter))
    }

    fn active_mut(&mut self, archetype: ArchetypeID) -> StateResult<&mut ActiveEntities> {
        self.archetypes.signature(archetype)?;
        if !self.active.contains_key(&archetype) {
            let key = keys::active_entities(archetype);
            let loaded = match self.store.get(&key)? {
                Some(bytes) => ActiveEntities::loaded(decode_json(&key, &bytes)?),
                None => ActiveEntities::default(),
            };
            self.active.insert(archetype, loaded);
        }
        self.active
            .get_mut(&archetype)
            .ok_or(StateError::ArchetypeNotFound(archetype))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────

    /// Creates `count` entities carrying the given component values.
    pub fn create_many(
        &mut self,
        count: usize,
        components: &[(&'static str, Value)],
    ) -> StateResult<Vec<EntityID>> {
        self.ensure_loaded()?;
        if components.is_empty() {
            return Err(StateError::EntityMustHaveAtLeastOneComponent);
        }

        let mut signature = Signature::default();
        let mut resolved = Vec::with_capacity(components.len());
        for (name, value) in components {
            let component = self.registry.require_id_of_name(name)?;
            if signature.has(component) {
                return Err(StateError::DuplicateComponent(name.to_string()));
            }
            signature.set(component);
            resolved.push((component, value));
        }

        let (archetype, created) = self.archetypes.get_or_insert(signature);
        if created {
            debug!(archetype, components = ?self.registry.names_of_signature(&signature), "new archetype");
        }

        let first = self.next_entity_id;
        self.next_entity_id += count as EntityID;
        let ids: Vec<EntityID> = (first..self.next_entity_id).collect();

        let active = self.active_mut(archetype)?;
        for &id in &ids {
            active.push(id);
        }

        for &id in &ids {
            self.entity_archetypes.insert(id, Some(archetype));
            self.dirty_entities.insert(id);
            for (component, value) in &resolved {
                self.write_value((*component, id), (*value).clone());
            }
        }

        Ok(ids)
    }

    /// Overwrites the value of a component already on `id`.
    pub fn set_component_raw(&mut self, name: &str, id: EntityID, value: Value) -> StateResult<()> {
        let component = self.registry.require_id_of_name(name)?;
        let signature = self.signature_of(id)?;
        if !signature.has(component) {
            return Err(StateError::ComponentNotOnEntity { component: name.to_string(), entity: id });
        }
        self.write_value((component, id), value);
        Ok(())
    }

    /// Attaches a new component to `id`, moving it to the matching archetype.
    pub fn add_component_raw(&mut self, name: &str, id: EntityID, value: Value) -> StateResult<()> {
        let component = self.registry.require_id_of_name(name)?;
        let from = self.archetype_of(id)?;
        let mut signature = *self.archetypes.signature(from)?;
        if signature.has(component) {
            return Err(StateError::ComponentAlreadyOnEntity { component: name.to_string(), entity: id });
        }

        signature.set(component);
        let (to, _) = self.archetypes.get_or_insert(signature);
        self.move_entity(id, from, to)?;
        self.write_value((component, id), value);
        Ok(())
    }

    /// Detaches a component from `id`. The last component cannot be removed.
    pub fn remove_component(&mut self, name: &str, id: EntityID) -> StateResult<()> {
        let component = self.registry.require_id_of_name(name)?;
        let from = self.archetype_of(id)?;
        let mut signature = *self.archetypes.signature(from)?;
        if !signature.has(component) {
            return Err(StateError::ComponentNotOnEntity { component: name.to_string(), entity: id });
        }

        signature.clear(component);
        if signature.is_empty() {
            return Err(StateError::EntityMustHaveAtLeastOneComponent);
        }

        let (to, _) = self.archetypes.get_or_insert(signature);
        self.move_entity(id, from, to)?;
        self.delete_value((component, id));
        Ok(())
    }

    /// Removes `id` and every component value attached to it.
    pub fn remove_entity(&mut self, id: EntityID) -> StateResult<()> {
        let archetype = self.archetype_of(id)?;
        let signature = *self.archetypes.signature(archetype)?;

        self.active_mut(archetype)?.swap_remove(id)?;
        self.entity_archetypes.insert(id, None);
        self.dirty_entities.insert(id);

        for component in signature.iterate_over_components() {
            self.delete_value((component, id));
        }
        Ok(())
    }

    fn move_entity(&mut self, id: EntityID, from: ArchetypeID, to: ArchetypeID) -> StateResult<()> {
        self.active_mut(from)?.swap_remove(id)?;
        self.active_mut(to)?.push(id);
        self.entity_archetypes.insert(id, Some(to));
        self.dirty_entities.insert(id);
        Ok(())
    }

    fn write_value(&mut self, key: ValueKey, value: Value) {
        self.values.insert(key, value);
        self.deleted_values.remove(&key);
        self.dirty_values.insert(key);
    }

    fn delete_value(&mut self, key: ValueKey) {
        self.values.remove(&key);
        self.dirty_values.remove(&key);
        self.deleted_values.insert(key);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Commit / discard
    // ─────────────────────────────────────────────────────────────────────

    /// Drops every pending change.
    pub fn discard_pending(&mut self) {
        self.archetypes.truncate(self.committed_archetypes);
        self.next_entity_id = self.committed_next_entity_id;
        self.entity_archetypes.clear();
        self.dirty_entities.clear();
        self.active.clear();
        self.values.clear();
        self.dirty_values.clear();
        self.deleted_values.clear();
    }

    /// Writes every pending change and the finalized tick height in one batch.
    ///
    /// On error nothing is written and the pending changes are kept; callers
    /// decide whether to retry or discard.
    pub fn commit(&mut self, tick: TickHeight) -> StateResult<()> {
        self.ensure_loaded()?;

        let mut writes: BTreeMap<String, Option<Vec<u8>>> = BTreeMap::new();

        if self.archetypes.len() != self.committed_archetypes {
            let layout = self.archetypes.to_layout(&self.registry);
            writes.insert(keys::ARCHETYPES.to_string(), Some(serde_json::to_vec(&layout)?));
        }

        if self.next_entity_id != self.committed_next_entity_id {
            writes.insert(
                keys::NEXT_ENTITY_ID.to_string(),
                Some(self.next_entity_id.to_string().into_bytes()),
            );
        }

        for id in &self.dirty_entities {
            let staged = self
                .entity_archetypes
                .get(id)
                .copied()
                .flatten()
                .map(|archetype| archetype.to_string().into_bytes());
            writes.insert(keys::entity_archetype(*id), staged);
        }

        for (archetype, active) in &self.active {
            if active.modified {
                writes.insert(keys::active_entities(*archetype), Some(serde_json::to_vec(&active.ids)?));
            }
        }

        for (component, id) in &self.deleted_values {
            writes.insert(self.value_key(*component, *id)?, None);
        }
        for key in &self.dirty_values {
            let (component, id) = *key;
            let value = self.values.get(key).ok_or_else(|| StateError::Corrupt {
                key: format!("{component}:{id}"),
                reason: "dirty component value missing from cache".into(),
            })?;
            writes.insert(self.value_key(component, id)?, Some(serde_json::to_vec(value)?));
        }

        writes.insert(keys::END_TICK.to_string(), Some(tick.to_string().into_bytes()));

        let write_count = writes.len();
        let mut batch = self.store.batch();
        for (key, staged) in writes {
            let staged_result = match staged {
                Some(bytes) => batch.set(&key, bytes),
                None => batch.delete(&key),
            };
            if let Err(err) = staged_result {
                batch.discard();
                return Err(err.into());
            }
        }
        batch.commit()?;

        self.committed_archetypes = self.archetypes.len();
        self.committed_next_entity_id = self.next_entity_id;
        self.dirty_entities.clear();
        self.dirty_values.clear();
        self.deleted_values.clear();
        for active in self.active.values_mut() {
            active.modified = false;
        }

        debug!(tick, writes = write_count, "state committed");
        Ok(())
    }

    fn value_key(&self, component: ComponentID, id: EntityID) -> StateResult<String> {
        let name = self
            .registry
            .name_of(component)
            .ok_or_else(|| StateError::ComponentNotRegistered(component.to_string()))?;
        Ok(keys::component_value(name, id))
    }
}
