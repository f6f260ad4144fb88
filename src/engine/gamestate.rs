//! # Game state
//!
//! [`GameState`] owns all entity and component storage of a world. It exposes
//! two views:
//!
//! * the **finalized** view ([`FinalizedView`]): the state as of the last
//!   committed tick, read straight from the key/value store. Any number of query
//!   tasks may hold one concurrently; a commit waits for them and they wait for
//!   a commit, so no reader ever observes half of a tick.
//! * the **working** view ([`WorkingView`]): the entity command buffer the tick
//!   task mutates while applying a tick. Only one exists at a time.
//!
//! Both implement [`StateReader`], the read contract searches and typed
//! component access are written against.
//!
//! ## Lifecycle
//!
//! 1. Components are registered.
//! 2. [`GameState::init`] freezes the registry, loads the archetype table and
//!    reports the last finalized tick (`-1` for an empty store).
//! 3. Each tick mutates the working view, then [`GameState::commit`] persists it
//!    in one batch, or [`GameState::discard_pending`] throws it away.

use std::cell::{RefCell, RefMut};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;

use crate::engine::archetype::{ArchetypeIndex, ArchetypeLayout};
use crate::engine::component::{Bundle, Component, ComponentRegistry};
use crate::engine::ecb::EntityCommandBuffer;
use crate::engine::error::{StateError, StateResult};
use crate::engine::filter::ComponentFilter;
use crate::engine::storage::KvStore;
use crate::engine::types::{ArchetypeID, ComponentID, EntityID, TickHeight};

/// Storage keys of the persisted state.
pub mod keys {
    use crate::engine::types::{ArchetypeID, EntityID};

    /// Next unassigned entity id.
    pub const NEXT_ENTITY_ID: &str = "ECB:NEXT-ENTITY-ID";
    /// Archetype table (component-name lists indexed by archetype id).
    pub const ARCHETYPES: &str = "ECB:ARCHETYPES";
    /// Last finalized tick height.
    pub const END_TICK: &str = "ECB:END-TICK";

    /// Archetype id of an entity.
    pub fn entity_archetype(id: EntityID) -> String {
        format!("ECB:ARCHETYPE-ID:ENTITY-ID-{id}")
    }

    /// Member list of an archetype.
    pub fn active_entities(archetype: ArchetypeID) -> String {
        format!("ECB:ACTIVE-ENTITY-IDS:ARCHETYPE-ID-{archetype}")
    }

    /// JSON value of one component on one entity.
    pub fn component_value(component: &str, id: EntityID) -> String {
        format!("ECB:COMPONENT-VALUE:{component}:ENTITY-ID-{id}")
    }
}

pub(crate) fn decode_json<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(|err| StateError::Corrupt {
        key: key.to_string(),
        reason: err.to_string(),
    })
}

pub(crate) fn decode_number<T: FromStr>(key: &str, bytes: &[u8]) -> StateResult<T>
where
    T::Err: std::fmt::Display,
{
    let corrupt = |reason: String| StateError::Corrupt { key: key.to_string(), reason };
    let text = std::str::from_utf8(bytes).map_err(|err| corrupt(err.to_string()))?;
    text.trim().parse().map_err(|err: T::Err| corrupt(err.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Read contract
// ─────────────────────────────────────────────────────────────────────────────

/// Read access to a view of the game state.
pub trait StateReader {
    /// Registry the view resolves component names against.
    fn registry(&self) -> &ComponentRegistry;

    /// Raw JSON value of component `name` on `id`.
    fn component_raw(&self, name: &str, id: EntityID) -> StateResult<Value>;

    /// Names of the components attached to `id`.
    fn component_names(&self, id: EntityID) -> StateResult<Vec<&'static str>>;

    /// Member entities of `archetype`.
    fn entities_for_archetype(&self, archetype: ArchetypeID) -> StateResult<Vec<EntityID>>;

    /// Archetypes accepted by `filter`, ascending.
    fn find_archetypes(&self, filter: &ComponentFilter) -> StateResult<Vec<ArchetypeID>>;

    /// Number of known archetypes.
    fn archetype_count(&self) -> usize;
}

/// Typed helpers over any [`StateReader`].
pub trait ReaderExt: StateReader {
    /// Decodes component `T` of `id`.
    fn get_component<T: Component>(&self, id: EntityID) -> StateResult<T> {
        Ok(serde_json::from_value(self.component_raw(T::NAME, id)?)?)
    }

    /// Returns `true` if `id` exists.
    fn entity_exists(&self, id: EntityID) -> StateResult<bool> {
        match self.component_names(id) {
            Ok(_) => Ok(true),
            Err(StateError::EntityDoesNotExist(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Every component of `id`, keyed by name.
    fn all_components_raw(&self, id: EntityID) -> StateResult<BTreeMap<String, Value>> {
        self.component_names(id)?
            .into_iter()
            .map(|name| Ok((name.to_string(), self.component_raw(name, id)?)))
            .collect()
    }
}

impl<R: StateReader + ?Sized> ReaderExt for R {}

// ─────────────────────────────────────────────────────────────────────────────
// Finalized view
// ─────────────────────────────────────────────────────────────────────────────

/// Committed state, read directly from the store.
pub struct FinalizedState {
    store: Arc<dyn KvStore>,
    registry: Arc<ComponentRegistry>,
    archetypes: RwLock<ArchetypeIndex>,
}

impl FinalizedState {
    fn new(store: Arc<dyn KvStore>, registry: Arc<ComponentRegistry>) -> Self {
        Self { store, registry, archetypes: RwLock::new(ArchetypeIndex::new()) }
    }

    fn archetypes(&self) -> RwLockReadGuard<'_, ArchetypeIndex> {
        self.archetypes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn replace_archetypes(&self, index: ArchetypeIndex) {
        *self.archetypes.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = index;
    }

    fn load_archetypes(&self) -> StateResult<()> {
        let index = match self.store.get(keys::ARCHETYPES)? {
            Some(bytes) => {
                let layout: ArchetypeLayout = decode_json(keys::ARCHETYPES, &bytes)?;
                ArchetypeIndex::from_layout(&layout, &self.registry)?
            }
            None => ArchetypeIndex::new(),
        };
        self.replace_archetypes(index);
        Ok(())
    }

    fn last_finalized_tick(&self) -> StateResult<TickHeight> {
        match self.store.get(keys::END_TICK)? {
            Some(bytes) => decode_number(keys::END_TICK, &bytes),
            None => Ok(-1),
        }
    }

    fn archetype_of(&self, id: EntityID) -> StateResult<ArchetypeID> {
        let key = keys::entity_archetype(id);
        match self.store.get(&key)? {
            Some(bytes) => decode_number(&key, &bytes),
            None => Err(StateError::EntityDoesNotExist(id)),
        }
    }

    fn component_ids(&self, id: EntityID) -> StateResult<Vec<ComponentID>> {
        let archetype = self.archetype_of(id)?;
        let archetypes = self.archetypes();
        Ok(archetypes.signature(archetype)?.iterate_over_components().collect())
    }
}

/// Read-locked handle on the finalized state.
pub struct FinalizedView<'a> {
    _commit_guard: RwLockReadGuard<'a, ()>,
    state: &'a FinalizedState,
}

impl FinalizedView<'_> {
    /// Height of the last committed tick, `-1` if none.
    pub fn last_finalized_tick(&self) -> StateResult<TickHeight> {
        self.state.last_finalized_tick()
    }
}

impl StateReader for FinalizedView<'_> {
    fn registry(&self) -> &ComponentRegistry {
        &self.state.registry
    }

    fn component_raw(&self, name: &str, id: EntityID) -> StateResult<Value> {
        let component = self.state.registry.require_id_of_name(name)?;
        if !self.state.component_ids(id)?.contains(&component) {
            return Err(StateError::ComponentNotOnEntity { component: name.to_string(), entity: id });
        }

        let key = keys::component_value(name, id);
        match self.state.store.get(&key)? {
            Some(bytes) => decode_json(&key, &bytes),
            None => Err(StateError::ComponentNotOnEntity { component: name.to_string(), entity: id }),
        }
    }

    fn component_names(&self, id: EntityID) -> StateResult<Vec<&'static str>> {
        let ids = self.state.component_ids(id)?;
        Ok(ids.into_iter().filter_map(|c| self.state.registry.name_of(c)).collect())
    }

    fn entities_for_archetype(&self, archetype: ArchetypeID) -> StateResult<Vec<EntityID>> {
        self.state.archetypes().signature(archetype)?;
        let key = keys::active_entities(archetype);
        match self.state.store.get(&key)? {
            Some(bytes) => decode_json(&key, &bytes),
            None => Ok(Vec::new()),
        }
    }

    fn find_archetypes(&self, filter: &ComponentFilter) -> StateResult<Vec<ArchetypeID>> {
        let compiled = filter.compile(&self.state.registry)?;
        Ok(self.state.archetypes().find(&compiled))
    }

    fn archetype_count(&self) -> usize {
        self.state.archetypes().len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Working view
// ─────────────────────────────────────────────────────────────────────────────

/// Exclusive handle on the entity command buffer.
///
/// Reads and writes take `&self`, so a search can run while its callback
/// mutates the state. The buffer is borrowed only for the duration of each
/// call.
pub struct WorkingView<'a> {
    ecb: RefCell<MutexGuard<'a, EntityCommandBuffer>>,
    registry: Arc<ComponentRegistry>,
}

impl<'a> WorkingView<'a> {
    fn ecb(&self) -> RefMut<'_, MutexGuard<'a, EntityCommandBuffer>> {
        self.ecb.borrow_mut()
    }

    /// Creates one entity from `bundle`.
    pub fn create<B: Bundle>(&self, bundle: B) -> StateResult<EntityID> {
        let ids = self.create_many(1, bundle)?;
        ids.first().copied().ok_or(StateError::EntityMustHaveAtLeastOneComponent)
    }

    /// Creates `count` entities, each with a copy of `bundle`.
    pub fn create_many<B: Bundle>(&self, count: usize, bundle: B) -> StateResult<Vec<EntityID>> {
        let components = bundle.into_components()?;
        self.ecb().create_many(count, &components)
    }

    /// Overwrites component `T` of `id`.
    pub fn set_component<T: Component>(&self, id: EntityID, value: &T) -> StateResult<()> {
        self.registry.require_id_of::<T>()?;
        self.ecb().set_component_raw(T::NAME, id, serde_json::to_value(value)?)
    }

    /// Reads component `T` of `id`, applies `update` and writes it back.
    pub fn update_component<T, F>(&self, id: EntityID, update: F) -> StateResult<()>
    where
        T: Component,
        F: FnOnce(&mut T),
    {
        let mut value: T = self.get_component(id)?;
        update(&mut value);
        self.set_component(id, &value)
    }

    /// Attaches component `T` to `id`.
    pub fn add_component<T: Component>(&self, id: EntityID, value: &T) -> StateResult<()> {
        self.registry.require_id_of::<T>()?;
        self.ecb().add_component_raw(T::NAME, id, serde_json::to_value(value)?)
    }

    /// Detaches component `T` from `id`.
    pub fn remove_component<T: Component>(&self, id: EntityID) -> StateResult<()> {
        self.registry.require_id_of::<T>()?;
        self.ecb().remove_component(T::NAME, id)
    }

    /// Removes `id` and all of its components.
    pub fn remove_entity(&self, id: EntityID) -> StateResult<()> {
        self.ecb().remove_entity(id)
    }
}

impl StateReader for WorkingView<'_> {
    fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    fn component_raw(&self, name: &str, id: EntityID) -> StateResult<Value> {
        self.ecb().component_raw(name, id)
    }

    fn component_names(&self, id: EntityID) -> StateResult<Vec<&'static str>> {
        let signature = self.ecb().signature_of(id)?;
        Ok(self.registry.names_of_signature(&signature))
    }

    fn entities_for_archetype(&self, archetype: ArchetypeID) -> StateResult<Vec<EntityID>> {
        self.ecb().entities_for_archetype(archetype)
    }

    fn find_archetypes(&self, filter: &ComponentFilter) -> StateResult<Vec<ArchetypeID>> {
        let compiled = filter.compile(&self.registry)?;
        self.ecb().find_archetypes(&compiled)
    }

    fn archetype_count(&self) -> usize {
        self.ecb().archetypes().len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Game state
// ─────────────────────────────────────────────────────────────────────────────

/// Owner of all entity/component storage of one world.
pub struct GameState {
    registry: Arc<ComponentRegistry>,
    finalized: FinalizedState,
    working: Mutex<EntityCommandBuffer>,
    commit_lock: RwLock<()>,
    initialized: AtomicBool,
}

impl GameState {
    /// Creates a game state persisted in `store`.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let registry = Arc::new(ComponentRegistry::new());
        Self {
            finalized: FinalizedState::new(Arc::clone(&store), Arc::clone(&registry)),
            working: Mutex::new(EntityCommandBuffer::new(store, Arc::clone(&registry))),
            registry,
            commit_lock: RwLock::new(()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Registers component `T`. Rejected after [`init`](Self::init).
    pub fn register_component<T: Component>(&self) -> StateResult<ComponentID> {
        if self.is_initialized() {
            return Err(StateError::RegistrationLocked);
        }
        self.registry.register::<T>()
    }

    /// The component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Returns `true` once [`init`](Self::init) succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Freezes the registry and loads persisted state.
    ///
    /// Returns the last finalized tick height, `-1` for an empty store.
    pub fn init(&self) -> StateResult<TickHeight> {
        if self.is_initialized() {
            return Err(StateError::AlreadyInitialized);
        }
        self.registry.freeze();

        let _commit_guard = self.commit_lock.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.finalized.load_archetypes()?;
        self.lock_working().load()?;
        let last_finalized = self.finalized.last_finalized_tick()?;

        self.initialized.store(true, Ordering::Release);
        info!(
            components = self.registry.len(),
            archetypes = self.finalized.archetypes().len(),
            last_finalized,
            "game state initialized"
        );
        Ok(last_finalized)
    }

    fn lock_working(&self) -> MutexGuard<'_, EntityCommandBuffer> {
        self.working.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read handle on the finalized state.
    pub fn finalized(&self) -> FinalizedView<'_> {
        FinalizedView {
            _commit_guard: self.commit_lock.read().unwrap_or_else(|poisoned| poisoned.into_inner()),
            state: &self.finalized,
        }
    }

    /// Exclusive handle on the working state.
    pub fn working(&self) -> WorkingView<'_> {
        WorkingView { ecb: RefCell::new(self.lock_working()), registry: Arc::clone(&self.registry) }
    }

    /// Height of the last committed tick, `-1` if none.
    pub fn last_finalized_tick(&self) -> StateResult<TickHeight> {
        self.finalized().last_finalized_tick()
    }

    /// Persists pending changes as tick `tick`.
    pub fn commit(&self, tick: TickHeight) -> StateResult<()> {
        if !self.is_initialized() {
            return Err(StateError::NotInitialized);
        }
        let _commit_guard = self.commit_lock.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut ecb = self.lock_working();
        ecb.commit(tick)?;
        self.finalized.replace_archetypes(ecb.archetypes().clone());
        Ok(())
    }

    /// Drops pending changes.
    pub fn discard_pending(&self) {
        self.lock_working().discard_pending();
    }
}
