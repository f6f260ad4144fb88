//! # World
//!
//! The [`World`] orchestrates one game shard. It owns the game state, the
//! message/query/system registrations, the transaction pool, the persona index
//! and the receipt cache, and it applies ticks.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized --init--> Initialized --first tick--> Ticking --stop--> Stopped
//! ```
//!
//! Registration takes `&mut self` and is only possible while uninitialized.
//! After [`World::init`] the world is typically shared behind an `Arc`: any
//! number of tasks submit transactions and run queries while a single tick
//! task calls [`World::tick`] (or the prepare/apply/commit steps).
//!
//! ## Tick pipeline
//!
//! 1. [`World::prepare_tick`] swaps the pool out for a [`Proposal`]; a
//!    transaction accepted afterwards lands in the next tick.
//! 2. [`World::apply_tick`] runs init systems (tick 0 only) and then every
//!    system in registration order against a [`WorldContext`]. A system error
//!    aborts the tick and discards its pending changes.
//! 3. [`World::commit_tick`] persists the changes, publishes staged persona
//!    claims, caches receipts and advances the last finalized tick.

pub mod context;
pub mod error;
pub mod message;
pub mod persona;
pub mod query;
pub mod tick;
pub mod tx;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, info};

use crate::config::WorldConfig;
use crate::engine::component::Component;
use crate::engine::gamestate::{GameState, ReaderExt};
use crate::engine::schema::Describe;
use crate::engine::storage::{KvStore, MemoryStore};
use crate::engine::systems::{FnSystem, System, SystemList};
use crate::engine::types::{ComponentID, EntityID, SystemID, TickHeight, Timestamp};
use crate::plugin::Plugin;
use crate::telemetry::collector::{Collector, TickSpan};

use self::context::{ReadOnlyContext, WorldContext};
use self::error::{SystemError, WorldError, WorldResult};
use self::message::{Message, MessageRegistry};
use self::persona::{CreatePersona, Persona, PersonaManager};
use self::query::{describe_endpoints, EndpointDesc, QueryRegistry};
use self::tick::{now_millis, Proposal, Receipt, ReceiptCache, Tick};
use self::tx::{SignedTransaction, TxData, TxMap, TxPool};

/// Lifecycle stage of a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Accepting registrations.
    Uninitialized,
    /// Initialized, no tick applied yet by this process.
    Initialized,
    /// Applying ticks.
    Ticking,
    /// Stopped; terminal.
    Stopped,
}

/// Orchestrator of one game shard.
pub struct World {
    config: WorldConfig,
    state: GameState,
    messages: MessageRegistry,
    queries: QueryRegistry,
    init_systems: SystemList,
    systems: SystemList,
    pool: Mutex<TxPool>,
    personas: PersonaManager,
    receipts: Mutex<ReceiptCache>,
    stage: Mutex<Stage>,
    last_finalized: AtomicI64,
}

impl World {
    /// Creates a world over an in-memory store.
    pub fn new(config: WorldConfig) -> WorldResult<Self> {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Creates a world over `store`, with the persona subsystem registered.
    pub fn with_store(config: WorldConfig, store: Arc<dyn KvStore>) -> WorldResult<Self> {
        config.validate()?;
        let receipts = ReceiptCache::new(config.receipt_cache_size);
        let mut world = Self {
            config,
            state: GameState::new(store),
            messages: MessageRegistry::new(),
            queries: QueryRegistry::new(),
            init_systems: SystemList::new(),
            systems: SystemList::new(),
            pool: Mutex::new(TxPool::new()),
            personas: PersonaManager::new(),
            receipts: Mutex::new(receipts),
            stage: Mutex::new(Stage::Uninitialized),
            last_finalized: AtomicI64::new(-1),
        };
        persona::register(&mut world)?;
        Ok(world)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    /// Configuration the world was created with.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Namespace transactions must be signed for.
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Game state.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Registered messages.
    pub fn messages(&self) -> &MessageRegistry {
        &self.messages
    }

    /// Registered queries.
    pub fn queries(&self) -> &QueryRegistry {
        &self.queries
    }

    pub(crate) fn personas(&self) -> &PersonaManager {
        &self.personas
    }

    /// Current lifecycle stage.
    pub fn stage(&self) -> Stage {
        *self.lock_stage()
    }

    fn lock_stage(&self) -> MutexGuard<'_, Stage> {
        self.stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_pool(&self) -> MutexGuard<'_, TxPool> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_receipts(&self) -> MutexGuard<'_, ReceiptCache> {
        self.receipts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Height of the last committed tick, `-1` before the first commit.
    pub fn last_finalized_tick(&self) -> TickHeight {
        self.last_finalized.load(Ordering::Acquire)
    }

    /// Number of transactions waiting for the next tick.
    pub fn pending_transactions(&self) -> usize {
        self.lock_pool().len()
    }

    /// Discovery records of every message and query.
    pub fn endpoints(&self) -> Vec<EndpointDesc> {
        describe_endpoints(&self.messages, &self.queries)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────

    fn ensure_registering(&self) -> WorldResult<()> {
        match self.stage() {
            Stage::Uninitialized => Ok(()),
            _ => Err(WorldError::RegistrationClosed),
        }
    }

    /// Registers component `T`.
    pub fn register_component<T: Component>(&mut self) -> WorldResult<ComponentID> {
        self.ensure_registering()?;
        Ok(self.state.register_component::<T>()?)
    }

    /// Registers message type `M`.
    pub fn register_message<M: Message>(&mut self) -> WorldResult<()> {
        self.ensure_registering()?;
        self.messages.register::<M>()
    }

    /// Registers a query handler under `[group.]name`.
    pub fn register_query<Req, Rep, F>(&mut self, name: &str, handler: F) -> WorldResult<()>
    where
        Req: Describe + serde::de::DeserializeOwned + 'static,
        Rep: Describe + serde::Serialize + 'static,
        F: Fn(&ReadOnlyContext<'_>, Req) -> Result<Rep, SystemError> + Send + Sync + 'static,
    {
        self.ensure_registering()?;
        self.queries.register::<Req, Rep, F>(name, handler)
    }

    /// Registers a system run every tick, after all previously registered ones.
    pub fn register_system<F>(&mut self, name: &str, f: F) -> WorldResult<SystemID>
    where
        F: Fn(&WorldContext<'_>) -> Result<(), SystemError> + Send + Sync + 'static,
    {
        self.add_system(Box::new(FnSystem::new(name, f)))
    }

    /// Registers a boxed system run every tick.
    pub fn add_system(&mut self, system: Box<dyn System>) -> WorldResult<SystemID> {
        self.ensure_registering()?;
        if self.systems.contains(system.name()) || self.init_systems.contains(system.name()) {
            return Err(WorldError::DuplicateSystem(system.name().to_string()));
        }
        Ok(self.systems.push(system))
    }

    /// Registers a system run once, before the regular systems of tick 0.
    pub fn register_init_system<F>(&mut self, name: &str, f: F) -> WorldResult<SystemID>
    where
        F: Fn(&WorldContext<'_>) -> Result<(), SystemError> + Send + Sync + 'static,
    {
        self.ensure_registering()?;
        if self.systems.contains(name) || self.init_systems.contains(name) {
            return Err(WorldError::DuplicateSystem(name.to_string()));
        }
        Ok(self.init_systems.push(Box::new(FnSystem::new(name, f))))
    }

    /// Lets `plugin` register its components, messages, queries and systems.
    pub fn register_plugin<P: Plugin>(&mut self, plugin: &P) -> WorldResult<()> {
        self.ensure_registering()?;
        plugin.register(self)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Loads persisted state and rebuilds the persona index.
    pub fn init(&self) -> WorldResult<()> {
        let mut stage = self.lock_stage();
        match *stage {
            Stage::Uninitialized => {}
            Stage::Stopped => return Err(WorldError::Stopped),
            _ => return Err(WorldError::AlreadyInitialized),
        }

        let last_finalized = self.state.init()?;
        self.personas.init(&self.state.finalized())?;
        self.last_finalized.store(last_finalized, Ordering::Release);
        *stage = Stage::Initialized;

        info!(
            namespace = %self.config.namespace,
            last_finalized,
            messages = self.messages.len(),
            queries = self.queries.len(),
            systems = self.systems.len(),
            "world initialized"
        );
        Ok(())
    }

    /// Moves the world to the terminal `Stopped` stage.
    pub fn stop(&self) {
        *self.lock_stage() = Stage::Stopped;
        info!(last_finalized = self.last_finalized_tick(), "world stopped");
    }

    fn ensure_running(&self) -> WorldResult<()> {
        match self.stage() {
            Stage::Initialized | Stage::Ticking => Ok(()),
            Stage::Uninitialized => Err(WorldError::NotInitialized),
            Stage::Stopped => Err(WorldError::Stopped),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────

    /// Decodes `tx` as message `message` without validating it.
    pub fn decode_transaction(&self, message: &str, tx: SignedTransaction) -> WorldResult<TxData> {
        let msg = self.messages.get(message)?.decode(&tx.body)?;
        Ok(TxData { hash: tx.hash.clone(), msg, tx: Arc::new(tx) })
    }

    fn validate_transaction(&self, message: &str, tx: &SignedTransaction) -> WorldResult<()> {
        if tx.namespace != self.config.namespace {
            return Err(WorldError::NamespaceMismatch {
                expected: self.config.namespace.clone(),
                actual: tx.namespace.clone(),
            });
        }
        tx.verify(tx.signer())?;

        if message == CreatePersona::NAME {
            return Ok(());
        }
        if tx.persona_tag.is_empty() {
            return Err(WorldError::MissingPersonaTag);
        }
        let view = self.state.finalized();
        let (_, persona) = self
            .personas
            .get_committed(&view, &tx.persona_tag)?
            .ok_or_else(|| WorldError::PersonaNotFound(tx.persona_tag.clone()))?;
        if !persona.allows(tx.signer()) {
            return Err(WorldError::SignerNotAuthorized {
                persona_tag: tx.persona_tag.clone(),
                signer: tx.signer().to_string(),
            });
        }
        Ok(())
    }

    /// Validates `tx` and queues it for the next tick. Returns its hash.
    pub fn add_transaction(&self, message: &str, tx: SignedTransaction) -> WorldResult<String> {
        if self.stage() == Stage::Stopped {
            return Err(WorldError::Stopped);
        }

        let checked = self.messages.get(message).map(|_| ()).and_then(|_| {
            if self.config.verify_signatures {
                self.validate_transaction(message, &tx)
            } else {
                Ok(())
            }
        });
        if let Err(err) = checked {
            debug!(message, tx = %tx.hash, error = %err, "transaction rejected");
            return Err(err);
        }

        let data = self.decode_transaction(message, tx).inspect_err(|err| {
            debug!(message, error = %err, "transaction rejected");
        })?;
        let hash = data.hash.clone();
        self.lock_pool().push(message, data);
        Ok(hash)
    }

    pub(crate) fn persona_claim_pending(&self, tag: &str) -> bool {
        let tag = tag.to_lowercase();
        self.lock_pool()
            .for_message(CreatePersona::NAME)
            .iter()
            .filter_map(|data| data.msg.downcast_ref::<CreatePersona>())
            .any(|claim| claim.persona_tag.to_lowercase() == tag)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries and receipts
    // ─────────────────────────────────────────────────────────────────────

    /// Runs query `group.name` against the finalized state.
    pub fn handle_query(&self, group: &str, name: &str, request: &[u8]) -> WorldResult<Vec<u8>> {
        let query = self.queries.get(group, name)?;
        let ctx = ReadOnlyContext::new(self);
        query.handle(&ctx, request)
    }

    /// Read-only context over the finalized state.
    pub fn read_only(&self) -> ReadOnlyContext<'_> {
        ReadOnlyContext::new(self)
    }

    /// Cached receipt of transaction `hash`.
    pub fn receipt(&self, hash: &str) -> WorldResult<Receipt> {
        self.lock_receipts()
            .get(hash)
            .cloned()
            .ok_or_else(|| WorldError::ReceiptNotFound(hash.to_string()))
    }

    /// Cached receipts of `hashes`; unknown hashes are left out.
    pub fn receipts(&self, hashes: &[&str]) -> BTreeMap<String, Receipt> {
        let cache = self.lock_receipts();
        hashes
            .iter()
            .filter_map(|hash| cache.get(hash).map(|receipt| (hash.to_string(), receipt.clone())))
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tick pipeline
    // ─────────────────────────────────────────────────────────────────────

    /// Swaps the transaction pool out for the next tick's proposal.
    pub fn prepare_tick(&self) -> WorldResult<Proposal> {
        self.ensure_running()?;
        let txs = self.lock_pool().take();
        Ok(Proposal { tick: self.last_finalized_tick() + 1, timestamp: now_millis(), txs })
    }

    /// Builds a proposal for a tick received from a sequencer.
    pub fn prepare_sync_tick(&self, tick: TickHeight, timestamp: Timestamp, txs: TxMap) -> Proposal {
        Proposal { tick, timestamp, txs }
    }

    /// Applies `proposal` without committing it.
    pub fn apply_tick(&self, proposal: Proposal) -> WorldResult<Tick> {
        self.apply_tick_with(proposal, None)
    }

    /// Applies `proposal`, recording one telemetry span per system.
    ///
    /// Changes left by an earlier apply that was never committed are dropped
    /// first, so every apply starts from the finalized state.
    pub fn apply_tick_with(&self, proposal: Proposal, mut telemetry: Option<&mut Collector>) -> WorldResult<Tick> {
        self.ensure_running()?;
        let expected = self.last_finalized_tick() + 1;
        if proposal.tick != expected {
            return Err(WorldError::TickOutOfOrder {
                last_finalized: self.last_finalized_tick(),
                actual: proposal.tick,
            });
        }
        *self.lock_stage() = Stage::Ticking;
        self.state.discard_pending();
        self.personas.discard_staged();

        if let Some(collector) = telemetry.as_deref_mut() {
            collector.start_tick();
        }

        match self.run_systems(&proposal, telemetry) {
            Ok(receipts) => Ok(Tick { proposal, receipts }),
            Err(err) => {
                self.state.discard_pending();
                self.personas.discard_staged();
                Err(err)
            }
        }
    }

    fn run_systems(&self, proposal: &Proposal, mut telemetry: Option<&mut Collector>) -> WorldResult<Vec<Receipt>> {
        let ctx = WorldContext::new(self, self.state.working(), proposal);
        let started = Instant::now();

        let init = (proposal.tick == 0).then(|| self.init_systems.iter()).into_iter().flatten();
        for system in init.chain(self.systems.iter()) {
            let span_start = started.elapsed();
            system.run(&ctx).map_err(|source| WorldError::System {
                system: system.name().to_string(),
                tick: proposal.tick,
                source,
            })?;

            if let Some(collector) = telemetry.as_deref_mut() {
                collector.record_span(TickSpan {
                    system_name: system.name().to_string(),
                    tick_height: proposal.tick,
                    start: span_start,
                    end: started.elapsed(),
                });
            }
        }

        Ok(ctx.into_receipts())
    }

    /// Persists an applied tick and makes it the finalized state.
    pub fn commit_tick(&self, tick: &Tick) -> WorldResult<()> {
        if let Err(err) = self.state.commit(tick.height()) {
            self.state.discard_pending();
            self.personas.discard_staged();
            return Err(err.into());
        }
        self.personas.commit_staged();

        let mut cache = self.lock_receipts();
        for receipt in &tick.receipts {
            cache.insert(receipt.clone());
        }
        drop(cache);

        self.last_finalized.store(tick.height(), Ordering::Release);
        Ok(())
    }

    /// Applies and commits `proposal`.
    pub fn apply_and_commit(&self, proposal: Proposal, telemetry: Option<&mut Collector>) -> WorldResult<Tick> {
        let started = Instant::now();
        let tick = self.apply_tick_with(proposal, telemetry)?;
        self.commit_tick(&tick)?;
        info!(
            tick = tick.height(),
            txs = tick.proposal.tx_count(),
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "tick committed"
        );
        Ok(tick)
    }

    /// Prepares, applies and commits the next tick.
    pub fn tick(&self) -> WorldResult<Tick> {
        let proposal = self.prepare_tick()?;
        self.apply_and_commit(proposal, None)
    }

    /// Returns `true` if entity `id` exists in the finalized state.
    pub fn entity_exists(&self, id: EntityID) -> WorldResult<bool> {
        Ok(self.state.finalized().entity_exists(id)?)
    }

    /// Committed persona of `tag`.
    pub fn persona(&self, tag: &str) -> WorldResult<Option<Persona>> {
        let view = self.state.finalized();
        Ok(self.personas.get_committed(&view, tag)?.map(|(_, persona)| persona))
    }
}

