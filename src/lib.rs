//! # World Engine
//!
//! Deterministic Entity-Component-System (ECS) runtime for game-server
//! shards.
//!
//! ## Design Goals
//! - Archetype-indexed entity storage over a pluggable key/value store
//! - Deterministic ticks: systems in registration order, transactions in
//!   submission order, heights strictly increasing
//! - Readers never observe a partially applied tick
//! - Signed transactions bound to personas
//!
//! ## Layout
//! - [`engine`]: game state, archetypes, filters, CQL and search
//! - [`world`]: the orchestrator, messages, queries, receipts and personas
//! - [`plugin`]: plugin trait and the deferred-task plugin
//! - [`telemetry`]: tick spans, rings and batched delivery
//! - [`runtime`]: tick and sync loops
//! - [`config`]: environment configuration

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod config;
pub mod engine;
pub mod plugin;
pub mod runtime;
pub mod telemetry;
pub mod world;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::component::{Bundle, Component, ComponentRegistry};
pub use engine::error::{CqlError, CqlResult, StateError, StateResult, StoreError, StoreResult};
pub use engine::filter::ComponentFilter;
pub use engine::gamestate::{FinalizedView, GameState, ReaderExt, StateReader, WorkingView};
pub use engine::schema::{Describe, FieldSchema, FieldType};
pub use engine::search::{parse_cql, Search};
pub use engine::storage::{KvBatch, KvStore, MemoryStore};
pub use engine::systems::{FnSystem, System};
pub use engine::types::{ArchetypeID, ComponentID, EntityID, SystemID, TickHeight, Timestamp};

pub use config::{ConfigError, WorldConfig};
pub use plugin::{Plugin, Task, TaskPlugin};
pub use runtime::Runtime;
pub use telemetry::{Batch, Collector, TickSpan, TickTimeline};
pub use world::context::{MessageTx, ReadOnlyContext, WorldContext};
pub use world::error::{SignatureError, SystemError, WorldError, WorldResult};
pub use world::message::Message;
pub use world::tick::{Proposal, Receipt, Tick};
pub use world::tx::SignedTransaction;
pub use world::{Stage, World};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used types.
///
/// Import with:
/// ```rust
/// use world_engine::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Component,
        ComponentFilter,
        Describe,
        Message,
        MessageTx,
        ReadOnlyContext,
        ReaderExt,
        StateReader,
        SystemError,
        World,
        WorldConfig,
        WorldContext,
        WorldError,
    };
}
