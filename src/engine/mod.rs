//! # Engine Module
//!
//! Entity/component storage and search.
//!
//! This module contains the state layer the world runs on:
//! - Identifiers, signatures and the component registry
//! - The key/value store contract and its in-memory implementation
//! - Archetype indexing and the entity command buffer
//! - Finalized and working game-state views
//! - Component filters, CQL and search
//! - The system trait
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod schema;
pub mod component;
pub mod storage;
pub mod archetype;
pub mod ecb;
pub mod gamestate;
pub mod filter;
pub mod cql;
pub mod search;
pub mod systems;
