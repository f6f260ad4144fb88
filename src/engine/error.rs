//! # Engine Error Types
//!
//! Error types produced by the storage and query layers of the engine.
//!
//! ## Layers
//! - [`StoreError`]: failures reported by a key/value backend.
//! - [`StateError`]: failures of game-state operations (entity and component
//!   bookkeeping, archetype lookups, persisted-layout decoding).
//! - [`CqlError`]: failures while lexing, parsing or resolving a CQL expression.
//!
//! ## Benign state errors
//! Four [`StateError`] variants describe conditions that are expected while
//! iterating a live world (an entity removed by an earlier callback, a component
//! detached mid-search). [`StateError::is_benign`] identifies them so the search
//! engine can skip the entity instead of aborting. Every other variant signals a
//! broken storage invariant and is treated as fatal.

use thiserror::Error;

use crate::engine::types::{ArchetypeID, EntityID};

/// Failure reported by a key/value backend.

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not complete the operation.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result alias for key/value operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of a game-state operation.

#[derive(Debug, Error)]
pub enum StateError {
    /// The entity id is not assigned to any archetype.
    #[error("entity {0} does not exist")]
    EntityDoesNotExist(EntityID),

    /// The entity exists but does not carry the component.
    #[error("component {component} is not on entity {entity}")]
    ComponentNotOnEntity {
        /// Component name.
        component: String,
        /// Entity id.
        entity: EntityID,
    },

    /// The component is already attached to the entity.
    #[error("component {component} is already on entity {entity}")]
    ComponentAlreadyOnEntity {
        /// Component name.
        component: String,
        /// Entity id.
        entity: EntityID,
    },

    /// The operation would leave (or create) an entity without components.
    #[error("entity must have at least one component")]
    EntityMustHaveAtLeastOneComponent,

    /// No component with this name has been registered.
    #[error("component {0} is not registered")]
    ComponentNotRegistered(String),

    /// The same component appears twice in one entity creation.
    #[error("duplicate component {0}")]
    DuplicateComponent(String),

    /// A different type is already registered under this component name.
    #[error("component name {0} is already registered to a different type")]
    ComponentNameTaken(String),

    /// Registration attempted after the state was initialized.
    #[error("component registration is locked after initialization")]
    RegistrationLocked,

    /// The registry is full.
    #[error("component capacity exceeded")]
    ComponentCapacity,

    /// The archetype id is not present in the archetype table.
    #[error("archetype {0} not found")]
    ArchetypeNotFound(ArchetypeID),

    /// The state has not been initialized yet.
    #[error("game state is not initialized")]
    NotInitialized,

    /// `init` was called twice.
    #[error("game state is already initialized")]
    AlreadyInitialized,

    /// Persisted data could not be interpreted.
    #[error("corrupt state at {key}: {reason}")]
    Corrupt {
        /// Storage key holding the bad value.
        key: String,
        /// Description of the problem.
        reason: String,
    },

    /// A component value could not be encoded or decoded.
    #[error("component codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The key/value backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StateError {
    /// Returns `true` for the expected, recoverable conditions that a search
    /// skips per entity instead of propagating.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            StateError::EntityDoesNotExist(_)
                | StateError::ComponentNotOnEntity { .. }
                | StateError::ComponentAlreadyOnEntity { .. }
                | StateError::EntityMustHaveAtLeastOneComponent
        )
    }
}

/// Result alias for game-state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Failure while compiling a CQL expression into a component filter.
///
/// Positions are byte offsets into the source text.

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CqlError {
    /// A character that starts no token.
    #[error("unexpected character {found:?} at {position}")]
    UnexpectedChar {
        /// Offending character.
        found: char,
        /// Byte offset.
        position: usize,
    },

    /// A token that does not fit the grammar at this point.
    #[error("unexpected token {found} at {position}, expected {expected}")]
    UnexpectedToken {
        /// Rendered token.
        found: String,
        /// What the parser was looking for.
        expected: &'static str,
        /// Byte offset.
        position: usize,
    },

    /// The input ended in the middle of an expression.
    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEnd {
        /// What the parser was looking for.
        expected: &'static str,
    },

    /// `EXACT()` or `CONTAINS()` without arguments.
    #[error("{0} requires at least one component")]
    EmptyComponentList(&'static str),

    /// An identifier the lookup could not resolve.
    #[error("component {0} is not registered")]
    UnknownComponent(String),

    /// The input was blank.
    #[error("empty query")]
    Empty,

    /// `!` or `(` nested deeper than the parser accepts.
    #[error("expression nested too deeply at {position}")]
    TooDeep {
        /// Byte offset of the token that crossed the limit.
        position: usize,
    },
}

/// Result alias for CQL compilation.
pub type CqlResult<T> = Result<T, CqlError>;
