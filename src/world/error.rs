//! # World Error Types
//!
//! - [`WorldError`]: registration, transaction intake, tick pipeline and
//!   query routing failures reported by the [`World`](crate::world::World).
//! - [`SystemError`]: what a system or a message/query handler returns.
//! - [`SignatureError`]: signed-transaction envelope failures.
//!
//! A system returning an error aborts the whole tick. A message handler
//! returning an error only fails its own transaction, unless the error is a
//! non-benign storage failure.

use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::error::{CqlError, StateError};
use crate::engine::types::TickHeight;

/// Failure of a system or handler.
#[derive(Debug, Error)]
pub enum SystemError {
    /// Game-state operation failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// JSON encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// CQL expression could not be compiled.
    #[error(transparent)]
    Cql(#[from] CqlError),

    /// Any other failure, described by its message.
    #[error("{0}")]
    Custom(String),
}

impl SystemError {
    /// Builds a [`SystemError::Custom`] from anything printable.
    pub fn custom(message: impl std::fmt::Display) -> Self {
        SystemError::Custom(message.to_string())
    }

    /// Returns `true` if this error must abort the tick even when raised by a
    /// message handler.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SystemError::State(err) if !err.is_benign())
    }
}

/// Failure while signing or verifying a transaction envelope.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// A hex field could not be decoded.
    #[error("{field} is not valid hex: {source}")]
    Hex {
        /// Envelope field name.
        field: &'static str,
        /// Decoder error.
        #[source]
        source: hex::FromHexError,
    },

    /// The address is not a valid ed25519 public key.
    #[error("invalid signer address {0}")]
    InvalidAddress(String),

    /// The signature bytes are malformed or do not verify.
    #[error("signature verification failed")]
    BadSignature,

    /// The stored hash does not match the payload.
    #[error("transaction hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Hash recomputed from the payload.
        expected: String,
        /// Hash carried by the envelope.
        actual: String,
    },

    /// The signing payload could not be encoded.
    #[error("payload encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Failure reported by the world orchestrator.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Game-state failure.
    #[error(transparent)]
    State(#[from] StateError),

    /// Invalid world configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Message or query name does not match the naming rule.
    #[error("invalid name {0:?}: expected [group.]name using letters, digits and '-'")]
    InvalidName(String),

    /// A message with this name is already registered.
    #[error("message {0} is already registered")]
    DuplicateMessage(String),

    /// A query with this group and name is already registered.
    #[error("query {group}.{name} is already registered")]
    DuplicateQuery {
        /// Query group.
        group: String,
        /// Query name.
        name: String,
    },

    /// A system with this name is already registered.
    #[error("system {0} is already registered")]
    DuplicateSystem(String),

    /// The request or reply type has no field schema.
    #[error("{0} must serialize to a JSON object")]
    NotAStruct(&'static str),

    /// No message with this name is registered.
    #[error("message {0} is not registered")]
    MessageNotFound(String),

    /// No query with this group and name is registered.
    #[error("query {group}.{name} is not registered")]
    QueryNotFound {
        /// Query group.
        group: String,
        /// Query name.
        name: String,
    },

    /// Registration attempted after `init`.
    #[error("registration is closed once the world is initialized")]
    RegistrationClosed,

    /// Operation requires an initialized world.
    #[error("world is not initialized")]
    NotInitialized,

    /// `init` called twice.
    #[error("world is already initialized")]
    AlreadyInitialized,

    /// The world has been stopped.
    #[error("world is stopped")]
    Stopped,

    /// Transaction body does not decode into the message type.
    #[error("failed to decode {message}: {source}")]
    Decode {
        /// Message name.
        message: String,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// Query request or reply could not be encoded or decoded.
    #[error("query codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Envelope signature or hash is wrong.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// Transaction was signed for another world.
    #[error("namespace mismatch: expected {expected}, got {actual}")]
    NamespaceMismatch {
        /// This world's namespace.
        expected: String,
        /// Namespace carried by the transaction.
        actual: String,
    },

    /// Transaction carries no persona tag.
    #[error("transaction has no persona tag")]
    MissingPersonaTag,

    /// Persona tag is not claimed.
    #[error("persona {0} is not registered")]
    PersonaNotFound(String),

    /// Signer is neither owner nor authorized for the persona.
    #[error("signer {signer} is not authorized for persona {persona_tag}")]
    SignerNotAuthorized {
        /// Persona tag.
        persona_tag: String,
        /// Address that signed the transaction.
        signer: String,
    },

    /// A system aborted the tick.
    #[error("system {system} failed at tick {tick}: {source}")]
    System {
        /// System name.
        system: String,
        /// Tick being applied.
        tick: TickHeight,
        /// Error returned by the system.
        #[source]
        source: SystemError,
    },

    /// A query handler failed.
    #[error("query {name} failed: {source}")]
    Query {
        /// Query name.
        name: String,
        /// Error returned by the handler.
        #[source]
        source: SystemError,
    },

    /// Proposal height does not follow the last finalized tick.
    #[error("tick {actual} cannot follow finalized tick {last_finalized}")]
    TickOutOfOrder {
        /// Last finalized tick.
        last_finalized: TickHeight,
        /// Height of the rejected proposal.
        actual: TickHeight,
    },

    /// No receipt is cached for this hash.
    #[error("receipt for transaction {0} not found")]
    ReceiptNotFound(String),
}

/// Result alias for world operations.
pub type WorldResult<T> = Result<T, WorldError>;
