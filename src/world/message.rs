//! # Messages
//!
//! A message is the typed body of a transaction. Each message type is
//! registered once under a name of the form `[group.]name`; a bare name belongs
//! to the `game` group. The registry keeps a type-erased decoder per name so
//! the world can turn raw JSON bodies into values without knowing the concrete
//! type, and systems recover the type with
//! [`WorldContext::each_message`](crate::world::context::WorldContext::each_message).

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::engine::schema::{Describe, FieldSchema};
use crate::world::error::{WorldError, WorldResult};

/// Group of names registered without an explicit group.
pub const DEFAULT_GROUP: &str = "game";

fn is_valid_name(full: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9-]+(\.[a-zA-Z0-9-]+)?$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(full))
}

/// Splits `full` into `(group, name)`, validating the naming rule.
pub fn split_name(full: &str) -> WorldResult<(String, String)> {
    if !is_valid_name(full) {
        return Err(WorldError::InvalidName(full.to_string()));
    }
    Ok(match full.split_once('.') {
        Some((group, name)) => (group.to_string(), name.to_string()),
        None => (DEFAULT_GROUP.to_string(), full.to_string()),
    })
}

/// Typed body of a transaction.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use world_engine::{Describe, Message};
///
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// struct Attack {
///     target: String,
///     damage: i64,
/// }
/// impl Describe for Attack {}
///
/// impl Message for Attack {
///     const NAME: &'static str = "combat.attack";
///     type Result = ();
/// }
/// ```
pub trait Message: Describe + DeserializeOwned + Send + Sync + 'static {
    /// Registered name, `[group.]name`.
    const NAME: &'static str;

    /// Value recorded in the receipt when the handler succeeds.
    type Result: Serialize;
}

type DecodeFn = fn(&Value) -> serde_json::Result<Arc<dyn Any + Send + Sync>>;

fn decode_as<M: Message>(body: &Value) -> serde_json::Result<Arc<dyn Any + Send + Sync>> {
    let message = M::deserialize(body)?;
    Ok(Arc::new(message))
}

/// Registration record of one message type.
#[derive(Debug, Clone)]
pub struct MessageDesc {
    /// Full name, `[group.]name`.
    pub full_name: &'static str,
    /// Group part of the name.
    pub group: String,
    /// Name within the group.
    pub name: String,
    /// Body field schema.
    pub fields: FieldSchema,
    type_id: TypeId,
    decode: DecodeFn,
}

impl MessageDesc {
    /// Decodes a raw body into the registered message type.
    pub fn decode(&self, body: &Value) -> WorldResult<Arc<dyn Any + Send + Sync>> {
        (self.decode)(body).map_err(|source| WorldError::Decode { message: self.full_name.to_string(), source })
    }

    /// Returns `true` if this record belongs to `M`.
    pub fn is<M: Message>(&self) -> bool {
        self.type_id == TypeId::of::<M>()
    }
}

/// Message types known to a world, keyed by full name.
#[derive(Debug, Default)]
pub struct MessageRegistry {
    messages: BTreeMap<&'static str, MessageDesc>,
}

impl MessageRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `M`.
    pub fn register<M: Message>(&mut self) -> WorldResult<()> {
        let (group, name) = split_name(M::NAME)?;
        if self.messages.contains_key(M::NAME) {
            return Err(WorldError::DuplicateMessage(M::NAME.to_string()));
        }
        let fields = M::describe().ok_or(WorldError::NotAStruct(std::any::type_name::<M>()))?;

        self.messages.insert(
            M::NAME,
            MessageDesc {
                full_name: M::NAME,
                group,
                name,
                fields,
                type_id: TypeId::of::<M>(),
                decode: decode_as::<M>,
            },
        );
        Ok(())
    }

    /// Looks up a message by full name.
    pub fn get(&self, full_name: &str) -> WorldResult<&MessageDesc> {
        self.messages
            .get(full_name)
            .ok_or_else(|| WorldError::MessageNotFound(full_name.to_string()))
    }

    /// Returns `true` if `M` is registered.
    pub fn contains<M: Message>(&self) -> bool {
        self.messages.get(M::NAME).is_some_and(MessageDesc::is::<M>)
    }

    /// Every registered message, ordered by full name.
    pub fn iter(&self) -> impl Iterator<Item = &MessageDesc> + '_ {
        self.messages.values()
    }

    /// Number of registered messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if no message is registered.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
