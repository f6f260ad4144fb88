//! # Personas
//!
//! A persona binds a human-readable tag to the address that claimed it, plus
//! any addresses the owner later authorizes. Personas are ordinary entities
//! carrying a [`Persona`] component, created and updated by two built-in
//! systems that consume [`CreatePersona`] and [`AuthorizePersonaAddress`]
//! messages.
//!
//! ## Index
//! [`PersonaManager`] keeps an index from the lowercase tag to the owning
//! entity and signer. It is rebuilt from finalized state on `init`. Claims
//! made while a tick is applied are staged: later transactions of the same
//! tick see them, but they only reach the committed index when the tick
//! commits, and they are dropped if the tick fails.
//!
//! ## Invariants
//! - At most one persona exists per lowercase tag. The first claim wins.
//! - A signer owns at most one persona.
//! - Only the owner may authorize further addresses.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::engine::component::Component;
use crate::engine::error::{StateError, StateResult};
use crate::engine::filter::ComponentFilter;
use crate::engine::gamestate::{ReaderExt, StateReader};
use crate::engine::schema::Describe;
use crate::engine::search::Search;
use crate::engine::types::EntityID;
use crate::world::context::{MessageTx, ReadOnlyContext, WorldContext};
use crate::world::error::{SystemError, WorldResult};
use crate::world::message::Message;
use crate::world::World;

/// Shortest accepted persona tag.
pub const MIN_PERSONA_TAG_LEN: usize = 3;
/// Longest accepted persona tag.
pub const MAX_PERSONA_TAG_LEN: usize = 16;

const ADDRESS_HEX_LEN: usize = 64;

/// Returns `true` if `tag` has 3 to 16 characters drawn from letters, digits and `_`.
pub fn is_valid_persona_tag(tag: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new("^[a-zA-Z0-9_]{3,16}$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(tag))
}

/// Lowercases `address` and strips spaces.
pub fn normalize_address(address: &str) -> String {
    address.to_lowercase().replace(' ', "")
}

/// Returns `true` for a normalized 64-character hex address.
pub fn is_valid_address(address: &str) -> bool {
    address.len() == ADDRESS_HEX_LEN && address.bytes().all(|b| b.is_ascii_hexdigit())
}

// ─────────────────────────────────────────────────────────────────────────────
// Component, messages, query types
// ─────────────────────────────────────────────────────────────────────────────

/// Identity component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    /// Tag as claimed, original case.
    pub persona_tag: String,
    /// Address that claimed the tag.
    pub signer_address: String,
    /// Further addresses allowed to act for the persona.
    pub authorized_addresses: Vec<String>,
}

impl Component for Persona {
    const NAME: &'static str = "Persona";
}

impl Persona {
    /// Returns `true` if `address` owns or is authorized for this persona.
    pub fn allows(&self, address: &str) -> bool {
        let address = normalize_address(address);
        self.signer_address == address || self.authorized_addresses.iter().any(|a| *a == address)
    }
}

/// Claims a persona tag for the signer of the transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePersona {
    /// Tag to claim.
    pub persona_tag: String,
}
impl Describe for CreatePersona {}

/// Receipt result of [`CreatePersona`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePersonaResult {
    /// Claimed tag.
    pub persona_tag: String,
}

impl Message for CreatePersona {
    const NAME: &'static str = "persona.create-persona";
    type Result = CreatePersonaResult;
}

/// Authorizes another address to act for the transaction's persona.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizePersonaAddress {
    /// Address to authorize.
    pub address: String,
}
impl Describe for AuthorizePersonaAddress {}

/// Receipt result of [`AuthorizePersonaAddress`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizePersonaAddressResult {
    /// Persona the address was added to.
    pub persona_tag: String,
    /// Normalized address.
    pub authorized_address: String,
}

impl Message for AuthorizePersonaAddress {
    const NAME: &'static str = "persona.authorize-persona-address";
    type Result = AuthorizePersonaAddressResult;
}

/// Claim status reported by the `persona.info` query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonaStatus {
    /// Nobody claimed the tag.
    #[default]
    Available,
    /// A claim waits for the next tick.
    Pending,
    /// The tag is claimed.
    Assigned,
}

/// Request of the `persona.info` query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaInfoRequest {
    /// Tag to look up.
    pub persona_tag: String,
}
impl Describe for PersonaInfoRequest {}

/// Reply of the `persona.info` query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaInfoReply {
    /// Claim status.
    pub status: PersonaStatus,
    /// Persona data, empty unless assigned.
    pub persona: Persona,
}
impl Describe for PersonaInfoReply {}

// ─────────────────────────────────────────────────────────────────────────────
// Index
// ─────────────────────────────────────────────────────────────────────────────

/// Index entry of a claimed tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaEntry {
    /// Persona entity.
    pub entity: EntityID,
    /// Owning address.
    pub signer: String,
}

#[derive(Debug, Default)]
struct PersonaIndex {
    by_tag: HashMap<String, PersonaEntry>,
}

impl PersonaIndex {
    fn get(&self, tag: &str) -> Option<&PersonaEntry> {
        self.by_tag.get(&tag.to_lowercase())
    }

    fn has_signer(&self, signer: &str) -> bool {
        self.by_tag.values().any(|entry| entry.signer == signer)
    }

    fn insert(&mut self, tag: &str, entry: PersonaEntry) {
        self.by_tag.insert(tag.to_lowercase(), entry);
    }
}

/// Committed and staged persona claims of one world.
#[derive(Debug, Default)]
pub struct PersonaManager {
    committed: RwLock<PersonaIndex>,
    staged: Mutex<PersonaIndex>,
}

impl PersonaManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    fn staged(&self) -> MutexGuard<'_, PersonaIndex> {
        self.staged.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Rebuilds the committed index from `reader`.
    pub fn init(&self, reader: &dyn StateReader) -> StateResult<()> {
        let mut index = PersonaIndex::default();
        Search::new(reader, ComponentFilter::exact([Persona::NAME])).try_each(|id| {
            let persona: Persona = reader.get_component(id)?;
            index.insert(&persona.persona_tag, PersonaEntry { entity: id, signer: persona.signer_address });
            Ok::<_, StateError>(true)
        })?;

        *self.committed.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = index;
        self.staged().by_tag.clear();
        Ok(())
    }

    /// Committed entry of `tag`, ignoring claims staged by the current tick.
    pub fn lookup_committed(&self, tag: &str) -> Option<PersonaEntry> {
        self.committed.read().unwrap_or_else(|poisoned| poisoned.into_inner()).get(tag).cloned()
    }

    /// Entry of `tag`, including claims staged by the current tick.
    pub fn lookup(&self, tag: &str) -> Option<PersonaEntry> {
        if let Some(entry) = self.staged().get(tag) {
            return Some(entry.clone());
        }
        self.lookup_committed(tag)
    }

    /// Returns `true` if `signer` owns a committed or staged persona.
    pub fn signer_has_persona(&self, signer: &str) -> bool {
        self.staged().has_signer(signer)
            || self.committed.read().unwrap_or_else(|poisoned| poisoned.into_inner()).has_signer(signer)
    }

    fn stage(&self, tag: &str, entry: PersonaEntry) {
        self.staged().insert(tag, entry);
    }

    /// Moves staged claims into the committed index.
    pub fn commit_staged(&self) {
        let staged = std::mem::take(&mut self.staged().by_tag);
        self.committed.write().unwrap_or_else(|poisoned| poisoned.into_inner()).by_tag.extend(staged);
    }

    /// Drops staged claims.
    pub fn discard_staged(&self) {
        self.staged().by_tag.clear();
    }

    /// Committed persona of `tag`, read through `reader`.
    pub fn get_committed(&self, reader: &dyn StateReader, tag: &str) -> StateResult<Option<(EntityID, Persona)>> {
        let Some(entry) = self.lookup_committed(tag) else {
            return Ok(None);
        };
        let persona: Persona = reader.get_component(entry.entity)?;
        Ok(Some((entry.entity, persona)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Systems and query
// ─────────────────────────────────────────────────────────────────────────────

fn create_persona_system(ctx: &WorldContext<'_>) -> Result<(), SystemError> {
    let personas = ctx.personas();
    ctx.each_message::<CreatePersona, _>(|MessageTx { msg, tx, .. }| {
        let tag = &msg.persona_tag;
        if !is_valid_persona_tag(tag) {
            return Err(SystemError::custom(format!(
                "persona tag {tag:?} invalid: must be {MIN_PERSONA_TAG_LEN}-{MAX_PERSONA_TAG_LEN} characters \
                 of letters, digits and underscores"
            )));
        }
        if personas.lookup(tag).is_some() {
            return Err(SystemError::custom(format!("persona tag {tag} has already been registered")));
        }

        let signer = normalize_address(tx.signer());
        if personas.signer_has_persona(&signer) {
            return Err(SystemError::custom(format!("signer {signer} already owns a persona")));
        }

        let persona = Persona {
            persona_tag: tag.clone(),
            signer_address: signer.clone(),
            authorized_addresses: Vec::new(),
        };
        let entity = ctx.create((persona,))?;
        personas.stage(tag, PersonaEntry { entity, signer });

        Ok(CreatePersonaResult { persona_tag: tag.clone() })
    })
}

fn authorize_persona_address_system(ctx: &WorldContext<'_>) -> Result<(), SystemError> {
    let personas = ctx.personas();
    ctx.each_message::<AuthorizePersonaAddress, _>(|MessageTx { msg, tx, .. }| {
        let tag = &tx.persona_tag;
        let entry = personas
            .lookup(tag)
            .ok_or_else(|| SystemError::custom(format!("persona {tag} does not exist")))?;

        let signer = normalize_address(tx.signer());
        if entry.signer != signer {
            return Err(SystemError::custom(format!("signer {signer} does not own persona {tag}")));
        }

        let address = normalize_address(&msg.address);
        if !is_valid_address(&address) {
            return Err(SystemError::custom(format!("address {address} is invalid")));
        }

        ctx.update_component::<Persona, _>(entry.entity, |persona| {
            if !persona.authorized_addresses.contains(&address) {
                persona.authorized_addresses.push(address.clone());
            }
        })?;

        Ok(AuthorizePersonaAddressResult { persona_tag: tag.clone(), authorized_address: address })
    })
}

fn persona_info(ctx: &ReadOnlyContext<'_>, request: PersonaInfoRequest) -> Result<PersonaInfoReply, SystemError> {
    if let Some(persona) = ctx.persona(&request.persona_tag)? {
        return Ok(PersonaInfoReply { status: PersonaStatus::Assigned, persona });
    }
    let status = if ctx.persona_claim_pending(&request.persona_tag) {
        PersonaStatus::Pending
    } else {
        PersonaStatus::Available
    };
    Ok(PersonaInfoReply { status, persona: Persona::default() })
}

/// Registers the persona component, messages, systems and query on `world`.
pub(crate) fn register(world: &mut World) -> WorldResult<()> {
    world.register_component::<Persona>()?;
    world.register_message::<CreatePersona>()?;
    world.register_message::<AuthorizePersonaAddress>()?;
    world.register_system("persona.create", create_persona_system)?;
    world.register_system("persona.authorize-address", authorize_persona_address_system)?;
    world.register_query::<PersonaInfoRequest, PersonaInfoReply, _>("persona.info", persona_info)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persona_tag_rules() {
        assert!(is_valid_persona_tag("Hero_01"));
        assert!(!is_valid_persona_tag("ab"));
        assert!(!is_valid_persona_tag("a_very_long_persona_tag"));
        assert!(!is_valid_persona_tag("bad-tag"));
        assert!(!is_valid_persona_tag("héros"));
    }

    #[test]
    fn persona_tag_length_bounds() {
        assert!(is_valid_persona_tag(&"a".repeat(MIN_PERSONA_TAG_LEN)));
        assert!(is_valid_persona_tag(&"a".repeat(MAX_PERSONA_TAG_LEN)));
        assert!(!is_valid_persona_tag(&"a".repeat(MAX_PERSONA_TAG_LEN + 1)));
        assert!(!is_valid_persona_tag(""));
        assert!(!is_valid_persona_tag("Hero\n"));
        assert!(!is_valid_persona_tag("é_é"));
    }

    #[test]
    fn address_rules() {
        let address = normalize_address(&format!("AB {}", "c".repeat(62)));
        assert_eq!(address.len(), 64);
        assert!(address.starts_with("abc"));
        assert!(is_valid_address(&address));
        assert!(!is_valid_address("0x1234"));
        assert!(!is_valid_address(&"g".repeat(64)));
    }

    #[test]
    fn staged_claims_are_visible_until_discarded() {
        let manager = PersonaManager::new();
        manager.stage("Hero", PersonaEntry { entity: 1, signer: "aa".into() });

        assert_eq!(manager.lookup("hero").unwrap().entity, 1);
        assert!(manager.lookup_committed("hero").is_none());
        assert!(manager.signer_has_persona("aa"));

        manager.discard_staged();
        assert!(manager.lookup("HERO").is_none());
        assert!(!manager.signer_has_persona("aa"));
    }

    #[test]
    fn commit_moves_staged_claims() {
        let manager = PersonaManager::new();
        manager.stage("Hero", PersonaEntry { entity: 4, signer: "aa".into() });
        manager.commit_staged();
        manager.discard_staged();

        assert_eq!(manager.lookup_committed("HERO").unwrap().entity, 4);
        assert!(manager.signer_has_persona("aa"));
    }

    #[test]
    fn persona_allows_owner_and_authorized() {
        let persona = Persona {
            persona_tag: "Hero".into(),
            signer_address: "aa".into(),
            authorized_addresses: vec!["bb".into()],
        };
        assert!(persona.allows("AA"));
        assert!(persona.allows("bb"));
        assert!(!persona.allows("cc"));
    }

    #[test]
    fn status_serializes_lowercase() {
        let reply = PersonaInfoReply { status: PersonaStatus::Pending, persona: Persona::default() };
        let wire = serde_json::to_value(reply).unwrap();
        assert_eq!(wire["status"], "pending");
        assert_eq!(wire["persona"]["personaTag"], "");
    }
}
