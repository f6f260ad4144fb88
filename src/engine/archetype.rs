//! # Archetype index
//!
//! An archetype is the set of components attached to an entity. Entities with
//! identical component sets share one archetype, and the archetype is the unit
//! of indexing for searches: a filter is evaluated once per archetype, never per
//! entity.
//!
//! ## Layout
//!
//! * [`ArchetypeIndex`] assigns dense [`ArchetypeID`]s to distinct signatures in
//!   creation order. Ids are never reused or reassigned, so an id persisted in
//!   storage keeps pointing at the same component set.
//! * [`ActiveEntities`] is the membership list of one archetype. Removal is a
//!   swap-remove, so order inside an archetype is not meaningful; searches sort
//!   where determinism is required.
//!
//! The persisted form of the index lists component *names*, not ids, so a
//! restart that registers components in a different order still decodes the
//! same archetypes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::engine::component::ComponentRegistry;
use crate::engine::error::{StateError, StateResult};
use crate::engine::filter::CompiledFilter;
use crate::engine::types::{ArchetypeID, EntityID, Signature};

/// Dense table of archetype signatures.
#[derive(Debug, Clone, Default)]
pub struct ArchetypeIndex {
    signatures: Vec<Signature>,
    by_signature: HashMap<Signature, ArchetypeID>,
}

impl ArchetypeIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of archetypes.
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Returns `true` if no archetype exists.
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Returns the id assigned to `signature`, if any.
    pub fn id_of(&self, signature: &Signature) -> Option<ArchetypeID> {
        self.by_signature.get(signature).copied()
    }

    /// Returns the signature of `archetype_id`.
    pub fn signature(&self, archetype_id: ArchetypeID) -> StateResult<&Signature> {
        self.signatures
            .get(archetype_id as usize)
            .ok_or(StateError::ArchetypeNotFound(archetype_id))
    }

    /// Returns the id for `signature`, assigning the next id if it is new.
    ///
    /// The boolean is `true` when a new archetype was created.
    pub fn get_or_insert(&mut self, signature: Signature) -> (ArchetypeID, bool) {
        if let Some(id) = self.id_of(&signature) {
            return (id, false);
        }
        let id = self.signatures.len() as ArchetypeID;
        self.signatures.push(signature);
        self.by_signature.insert(signature, id);
        (id, true)
    }

    /// Drops every archetype with id `>= len`.
    pub fn truncate(&mut self, len: usize) {
        for signature in self.signatures.drain(len.min(self.signatures.len())..) {
            self.by_signature.remove(&signature);
        }
    }

    /// Ids of every archetype accepted by `filter`, ascending.
    pub fn find(&self, filter: &CompiledFilter) -> Vec<ArchetypeID> {
        self.signatures
            .iter()
            .enumerate()
            .filter(|(_, signature)| filter.matches(signature))
            .map(|(id, _)| id as ArchetypeID)
            .collect()
    }

    /// Encodes the index as component-name lists.
    pub fn to_layout(&self, registry: &ComponentRegistry) -> ArchetypeLayout {
        ArchetypeLayout(
            self.signatures
                .iter()
                .map(|signature| {
                    registry
                        .names_of_signature(signature)
                        .into_iter()
                        .map(str::to_string)
                        .collect()
                })
                .collect(),
        )
    }

    /// Rebuilds an index from its persisted layout.
    ///
    /// Fails if the layout names a component that is not registered.
    pub fn from_layout(layout: &ArchetypeLayout, registry: &ComponentRegistry) -> StateResult<Self> {
        let mut index = Self::new();
        for names in &layout.0 {
            let signature = registry.signature_of_names(names)?;
            index.get_or_insert(signature);
        }
        Ok(index)
    }
}

/// Persisted archetype table: position is the archetype id, each entry lists
/// the component names of that archetype.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchetypeLayout(pub Vec<Vec<String>>);

/// Entity membership of one archetype.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveEntities {
    /// Member entity ids.
    pub ids: Vec<EntityID>,
    /// Set when the list differs from its persisted copy.
    pub modified: bool,
}

impl ActiveEntities {
    /// Wraps a list loaded from storage.
    pub fn loaded(ids: Vec<EntityID>) -> Self {
        Self { ids, modified: false }
    }

    /// Appends `id`.
    pub fn push(&mut self, id: EntityID) {
        self.ids.push(id);
        self.modified = true;
    }

    /// Removes `id` by swapping in the last member.
    pub fn swap_remove(&mut self, id: EntityID) -> StateResult<()> {
        let position = self
            .ids
            .iter()
            .position(|candidate| *candidate == id)
            .ok_or(StateError::EntityDoesNotExist(id))?;
        self.ids.swap_remove(position);
        self.modified = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::engine::component::Component;
    use crate::engine::filter::ComponentFilter;

    #[derive(Default, Serialize, Deserialize)]
    struct Alpha;
    impl Component for Alpha {
        const NAME: &'static str = "Alpha";
    }

    #[derive(Default, Serialize, Deserialize)]
    struct Beta;
    impl Component for Beta {
        const NAME: &'static str = "Beta";
    }

    fn registry() -> ComponentRegistry {
        let registry = ComponentRegistry::new();
        registry.register::<Alpha>().unwrap();
        registry.register::<Beta>().unwrap();
        registry
    }

    #[test]
    fn ids_are_dense_and_stable() {
        let registry = registry();
        let mut index = ArchetypeIndex::new();
        let a = registry.signature_of_names(&["Alpha"]).unwrap();
        let ab = registry.signature_of_names(&["Beta", "Alpha"]).unwrap();

        assert_eq!(index.get_or_insert(a), (0, true));
        assert_eq!(index.get_or_insert(ab), (1, true));
        assert_eq!(index.get_or_insert(a), (0, false));
        assert_eq!(index.len(), 2);
        assert!(matches!(index.signature(9), Err(StateError::ArchetypeNotFound(9))));

        index.truncate(1);
        assert_eq!(index.id_of(&ab), None);
        assert_eq!(index.get_or_insert(ab), (1, true));
    }

    #[test]
    fn find_uses_compiled_filter() {
        let registry = registry();
        let mut index = ArchetypeIndex::new();
        index.get_or_insert(registry.signature_of_names(&["Alpha"]).unwrap());
        index.get_or_insert(registry.signature_of_names(&["Alpha", "Beta"]).unwrap());
        index.get_or_insert(registry.signature_of_names(&["Beta"]).unwrap());

        let contains_alpha = ComponentFilter::contains(["Alpha"]).compile(&registry).unwrap();
        assert_eq!(index.find(&contains_alpha), vec![0, 1]);

        let exact_beta = ComponentFilter::exact(["Beta"]).compile(&registry).unwrap();
        assert_eq!(index.find(&exact_beta), vec![2]);
    }

    #[test]
    fn layout_survives_different_registration_order() {
        let registry = registry();
        let mut index = ArchetypeIndex::new();
        index.get_or_insert(registry.signature_of_names(&["Beta"]).unwrap());
        index.get_or_insert(registry.signature_of_names(&["Alpha", "Beta"]).unwrap());
        let layout = index.to_layout(&registry);
        assert_eq!(layout.0, vec![vec!["Beta".to_string()], vec!["Alpha".into(), "Beta".into()]]);

        let reordered = ComponentRegistry::new();
        reordered.register::<Beta>().unwrap();
        reordered.register::<Alpha>().unwrap();
        let rebuilt = ArchetypeIndex::from_layout(&layout, &reordered).unwrap();
        let beta_only = reordered.signature_of_names(&["Beta"]).unwrap();
        assert_eq!(rebuilt.id_of(&beta_only), Some(0));
    }

    #[test]
    fn swap_remove_marks_modified() {
        let mut active = ActiveEntities::loaded(vec![1, 2, 3]);
        assert!(!active.modified);
        active.swap_remove(1).unwrap();
        assert_eq!(active.ids, vec![3, 2]);
        assert!(active.modified);
        assert!(active.swap_remove(42).is_err());
    }
}
