//! Core identifiers and component signatures.
//!
//! This module defines the small, copyable identifiers shared by every layer of
//! the engine and the bitset [`Signature`] used to describe archetypes.
//!
//! ## Identifiers
//!
//! - [`EntityID`] is assigned monotonically by the game state and never reused.
//! - [`ComponentID`] is a compact index assigned by the component registry in
//!   registration order.
//! - [`ArchetypeID`] indexes the archetype table. Archetype ids are stable once
//!   committed and are persisted with the state.
//! - [`TickHeight`] is signed: the last finalized tick of an empty world is `-1`.
//!
//! ## Signatures
//!
//! An archetype is the unordered set of components attached to an entity. It is
//! represented as a fixed-size bitset so that the two filter primitives reduce to
//! word-wise comparisons:
//!
//! - *exact* matching is set equality,
//! - *contains* matching is a superset test.

/// Opaque entity identifier.
pub type EntityID = u64;

/// Index into the archetype table.
pub type ArchetypeID = u32;

/// Compact identifier for a registered component type.
pub type ComponentID = u16;

/// Registration index of a system.
pub type SystemID = u16;

/// Height of a tick. `-1` denotes "no tick finalized yet".
pub type TickHeight = i64;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Maximum number of registered component types.
pub const COMPONENT_CAP: usize = 256;

/// Number of `u64` words required to represent a full component signature.
pub const SIGNATURE_SIZE: usize = COMPONENT_CAP.div_ceil(64);

/// Bitset representing a set of components.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature {
    /// Packed component bitset.
    pub components: [u64; SIGNATURE_SIZE],
}

impl Signature {
    /// Sets the bit corresponding to `component_id`.
    #[inline]
    pub fn set(&mut self, component_id: ComponentID) {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] |= 1u64 << bits;
    }

    /// Clears the bit corresponding to `component_id`.
    #[inline]
    pub fn clear(&mut self, component_id: ComponentID) {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] &= !(1u64 << bits);
    }

    /// Returns `true` if `component_id` is present in this signature.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        (self.components[index] >> bits) & 1 == 1
    }

    /// Returns `true` if all components in `signature` are present.
    #[inline]
    pub fn contains_all(&self, signature: &Signature) -> bool {
        self.components
            .iter()
            .zip(signature.components.iter())
            .all(|(a, b)| (a & b) == *b)
    }

    /// Returns `true` if no component is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.iter().all(|word| *word == 0)
    }

    /// Number of components in this signature.
    pub fn len(&self) -> usize {
        self.components.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Iterates over all component IDs set in this signature, in ascending order.
    pub fn iterate_over_components(&self) -> impl Iterator<Item = ComponentID> + '_ {
        self.components
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| {
                let base = word_index * 64;
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let tz = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some((base + tz) as ComponentID)
                })
            })
    }
}

/// Builds a component signature from a list of component IDs.
pub fn build_signature(component_ids: &[ComponentID]) -> Signature {
    let mut signature = Signature::default();
    for &component_id in component_ids {
        signature.set(component_id);
    }
    signature
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clear_and_has() {
        let mut s = Signature::default();
        assert!(s.is_empty());
        s.set(3);
        s.set(64);
        s.set(255);
        assert!(s.has(3) && s.has(64) && s.has(255));
        assert_eq!(s.len(), 3);
        s.clear(64);
        assert!(!s.has(64));
        assert_eq!(s.iterate_over_components().collect::<Vec<_>>(), vec![3, 255]);
    }

    #[test]
    fn superset_and_equality() {
        let ab = build_signature(&[1, 2]);
        let ba = build_signature(&[2, 1]);
        let abc = build_signature(&[1, 2, 3]);
        assert_eq!(ab, ba);
        assert!(abc.contains_all(&ab));
        assert!(!ab.contains_all(&abc));
        assert!(ab.contains_all(&Signature::default()));
    }
}
