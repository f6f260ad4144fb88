//! # Search
//!
//! A [`Search`] walks every archetype accepted by a [`ComponentFilter`], then
//! every entity inside those archetypes, optionally narrowed by `where`
//! predicates. Searches run against any [`StateReader`], so the same code
//! serves systems (working view) and queries (finalized view).
//!
//! ## Error policy
//!
//! Errors classified as benign by [`StateError::is_benign`] are skipped for the
//! entity that raised them; one stale entity does not stop the walk. Any other
//! error means the store is broken: it is logged and returned.
//!
//! ## Mutation during iteration
//!
//! Entity ids are snapshotted one archetype at a time, so a callback may move
//! or remove entities. Archetypes created during the walk are not visited.

use tracing::error;

use crate::engine::component::{Component, ComponentRegistry};
use crate::engine::cql;
use crate::engine::error::{CqlResult, StateError, StateResult};
use crate::engine::filter::ComponentFilter;
use crate::engine::gamestate::{ReaderExt, StateReader};
use crate::engine::types::EntityID;

type WhereFn<'r> = Box<dyn Fn(&dyn StateReader, EntityID) -> StateResult<bool> + 'r>;

/// Parses `text` as CQL, resolving identifiers against `registry`.
pub fn parse_cql(text: &str, registry: &ComponentRegistry) -> CqlResult<ComponentFilter> {
    cql::parse(text, |ident| registry.id_of_name(ident).map(|_| ident.to_string()))
}

/// Lazy entity search over a state view.
pub struct Search<'r> {
    reader: &'r dyn StateReader,
    filter: ComponentFilter,
    wheres: Vec<WhereFn<'r>>,
}

impl<'r> Search<'r> {
    /// Creates a search for `filter` over `reader`.
    pub fn new(reader: &'r dyn StateReader, filter: ComponentFilter) -> Self {
        Self { reader, filter, wheres: Vec::new() }
    }

    /// Creates a search from a CQL expression.
    pub fn from_cql(reader: &'r dyn StateReader, text: &str) -> CqlResult<Self> {
        let filter = parse_cql(text, reader.registry())?;
        Ok(Self::new(reader, filter))
    }

    /// The filter this search evaluates per archetype.
    pub fn filter(&self) -> &ComponentFilter {
        &self.filter
    }

    /// Adds a predicate. Predicates are ANDed in the order they were added.
    pub fn where_<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn StateReader, EntityID) -> StateResult<bool> + 'r,
    {
        self.wheres.push(Box::new(predicate));
        self
    }

    /// Adds a predicate over component `T` of each candidate.
    ///
    /// Entities without `T` are skipped.
    pub fn where_component<T, F>(self, predicate: F) -> Self
    where
        T: Component,
        F: Fn(&T) -> bool + 'r,
    {
        self.where_(move |reader, id| {
            let value: T = reader.get_component(id)?;
            Ok(predicate(&value))
        })
    }

    fn accepts(&self, id: EntityID) -> StateResult<bool> {
        for predicate in &self.wheres {
            if !predicate(self.reader, id)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Calls `callback` for every matching entity until it returns `Ok(false)`.
    ///
    /// Errors returned by the callback stop the walk and are returned as is.
    pub fn try_each<E, F>(&self, mut callback: F) -> Result<(), E>
    where
        E: From<StateError>,
        F: FnMut(EntityID) -> Result<bool, E>,
    {
        let archetypes = self.reader.find_archetypes(&self.filter).map_err(E::from)?;
        for archetype in archetypes {
            let ids = match self.reader.entities_for_archetype(archetype) {
                Ok(ids) => ids,
                Err(err) if err.is_benign() => continue,
                Err(err) => {
                    error!(archetype, filter = %self.filter, error = %err, "search failed to list archetype");
                    return Err(err.into());
                }
            };

            for id in ids {
                match self.accepts(id) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) if err.is_benign() => continue,
                    Err(err) => {
                        error!(entity = id, filter = %self.filter, error = %err, "search predicate failed");
                        return Err(err.into());
                    }
                }
                if !callback(id)? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Calls `callback` for every matching entity until it returns `false`.
    pub fn each<F>(&self, mut callback: F) -> StateResult<()>
    where
        F: FnMut(EntityID) -> bool,
    {
        self.try_each(|id| Ok::<_, StateError>(callback(id)))
    }

    /// Number of matching entities.
    pub fn count(&self) -> StateResult<usize> {
        let mut count = 0;
        self.each(|_| {
            count += 1;
            true
        })?;
        Ok(count)
    }

    /// First matching entity in walk order.
    pub fn first(&self) -> StateResult<Option<EntityID>> {
        let mut found = None;
        self.each(|id| {
            found = Some(id);
            false
        })?;
        Ok(found)
    }

    /// Every matching entity, sorted ascending.
    pub fn collect(&self) -> StateResult<Vec<EntityID>> {
        let mut ids = Vec::new();
        self.each(|id| {
            ids.push(id);
            true
        })?;
        ids.sort_unstable();
        Ok(ids)
    }
}
