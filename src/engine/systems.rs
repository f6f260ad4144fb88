//! System abstractions.
//!
//! A **system** is a unit of game logic executed once per tick against a
//! [`WorldContext`]. Systems:
//! - run strictly in registration order, on the tick task,
//! - read and write state only through the context's working view,
//! - report failure by returning a [`SystemError`], which aborts the tick.
//!
//! [`FnSystem`] wraps a closure or function so most systems need no dedicated
//! type.

use crate::engine::types::SystemID;
use crate::world::context::WorldContext;
use crate::world::error::SystemError;

/// A unit of game logic executed every tick.
///
/// Systems must be `Send + Sync` so the world that owns them can be shared
/// with the tasks that submit transactions and run queries.
pub trait System: Send + Sync {
    /// Human-readable name, used in logs and telemetry spans.
    fn name(&self) -> &str;

    /// Executes the system for the tick bound to `ctx`.
    fn run(&self, ctx: &WorldContext<'_>) -> Result<(), SystemError>;
}

/// A [`System`] backed by a function or closure.
pub struct FnSystem<F>
where
    F: Fn(&WorldContext<'_>) -> Result<(), SystemError> + Send + Sync + 'static,
{
    name: String,
    f: F,
}

impl<F> FnSystem<F>
where
    F: Fn(&WorldContext<'_>) -> Result<(), SystemError> + Send + Sync + 'static,
{
    /// Creates a new function-backed system.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> System for FnSystem<F>
where
    F: Fn(&WorldContext<'_>) -> Result<(), SystemError> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn run(&self, ctx: &WorldContext<'_>) -> Result<(), SystemError> {
        (self.f)(ctx)
    }
}

/// Ordered list of systems.
///
/// Ids are positions in registration order and never change.
#[derive(Default)]
pub struct SystemList {
    systems: Vec<Box<dyn System>>,
}

impl SystemList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `system` and returns its id.
    pub fn push(&mut self, system: Box<dyn System>) -> SystemID {
        let id = self.systems.len() as SystemID;
        self.systems.push(system);
        id
    }

    /// Number of systems.
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Returns `true` if no system is registered.
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Returns `true` if a system with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.systems.iter().any(|system| system.name() == name)
    }

    /// Systems in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn System> + '_ {
        self.systems.iter().map(|system| system.as_ref())
    }
}
