//! Plugins bundle registrations that extend a [`World`].
//!
//! A plugin registers its components, messages, queries and systems in
//! [`Plugin::register`], which [`World::register_plugin`] calls while the
//! world still accepts registrations.

pub mod task;

use crate::world::error::WorldResult;
use crate::world::World;

/// A set of registrations applied to a world in one call.
pub trait Plugin {
    /// Registers everything the plugin provides on `world`.
    fn register(&self, world: &mut World) -> WorldResult<()>;
}

pub use task::{register_task, schedule_tick_task, schedule_time_task, Task, TaskError, TaskPlugin};
