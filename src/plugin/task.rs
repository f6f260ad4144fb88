//! # Deferred tasks
//!
//! A task is a component whose [`Task::handle`] runs once its trigger fires.
//! Scheduling a task creates an entity holding the task and a
//! [`TaskMetadata`] trigger; the system installed by [`register_task`] runs
//! triggered tasks each tick and then removes their entities.
//!
//! ## Triggers
//! A task waits either for a tick height or for a tick timestamp, never both.
//! Both comparisons are inclusive, so a task whose exact boundary was skipped
//! still fires on the first tick past it.
//!
//! ## Ordering
//! Triggered tasks of one type run in entity id order, i.e. scheduling order.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::component::Component;
use crate::engine::error::StateError;
use crate::engine::filter::ComponentFilter;
use crate::engine::gamestate::ReaderExt;
use crate::engine::types::{EntityID, TickHeight, Timestamp};
use crate::plugin::Plugin;
use crate::world::context::WorldContext;
use crate::world::error::{SystemError, WorldResult};
use crate::world::World;

/// A component that performs work when its trigger fires.
pub trait Task: Component {
    /// Runs the task inside the tick in which it fired.
    fn handle(&self, ctx: &WorldContext<'_>) -> Result<(), SystemError>;
}

/// Trigger condition stored next to a scheduled task.
///
/// Serialized as `{"triggerAtTick": n}` or `{"triggerAtTimestamp": ms}`; a
/// stored value with neither key or both keys fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskMetadata {
    /// Fire on or after this tick.
    TriggerAtTick(TickHeight),
    /// Fire on or after this timestamp, Unix milliseconds.
    TriggerAtTimestamp(Timestamp),
}

impl Component for TaskMetadata {
    const NAME: &'static str = "taskMetadata";
}

impl TaskMetadata {
    /// Returns `true` if a tick at `tick` and `timestamp` fires the task.
    pub fn is_triggered(&self, tick: TickHeight, timestamp: Timestamp) -> bool {
        match *self {
            TaskMetadata::TriggerAtTick(at) => tick >= at,
            TaskMetadata::TriggerAtTimestamp(at) => timestamp >= at,
        }
    }
}

/// Scheduling failure.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A time task was scheduled with a negative delay.
    #[error("task delay must not be negative, got {0}ms")]
    NegativeDuration(i64),

    /// The task entity could not be created.
    #[error(transparent)]
    State(#[from] StateError),
}

impl From<TaskError> for SystemError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::State(err) => SystemError::State(err),
            other => SystemError::custom(other),
        }
    }
}

/// Schedules `task` to fire `delay` ticks after the current one.
pub fn schedule_tick_task<T: Task>(ctx: &WorldContext<'_>, delay: u64, task: T) -> Result<EntityID, TaskError> {
    let at = ctx.tick().saturating_add(i64::try_from(delay).unwrap_or(i64::MAX));
    Ok(ctx.create((task, TaskMetadata::TriggerAtTick(at)))?)
}

/// Schedules `task` to fire on the first tick at least `delay_ms`
/// milliseconds after the current tick's timestamp.
pub fn schedule_time_task<T: Task>(ctx: &WorldContext<'_>, delay_ms: i64, task: T) -> Result<EntityID, TaskError> {
    if delay_ms < 0 {
        return Err(TaskError::NegativeDuration(delay_ms));
    }
    let trigger = TaskMetadata::TriggerAtTimestamp(ctx.timestamp().saturating_add(delay_ms));
    Ok(ctx.create((task, trigger))?)
}

fn task_system<T: Task>(ctx: &WorldContext<'_>) -> Result<(), SystemError> {
    let ids = ctx.search(ComponentFilter::contains([T::NAME, TaskMetadata::NAME])).collect()?;

    for id in ids {
        let trigger: TaskMetadata = ctx.get_component(id)?;
        if !trigger.is_triggered(ctx.tick(), ctx.timestamp()) {
            continue;
        }
        let task: T = ctx.get_component(id)?;
        task.handle(ctx)
            .map_err(|err| SystemError::custom(format!("task {} on entity {id} failed: {err}", T::NAME)))?;
        ctx.remove_entity(id)?;
    }
    Ok(())
}

/// Registers task type `T` and the system that runs it.
///
/// Requires [`TaskPlugin`] to be registered on the same world.
pub fn register_task<T: Task>(world: &mut World) -> WorldResult<()> {
    world.register_component::<T>()?;
    world.register_system(&format!("task.{}", T::NAME), task_system::<T>)?;
    Ok(())
}

/// Registers the [`TaskMetadata`] component.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskPlugin;

impl Plugin for TaskPlugin {
    fn register(&self, world: &mut World) -> WorldResult<()> {
        world.register_component::<TaskMetadata>()?;
        Ok(())
    }
}
