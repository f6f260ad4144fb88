// Run:
//   cargo test --test task_scheduler -- --nocapture

mod common;

use serde::{Deserialize, Serialize};

use common::*;
use world_engine::plugin::task::{register_task, schedule_tick_task, schedule_time_task, TaskError, TaskMetadata};
use world_engine::prelude::*;
use world_engine::{Proposal, Task, TaskPlugin, TickHeight, Timestamp};

/// Leaves a `Health` marker holding the tick it fired in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Beacon {
    label: String,
}

impl Component for Beacon {
    const NAME: &'static str = "Beacon";
}

impl Task for Beacon {
    fn handle(&self, ctx: &WorldContext<'_>) -> Result<(), SystemError> {
        ctx.create((Health { value: ctx.tick() },))?;
        Ok(())
    }
}

fn task_world<F>(schedule: F) -> World
where
    F: Fn(&WorldContext<'_>) -> Result<(), SystemError> + Send + Sync + 'static,
{
    let mut world = world(false);
    world.register_plugin(&TaskPlugin).unwrap();
    register_task::<Beacon>(&mut world).unwrap();
    world.register_init_system("schedule", schedule).unwrap();
    world.init().unwrap();
    world
}

fn markers(world: &World) -> Vec<i64> {
    let ctx = world.read_only();
    let ids = ctx.search(ComponentFilter::exact([Health::NAME])).collect().unwrap();
    ids.into_iter().map(|id| ctx.get_component::<Health>(id).unwrap().value).collect()
}

fn pending_tasks(world: &World) -> usize {
    world
        .read_only()
        .search(ComponentFilter::contains([Beacon::NAME, TaskMetadata::NAME]))
        .count()
        .unwrap()
}

fn run(world: &World, tick: TickHeight, timestamp: Timestamp) {
    world.apply_and_commit(Proposal::empty(tick, timestamp), None).unwrap();
}

#[test]
fn tick_task_fires_after_its_delay() {
    let world = task_world(|ctx| {
        schedule_tick_task(ctx, 3, Beacon { label: "later".into() })?;
        Ok(())
    });

    for tick in 0..3 {
        world.tick().unwrap();
        assert!(markers(&world).is_empty(), "fired early at tick {tick}");
        assert_eq!(pending_tasks(&world), 1);
    }

    world.tick().unwrap();
    assert_eq!(markers(&world), vec![3]);
    assert_eq!(pending_tasks(&world), 0);

    world.tick().unwrap();
    assert_eq!(markers(&world), vec![3]);
}

#[test]
fn zero_delay_fires_in_the_same_tick() {
    let world = task_world(|ctx| {
        schedule_tick_task(ctx, 0, Beacon::default())?;
        Ok(())
    });
    world.tick().unwrap();
    assert_eq!(markers(&world), vec![0]);
}

#[test]
fn time_task_fires_on_first_tick_past_its_deadline() {
    let world = task_world(|ctx| {
        schedule_time_task(ctx, 500, Beacon { label: "timer".into() })?;
        Ok(())
    });

    run(&world, 0, 1_000);
    run(&world, 1, 1_200);
    run(&world, 2, 1_499);
    assert!(markers(&world).is_empty());

    run(&world, 3, 1_650);
    assert_eq!(markers(&world), vec![3]);
    assert_eq!(pending_tasks(&world), 0);
}

#[test]
fn negative_delay_is_rejected() {
    let world = task_world(|ctx| {
        match schedule_time_task(ctx, -1, Beacon::default()) {
            Err(TaskError::NegativeDuration(-1)) => Ok(()),
            other => Err(SystemError::custom(format!("unexpected scheduling outcome {other:?}"))),
        }
    });
    world.tick().unwrap();
    assert_eq!(pending_tasks(&world), 0);
}

#[test]
fn tasks_fire_in_scheduling_order() {
    let world = task_world(|ctx| {
        for delay in [2, 1, 2] {
            schedule_tick_task(ctx, delay, Beacon::default())?;
        }
        Ok(())
    });

    world.tick().unwrap();
    world.tick().unwrap();
    assert_eq!(markers(&world), vec![1]);
    world.tick().unwrap();
    assert_eq!(markers(&world), vec![1, 2, 2]);
}
