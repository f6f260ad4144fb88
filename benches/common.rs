#![allow(dead_code)]

use serde::{Deserialize, Serialize};

use world_engine::{Component, World, WorldConfig, WorldResult};

pub const AGENTS_SMALL: usize = 1_000;
pub const AGENTS_MED: usize = 10_000;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Component for Position {
    const NAME: &'static str = "Position";
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Wealth {
    pub value: f32,
}

impl Component for Wealth {
    const NAME: &'static str = "Wealth";
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Productivity {
    pub rate: f32,
}

impl Component for Productivity {
    const NAME: &'static str = "Productivity";
}

/// A world with the bench components registered, not yet initialized.
pub fn make_world() -> WorldResult<World> {
    let config = WorldConfig { verify_signatures: false, ..WorldConfig::default() };
    let mut world = World::new(config)?;
    world.register_component::<Position>()?;
    world.register_component::<Wealth>()?;
    world.register_component::<Productivity>()?;
    Ok(world)
}

/// Spawns `agent_count` agents on tick 0; every third agent has no productivity.
pub fn populate(world: &mut World, agent_count: usize) -> WorldResult<()> {
    world.register_init_system("populate", move |ctx| {
        let producers = agent_count - agent_count / 3;
        ctx.create_many(
            producers,
            (Position::default(), Wealth { value: 1.0 }, Productivity { rate: 0.01 }),
        )?;
        ctx.create_many(agent_count / 3, (Position::default(), Wealth { value: 1.0 }))?;
        Ok(())
    })?;
    Ok(())
}
