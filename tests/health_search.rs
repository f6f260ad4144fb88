// Run:
//   cargo test --test health_search -- --nocapture
//
// With logs:
//   RUST_LOG=world_engine=debug cargo test --test health_search -- --nocapture

mod common;

use serde::{Deserialize, Serialize};
use serde_json::json;

use common::*;
use world_engine::prelude::*;
use world_engine::{parse_cql, EntityID};

#[derive(Debug, Default, Serialize, Deserialize)]
struct HealthAtLeast {
    min: i64,
}
impl Describe for HealthAtLeast {}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Matches {
    count: usize,
    ids: Vec<EntityID>,
}
impl Describe for Matches {}

fn health_world() -> World {
    let mut world = world(false);
    world
        .register_init_system("spawn-health", |ctx| {
            for value in 0..100 {
                ctx.create((Health { value },))?;
            }
            Ok(())
        })
        .unwrap();
    world
        .register_query::<HealthAtLeast, Matches, _>("health-at-least", |ctx, request| {
            let ids = ctx
                .search(ComponentFilter::exact([Health::NAME]))
                .where_component::<Health, _>(move |health| health.value >= request.min)
                .collect()?;
            Ok(Matches { count: ids.len(), ids })
        })
        .unwrap();
    world.init().unwrap();
    world
}

fn health_at_least(world: &World, min: i64) -> Matches {
    let request = serde_json::to_vec(&json!({ "min": min })).unwrap();
    let reply = world.handle_query("game", "health-at-least", &request).unwrap();
    serde_json::from_slice(&reply).unwrap()
}

#[test]
fn search_by_health_threshold() {
    let world = health_world();
    world.tick().unwrap();

    assert_eq!(health_at_least(&world, 1_000_000).count, 0);
    assert_eq!(health_at_least(&world, -100).count, 100);

    let top = health_at_least(&world, 90);
    assert_eq!(top.count, 10);
    assert!(top.ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn queries_see_only_finalized_state() {
    let world = health_world();
    assert_eq!(health_at_least(&world, 0).count, 0);

    world.tick().unwrap();
    assert_eq!(health_at_least(&world, 0).count, 100);
}

#[test]
fn init_systems_run_once() {
    let world = health_world();
    for _ in 0..3 {
        world.tick().unwrap();
    }
    assert_eq!(health_at_least(&world, i64::MIN).count, 100);
}

#[test]
fn cql_and_builders_agree_on_mixed_archetypes() {
    let mut world = world(false);
    world
        .register_init_system("spawn", |ctx| {
            ctx.create((Alpha { level: 1 },))?;
            ctx.create((Alpha { level: 2 }, Beta { level: 2 }))?;
            ctx.create((Beta { level: 3 },))?;
            ctx.create((Health { value: 5 }, Position::default()))?;
            Ok(())
        })
        .unwrap();
    world.init().unwrap();
    world.tick().unwrap();

    let ctx = world.read_only();
    let cases = [
        ("CONTAINS(Alpha)", ComponentFilter::contains(["Alpha"])),
        ("EXACT(Beta, Alpha)", ComponentFilter::exact(["Alpha", "Beta"])),
        (
            "CONTAINS(Alpha) | CONTAINS(Beta)",
            ComponentFilter::or([ComponentFilter::contains(["Alpha"]), ComponentFilter::contains(["Beta"])]),
        ),
        ("!CONTAINS(Alpha)", ComponentFilter::not(ComponentFilter::contains(["Alpha"]))),
        (
            "!(CONTAINS(Alpha) | CONTAINS(Beta)) & CONTAINS(Health)",
            ComponentFilter::and([
                ComponentFilter::not(ComponentFilter::or([
                    ComponentFilter::contains(["Alpha"]),
                    ComponentFilter::contains(["Beta"]),
                ])),
                ComponentFilter::contains(["Health"]),
            ]),
        ),
    ];

    for (text, built) in cases {
        let from_cql = ctx.search_cql(text).unwrap().collect().unwrap();
        let from_builder = ctx.search(built).collect().unwrap();
        assert_eq!(from_cql, from_builder, "{text}");
    }

    assert_eq!(ctx.search_cql("CONTAINS(Alpha)").unwrap().count().unwrap(), 2);
    assert_eq!(ctx.search_cql("EXACT(Health, Position)").unwrap().count().unwrap(), 1);
    assert!(parse_cql("CONTAINS(Gamma)", world.state().registry()).is_err());
}

#[test]
fn each_stops_when_callback_returns_false() {
    let world = health_world();
    world.tick().unwrap();

    let ctx = world.read_only();
    let mut seen = 0;
    ctx.search(ComponentFilter::contains([Health::NAME]))
        .each(|_| {
            seen += 1;
            seen < 5
        })
        .unwrap();
    assert_eq!(seen, 5);

    let first = ctx.search(ComponentFilter::contains([Health::NAME])).first().unwrap();
    assert!(first.is_some());
    assert!(ctx.search(ComponentFilter::exact([Alpha::NAME])).first().unwrap().is_none());
}
