#![allow(dead_code)]

use std::sync::Once;

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use world_engine::world::tx::address_of;
use world_engine::{Component, Describe, Message, SignedTransaction, World, WorldConfig};

pub const NAMESPACE: &str = "test-world";

static TRACING: Once = Once::new();

/// Installs a test subscriber once; `RUST_LOG` controls the output, `warn`
/// otherwise.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let config = WorldConfig { log_level: "warn".into(), ..WorldConfig::default() };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(config.log_filter().unwrap())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub value: i64,
}

impl Component for Health {
    const NAME: &'static str = "Health";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Component for Position {
    const NAME: &'static str = "Position";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alpha {
    pub level: u8,
}

impl Component for Alpha {
    const NAME: &'static str = "Alpha";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beta {
    pub level: u8,
}

impl Component for Beta {
    const NAME: &'static str = "Beta";
}

/// Deals damage to one entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attack {
    pub target: u64,
    pub damage: i64,
}
impl Describe for Attack {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttackResult {
    pub remaining: i64,
}

impl Message for Attack {
    const NAME: &'static str = "combat.attack";
    type Result = AttackResult;
}

pub fn config(verify_signatures: bool) -> WorldConfig {
    WorldConfig { namespace: NAMESPACE.to_string(), verify_signatures, ..WorldConfig::default() }
}

/// A world registering the shared test components.
pub fn world(verify_signatures: bool) -> World {
    init_tracing();
    let mut world = World::new(config(verify_signatures)).unwrap();
    world.register_component::<Health>().unwrap();
    world.register_component::<Position>().unwrap();
    world.register_component::<Alpha>().unwrap();
    world.register_component::<Beta>().unwrap();
    world
}

pub fn key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn address(seed: u8) -> String {
    address_of(&key(seed))
}

pub fn signed(seed: u8, persona_tag: &str, nonce: u64, body: Value) -> SignedTransaction {
    SignedTransaction::sign(&key(seed), NAMESPACE, persona_tag, nonce, body).unwrap()
}
