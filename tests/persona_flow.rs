// Run:
//   cargo test --test persona_flow -- --nocapture

mod common;

use serde_json::json;

use common::*;
use world_engine::prelude::*;
use world_engine::world::persona::{
    AuthorizePersonaAddress, CreatePersona, PersonaInfoReply, PersonaStatus,
};
use world_engine::SignatureError;

fn persona_world() -> World {
    let mut world = world(true);
    world.register_message::<Attack>().unwrap();
    world
        .register_system("combat", |ctx| {
            ctx.each_message::<Attack, _>(|MessageTx { msg, .. }| {
                let mut health: Health = ctx.get_component(msg.target)?;
                health.value -= msg.damage;
                ctx.set_component(msg.target, &health)?;
                Ok(AttackResult { remaining: health.value })
            })
        })
        .unwrap();
    world.init().unwrap();
    world
}

fn create_persona(world: &World, seed: u8, tag: &str) -> String {
    let tx = signed(seed, tag, 0, json!({ "personaTag": tag }));
    world.add_transaction(CreatePersona::NAME, tx).unwrap()
}

fn persona_info(world: &World, tag: &str) -> PersonaInfoReply {
    let request = serde_json::to_vec(&json!({ "personaTag": tag })).unwrap();
    serde_json::from_slice(&world.handle_query("persona", "info", &request).unwrap()).unwrap()
}

#[test]
fn first_claim_wins_within_a_tick() {
    let world = persona_world();
    let first = create_persona(&world, 1, "Hero");
    let second = create_persona(&world, 2, "hero");
    world.tick().unwrap();

    assert!(world.receipt(&first).unwrap().is_success());
    let rejected = world.receipt(&second).unwrap();
    assert!(!rejected.is_success());
    assert!(rejected.errors[0].contains("already been registered"));

    let persona = world.persona("HERO").unwrap().unwrap();
    assert_eq!(persona.persona_tag, "Hero");
    assert_eq!(persona.signer_address, address(1));
}

#[test]
fn first_claim_wins_across_ticks() {
    let world = persona_world();
    let first = create_persona(&world, 1, "Hero");
    world.tick().unwrap();
    let second = create_persona(&world, 2, "hero");
    world.tick().unwrap();

    assert!(world.receipt(&first).unwrap().is_success());
    assert!(!world.receipt(&second).unwrap().is_success());
    assert_eq!(world.persona("hero").unwrap().unwrap().signer_address, address(1));
}

#[test]
fn signer_owns_at_most_one_persona() {
    let world = persona_world();
    create_persona(&world, 1, "Hero");
    let second = create_persona(&world, 1, "Sidekick");
    world.tick().unwrap();

    assert!(!world.receipt(&second).unwrap().is_success());
    assert!(world.persona("Sidekick").unwrap().is_none());
}

#[test]
fn invalid_tags_fail_their_receipt() {
    let world = persona_world();
    let short = create_persona(&world, 1, "ab");
    let dashed = create_persona(&world, 2, "bad-tag");
    world.tick().unwrap();

    for hash in [short, dashed] {
        let receipt = world.receipt(&hash).unwrap();
        assert!(receipt.errors[0].contains("invalid"), "{:?}", receipt.errors);
    }
}

#[test]
fn info_reports_claim_status() {
    let world = persona_world();
    assert_eq!(persona_info(&world, "Hero").status, PersonaStatus::Available);

    create_persona(&world, 1, "Hero");
    assert_eq!(persona_info(&world, "hero").status, PersonaStatus::Pending);

    world.tick().unwrap();
    let reply = persona_info(&world, "HERO");
    assert_eq!(reply.status, PersonaStatus::Assigned);
    assert_eq!(reply.persona.signer_address, address(1));
}

#[test]
fn transactions_are_validated_on_intake() {
    let world = persona_world();
    create_persona(&world, 1, "Hero");
    world.tick().unwrap();
    let attack = json!({ "target": 0, "damage": 1 });

    let missing_tag = signed(1, "", 1, attack.clone());
    assert!(matches!(world.add_transaction(Attack::NAME, missing_tag), Err(WorldError::MissingPersonaTag)));

    let unknown = signed(1, "Nobody", 1, attack.clone());
    assert!(matches!(world.add_transaction(Attack::NAME, unknown), Err(WorldError::PersonaNotFound(_))));

    let foreign = signed(2, "Hero", 1, attack.clone());
    assert!(matches!(
        world.add_transaction(Attack::NAME, foreign),
        Err(WorldError::SignerNotAuthorized { .. })
    ));

    let mut tampered = signed(1, "Hero", 1, attack.clone());
    tampered.body = json!({ "target": 0, "damage": 1000 });
    assert!(matches!(
        world.add_transaction(Attack::NAME, tampered),
        Err(WorldError::Signature(SignatureError::HashMismatch { .. }))
    ));

    let wrong_namespace =
        world_engine::SignedTransaction::sign(&key(1), "other-world", "Hero", 1, attack.clone()).unwrap();
    assert!(matches!(
        world.add_transaction(Attack::NAME, wrong_namespace),
        Err(WorldError::NamespaceMismatch { .. })
    ));

    assert!(matches!(
        world.add_transaction("combat.unknown", signed(1, "Hero", 1, attack.clone())),
        Err(WorldError::MessageNotFound(_))
    ));

    assert_eq!(world.pending_transactions(), 0);
    world.add_transaction(Attack::NAME, signed(1, "Hero", 1, attack)).unwrap();
    assert_eq!(world.pending_transactions(), 1);
}

#[test]
fn owner_can_authorize_another_address() {
    let world = persona_world();
    create_persona(&world, 1, "Hero");
    world.tick().unwrap();

    let authorize = signed(1, "Hero", 1, json!({ "address": address(3).to_uppercase() }));
    let hash = world.add_transaction(AuthorizePersonaAddress::NAME, authorize).unwrap();
    let repeat = signed(1, "Hero", 2, json!({ "address": address(3) }));
    world.add_transaction(AuthorizePersonaAddress::NAME, repeat).unwrap();
    world.tick().unwrap();

    let receipt = world.receipt(&hash).unwrap();
    assert_eq!(receipt.result["authorizedAddress"], address(3));
    let persona = world.persona("Hero").unwrap().unwrap();
    assert_eq!(persona.authorized_addresses, vec![address(3)]);

    let hero = world.read_only().search(ComponentFilter::exact(["Persona"])).first().unwrap().unwrap();
    let attack = signed(3, "Hero", 1, json!({ "target": hero, "damage": 1 }));
    world.add_transaction(Attack::NAME, attack).unwrap();
}

#[test]
fn only_the_owner_may_authorize() {
    let world = persona_world();
    create_persona(&world, 1, "Hero");
    world.tick().unwrap();

    let authorize = signed(1, "Hero", 1, json!({ "address": address(2) }));
    world.add_transaction(AuthorizePersonaAddress::NAME, authorize).unwrap();
    world.tick().unwrap();

    // address 2 may now act for Hero but does not own it
    let grant = signed(2, "Hero", 1, json!({ "address": address(4) }));
    let hash = world.add_transaction(AuthorizePersonaAddress::NAME, grant).unwrap();
    world.tick().unwrap();

    let receipt = world.receipt(&hash).unwrap();
    assert!(receipt.errors[0].contains("does not own"));
    assert!(!world.persona("Hero").unwrap().unwrap().allows(&address(4)));
}

#[test]
fn message_handler_errors_only_fail_their_transaction() {
    let world = persona_world();
    create_persona(&world, 1, "Hero");
    world.tick().unwrap();

    let hit_nobody = world
        .add_transaction(Attack::NAME, signed(1, "Hero", 1, json!({ "target": 999, "damage": 1 })))
        .unwrap();
    world.tick().unwrap();

    let receipt = world.receipt(&hit_nobody).unwrap();
    assert!(!receipt.is_success());
    assert_eq!(receipt.tick, 2);
    assert_eq!(world.last_finalized_tick(), 2);
}
