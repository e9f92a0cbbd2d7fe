//! Properties that must hold for any run, checked over long seeded runs
//! and hand-built edge cases.

use std::collections::HashMap;

use txflight::config::{CarrierKind, Config};
use txflight::feed::classify::{classify, normalize_block};
use txflight::feed::synthetic::SyntheticGenerator;
use txflight::feed::{RawBlock, RawTransaction};
use txflight::model::{CarrierId, PassengerId, TransactionCategory, Vec2};
use txflight::reliability::inject::FaultProfile;
use txflight::reliability::{EntityFault, EntityRef, Fault, ReloadRequest};
use txflight::verify::invariants;
use txflight::world::carrier::{Carrier, CarrierEvent, CarrierState, FlightEnv};
use txflight::world::passenger::PassengerState;
use txflight::world::WorldState;

fn raw_block(height: u64, txs: usize) -> RawBlock {
    let txs = (0..txs)
        .map(|i| {
            let category = TransactionCategory::from_index(i);
            let input = category.canonical_signature().unwrap_or("0x60806040");
            RawTransaction::new(&format!("0x{:x}{:02x}", height, i), input, 0)
        })
        .collect();
    RawBlock::new(height, 1_700_000_000, 1_000_000_000).with_transactions(txs)
}

fn assert_single_membership(world: &WorldState) {
    let mut seen: HashMap<PassengerId, CarrierId> = HashMap::new();
    for c in world.carriers.iter() {
        for b in &c.passengers {
            if let Some(other) = seen.insert(b.passenger, c.id) {
                panic!("{} aboard both {} and {}", b.passenger, other, c.id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Capacity and single membership under load and injected faults
// ---------------------------------------------------------------------------
#[test]
fn capacity_and_membership_hold_through_faulty_run() {
    for seed in [1u64, 2, 3] {
        let cfg = Config { seed, max_passengers: 150, ..Default::default() };
        let mut world = WorldState::new(cfg, 0)
            .with_fault_profile(FaultProfile { entity_fault_rate: 0.01, transport_fault_rate: 0.0 });
        let mut gen = SyntheticGenerator::new();
        let mut hook = ReloadRequest::default();

        let mut height = 1_000;
        for tick in 0..4_000u64 {
            let now = tick * 16;
            if tick % 125 == 0 {
                world.enqueue_block(gen.block(height, now));
                height += 1;
            }
            if tick % 500 == 250 {
                world.toggle_carrier_kind();
            }
            if tick % 190 == 0 {
                world.cleanup(now);
            }
            world.service_recovery(now, &mut hook);
            if let Err(fault) = world.tick(now) {
                panic!("seed {} tick {}: {}", seed, tick, fault);
            }
            for c in world.carriers.iter() {
                assert!(c.passengers.len() <= c.capacity, "{} over capacity", c.id);
            }
            assert_single_membership(&world);
            assert!(invariants::check_world(&world).is_ok());
        }
        assert!(world.counters.carriers_created > 10);
        assert!(world.counters.entity_faults > 0, "seed {} injected nothing", seed);
    }
}

// ---------------------------------------------------------------------------
// Category completeness for synthetic blocks
// ---------------------------------------------------------------------------
#[test]
fn synthetic_blocks_cover_every_category() {
    let mut gen = SyntheticGenerator::new();
    for height in 0..200u64 {
        let block = gen.block(height, height * 2_000);
        assert!(block.transaction_count >= 7);
        let present = block.categories_present();
        for category in TransactionCategory::ALL {
            assert!(present.contains(&category), "height {} lacks {}", height, category);
        }
    }
}

// ---------------------------------------------------------------------------
// Deterministic classification
// ---------------------------------------------------------------------------
#[test]
fn classification_is_deterministic() {
    let inputs = [
        ("", 0u128),
        ("0x", 1),
        ("0xa9059cbb00000000", 0),
        ("0x38ed1739ffff", 5),
        ("0xdeadbeef", 0),
        ("0xdeadbeef", 1),
        ("0x12", 0),
        ("0X095EA7B3", 0),
    ];
    for (input, value) in inputs {
        assert_eq!(classify(input, value), classify(input, value), "input {:?}", input);
    }

    let raw = raw_block(42, 14);
    let a = normalize_block(&raw).expect("valid block");
    let b = normalize_block(&raw).expect("valid block");
    let cats_a: Vec<TransactionCategory> = a.transactions.iter().map(|t| t.category).collect();
    let cats_b: Vec<TransactionCategory> = b.transactions.iter().map(|t| t.category).collect();
    assert_eq!(cats_a, cats_b);
    assert_eq!(cats_a[..7], TransactionCategory::ALL[..]);
}

// ---------------------------------------------------------------------------
// Forced launch never fires before the wait timeout
// ---------------------------------------------------------------------------
#[test]
fn forced_launch_waits_for_timeout() {
    let cfg = Config::default();
    let t0 = 5_000;
    let wait = cfg.wait_timeout_ms;
    let mut carrier =
        Carrier::new(CarrierId(1), 7, "0x7".into(), 4, Vec2::new(500.0, 600.0), 50.0, t0, wait);
    assert!(carrier.add_passenger(PassengerId(1), TransactionCategory::Swap));

    let mut now = t0;
    while now <= t0 + wait {
        let env = FlightEnv { now_ms: now, kind: CarrierKind::Balloon, cfg: &cfg };
        let event = carrier.update(&env).expect("healthy carrier");
        assert_eq!(event, None, "launched early at {}", now);
        assert_eq!(carrier.state, CarrierState::Loading);
        now += 250;
    }

    let env = FlightEnv { now_ms: t0 + wait + 1, kind: CarrierKind::Balloon, cfg: &cfg };
    match carrier.update(&env) {
        Ok(Some(CarrierEvent::Launched { forced, evicted })) => {
            assert!(forced);
            assert!(evicted.is_empty());
        }
        other => panic!("expected forced launch, got {:?}", other),
    }
    assert_eq!(carrier.state, CarrierState::Launching);
}

// ---------------------------------------------------------------------------
// Staleness pruning
// ---------------------------------------------------------------------------
#[test]
fn unboarded_passengers_pruned_two_blocks_later() {
    let cfg = Config { initial_passengers: 0, spawn_rate: 0.0, ..Default::default() };
    let mut world = WorldState::new(cfg, 0);

    let h = 300;
    let first = normalize_block(&raw_block(h, 3)).expect("valid block");
    world.apply_block(first, 0);
    assert_eq!(world.passengers.len(), 3);
    // One of them already made it aboard.
    world.passengers[0].state = PassengerState::Boarding;

    world.apply_block(normalize_block(&raw_block(h + 1, 2)).expect("valid block"), 100);
    assert_eq!(world.prune_stale(), 0, "one block behind is not stale yet");

    world.apply_block(normalize_block(&raw_block(h + 2, 2)).expect("valid block"), 200);
    assert_eq!(world.prune_stale(), 2);

    let remaining_for_h: Vec<_> = world
        .passengers
        .iter()
        .filter(|p| p.transaction.bound_height() == Some(h))
        .collect();
    assert_eq!(remaining_for_h.len(), 1);
    assert!(remaining_for_h[0].is_aboard());
}

// ---------------------------------------------------------------------------
// Recovery bound
// ---------------------------------------------------------------------------
#[test]
fn recovery_runs_within_delay_and_resets() {
    let cfg = Config { max_errors: 4, recovery_delay_ms: 1_500, initial_passengers: 5, ..Default::default() };
    let mut world = WorldState::new(cfg, 0);
    let mut hook = ReloadRequest::default();

    let fault = || Fault::Entity(EntityFault::Injected { entity: EntityRef::Passenger(PassengerId(1)) });
    for t in [10_000u64, 10_100, 10_200] {
        world.record_fault(fault(), t);
    }
    assert!(!world.service_recovery(20_000, &mut hook), "under threshold");

    let crossed_at = 10_300;
    world.record_fault(fault(), crossed_at);
    assert!(!world.service_recovery(crossed_at + 1_499, &mut hook));
    assert!(world.service_recovery(crossed_at + 1_500, &mut hook));
    assert_eq!(world.supervisor.error_count, 0);
    assert_eq!(world.supervisor.recoveries, 1);
    assert!(hook.take().is_none());
}
