//! Soak run on a simulated clock.
//!
//! Drives the runtime with a flaky simulated chain and injected entity faults,
//! checks world invariants after every frame, and prints a JSON summary.
//!
//! Usage: FRAMES=20000 FAULT_ENTITY_RATE=0.01 FAULT_TRANSPORT_RATE=0.3 \
//!        cargo run --release --bin soak

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

use txflight::config::Config;
use txflight::feed::retry::RetryConfig;
use txflight::feed::{BlockSource, FeedAdapter, RawBlock, RawTransaction};
use txflight::model::TransactionCategory;
use txflight::reliability::inject::{FaultProfile, FlakySource};
use txflight::runtime::{NullSurface, Runtime};
use txflight::scheduler::Scheduler;
use txflight::verify::invariants;
use txflight::world::WorldState;

/// Chain stand-in: one new block every `polls_per_block` fetches, each with
/// a rotating mix of categorised transactions.
struct SimulatedChain {
    base_height: u64,
    polls_per_block: u64,
    calls: AtomicU64,
}

#[async_trait]
impl BlockSource for SimulatedChain {
    async fn fetch_latest_block(&self) -> Result<RawBlock> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let height = self.base_height + n / self.polls_per_block.max(1);
        let tx_count = 1 + (height % 12) as usize;
        let txs = (0..tx_count)
            .map(|i| {
                let category = TransactionCategory::from_index(height as usize + i);
                let input = category.canonical_signature().unwrap_or("0x60806040");
                RawTransaction::new(&format!("0x{:x}{:04x}", height, i), input, 0)
            })
            .collect();
        Ok(RawBlock::new(height, 1_700_000_000 + height * 2, 2_000_000_000).with_transactions(txs))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    let frames: u64 = env_or("FRAMES", 20_000);
    let seed: u64 = env_or("SEED", 42);
    let mut profile = FaultProfile::from_env();
    if !profile.is_enabled() {
        profile = FaultProfile { entity_fault_rate: 0.005, transport_fault_rate: 0.3 };
    }

    let cfg = Config {
        rpc_url: "offline".to_string(),
        seed,
        ..Config::default()
    };
    cfg.validate()?;

    let start_ms = 1_700_000_000_000u64;
    let chain = SimulatedChain {
        base_height: 1_000_000,
        polls_per_block: (cfg.block_time_ms / cfg.poll_interval_ms).max(1),
        calls: AtomicU64::new(0),
    };
    let source = FlakySource::new(chain, profile.transport_fault_rate, seed);
    let mut feed = FeedAdapter::new(Box::new(source), cfg.block_time_ms)
        .with_retry(RetryConfig::immediate());
    let world = WorldState::new(cfg.clone(), start_ms).with_fault_profile(profile.clone());
    let scheduler = Scheduler::from_config(&cfg, start_ms);
    let mut runtime = Runtime::with_world(world, scheduler, NullSurface);
    let mut rng = StdRng::seed_from_u64(seed ^ 0x5eed);

    let mut now = start_ms;
    let mut next_poll = start_ms;
    let mut violations = 0u64;
    let mut peak_carriers = 0usize;
    let mut peak_passengers = 0usize;
    let mut destroyed = 0u64;

    for _ in 0..frames {
        if now >= next_poll {
            let outcome = feed.poll(now).await;
            runtime.deliver(outcome, now);
            next_poll = now + cfg.poll_interval_ms;
        }

        // Occasional user input.
        let roll: f64 = rng.gen();
        if roll < 0.002 {
            runtime.world.create_manual_passenger(now);
        } else if roll < 0.003 {
            let x = rng.gen_range(0.0..cfg.canvas_width);
            let y = rng.gen_range(0.0..cfg.canvas_height);
            if runtime.world.destroy_carrier_at(x, y, now).is_some() {
                destroyed += 1;
            }
        } else if roll < 0.0032 {
            runtime.world.toggle_carrier_kind();
        }

        runtime.frame(now);
        if let Err(v) = invariants::check_world(&runtime.world) {
            violations += 1;
            eprintln!("[soak] invariant violation at {}: {}", now, v);
        }
        peak_carriers = peak_carriers.max(runtime.world.carriers.len());
        peak_passengers = peak_passengers.max(runtime.world.passengers.len());
        now += cfg.frame_interval_ms;
    }

    let summary = runtime.summary();
    println!(
        "{}",
        json!({
            "frames": frames,
            "simulated_ms": now - start_ms,
            "polls": feed.polls,
            "fallbacks": feed.fallbacks,
            "violations": violations,
            "peak_carriers": peak_carriers,
            "peak_passengers": peak_passengers,
            "destroyed": destroyed,
            "profile": {
                "entity_fault_rate": profile.entity_fault_rate,
                "transport_fault_rate": profile.transport_fault_rate,
            },
            "summary": summary,
        })
    );

    if violations > 0 {
        return Err(anyhow!("{} invariant violations", violations));
    }
    Ok(())
}
