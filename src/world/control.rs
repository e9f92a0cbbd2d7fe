//! Control surface for whatever UI sits on top of the world.

use serde::Serialize;

use crate::config::CarrierKind;
use crate::logging::{log, obj, v_str, v_u64, Domain, Level};
use crate::model::{BlockOrigin, PassengerId, Vec2};
use crate::world::achievements::Achievement;
use crate::world::carrier::CarrierState;
use crate::world::particles::BurstKind;
use crate::world::WorldState;

/// Reward per passenger aboard a destroyed carrier.
pub const REWARD_PER_PASSENGER: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HudSnapshot {
    pub block_height: u64,
    pub tps: f64,
    pub gas_price: f64,
    pub flying_carrier_count: usize,
    pub waiting_passenger_count: usize,
    pub carrier_kind: CarrierKind,
    pub total_carriers: usize,
    pub total_passengers: usize,
    pub error_count: u32,
    pub feed_origin: Option<BlockOrigin>,
}

impl WorldState {
    /// Spawn one unbound passenger on demand. `None` at the manual ceiling.
    pub fn create_manual_passenger(&mut self, now_ms: u64) -> Option<PassengerId> {
        if self.passengers.len() >= self.cfg.max_manual_passengers {
            return None;
        }
        let id = self.spawn_passenger(None, now_ms);
        let at = self.passenger(id).map(|p| p.position).unwrap_or_default();
        self.particles.burst(BurstKind::ManualSpawn, at, &mut self.rng);
        log(
            Level::Info,
            Domain::Control,
            "manual_passenger",
            obj(&[
                ("passenger_id", v_str(&id.to_string())),
                ("total", v_u64(self.passengers.len() as u64)),
            ]),
        );
        Some(id)
    }

    /// Switch balloon/zeppelin. Carriers already in the air follow the new
    /// kind from their next update.
    pub fn toggle_carrier_kind(&mut self) -> CarrierKind {
        let next = self.carrier_kind.toggled();
        self.set_carrier_kind(next);
        next
    }

    pub fn set_carrier_kind(&mut self, kind: CarrierKind) {
        if kind == self.carrier_kind {
            return;
        }
        self.carrier_kind = kind;
        log(
            Level::Info,
            Domain::Control,
            "carrier_kind",
            obj(&[("kind", v_str(kind.as_str()))]),
        );
        if self.achievements.unlock(Achievement::KindExplorer) {
            self.celebrate(Achievement::KindExplorer);
        }
    }

    /// Clear every entity and start over with the initial passengers.
    /// Network stats and the error budget are kept.
    pub fn reset_population(&mut self, now_ms: u64) {
        self.carriers.clear();
        self.passengers.clear();
        self.particles.clear();
        self.achievements.clear();
        self.carrier_queue = 0;
        self.pending_blocks.clear();
        self.blocks_since_carrier = 0;
        self.spawn_initial(now_ms);
        log(
            Level::Info,
            Domain::Control,
            "reset",
            obj(&[("passengers", v_u64(self.passengers.len() as u64))]),
        );
    }

    /// Destroy the loading carrier under `(x, y)`. Its passengers go back
    /// to waiting and a replacement is queued for the next block.
    pub fn destroy_carrier_at(&mut self, x: f64, y: f64, _now_ms: u64) -> Option<u32> {
        let point = Vec2::new(x, y);
        // Latest carriers are drawn on top, so they win the hit test.
        let id = self
            .carriers
            .iter()
            .rev()
            .find(|c| c.state == CarrierState::Loading && c.hit_test(point))
            .map(|c| c.id)?;
        let carrier = self.carriers.get_mut(id)?;
        let position = carrier.position;
        let returned = carrier.force_gone();
        let reward = returned.len() as u32 * REWARD_PER_PASSENGER;
        self.return_passengers(&returned);
        self.carrier_queue += 1;
        self.particles.burst(BurstKind::Launch, position, &mut self.rng);
        log(
            Level::Info,
            Domain::Control,
            "carrier_destroyed",
            obj(&[
                ("carrier_id", v_str(&id.to_string())),
                ("reward", v_u64(reward as u64)),
                ("returned", v_u64(returned.len() as u64)),
            ]),
        );
        Some(reward)
    }

    pub fn hud_snapshot(&self) -> HudSnapshot {
        HudSnapshot {
            block_height: self.network.block_height,
            tps: self.network.tps,
            gas_price: self.network.gas_price_gwei,
            flying_carrier_count: self
                .carriers
                .iter()
                .filter(|c| matches!(c.state, CarrierState::Launching | CarrierState::Flying))
                .count(),
            waiting_passenger_count: self.waiting_count(),
            carrier_kind: self.carrier_kind,
            total_carriers: self.carriers.len(),
            total_passengers: self.passengers.len(),
            error_count: self.supervisor.error_count,
            feed_origin: self.network.origin,
        }
    }
}
