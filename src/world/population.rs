//! Population manager: block-driven carrier creation, passenger spawning,
//! pruning, cleanup and the per-tick visibility filter.

use rand::Rng;

use crate::feed::synthetic::pseudo_transaction;
use crate::logging::{log, obj, v_num, v_str, v_u64, Domain, Level};
use crate::model::{Block, BlockOrigin, CarrierId, PassengerId, Transaction, Vec2};
use crate::world::carrier::{Carrier, CarrierState};
use crate::world::passenger::{spawn_point, Passenger, PassengerState};
use crate::world::WorldState;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub carriers_removed: usize,
    pub carriers_capped: usize,
    pub passengers_culled: usize,
    pub particles_swept: usize,
}

impl WorldState {
    pub(crate) fn spawn_initial(&mut self, now_ms: u64) {
        for _ in 0..self.cfg.initial_passengers {
            self.spawn_passenger(None, now_ms);
        }
    }

    /// Apply one polled block. Returns the carrier created for it, if any.
    pub fn apply_block(&mut self, block: Block, now_ms: u64) -> Option<CarrierId> {
        let latest = self.network.block_height;
        // Synthetic heights are clock-derived; the first live block after
        // them becomes the new baseline whatever its height.
        let rebase = block.origin == BlockOrigin::Live
            && self.network.origin == Some(BlockOrigin::Synthetic);
        if self.network.origin.is_some() && block.height < latest && !rebase {
            self.counters.stale_blocks += 1;
            log(
                Level::Debug,
                Domain::Population,
                "stale_block",
                obj(&[("block_height", v_u64(block.height)), ("latest", v_u64(latest))]),
            );
            return None;
        }
        let is_new = self.network.origin.is_none() || block.height > latest || rebase;
        if rebase {
            log(
                Level::Info,
                Domain::Population,
                "live_rebase",
                obj(&[("block_height", v_u64(block.height)), ("synthetic_height", v_u64(latest))]),
            );
        }

        self.network.block_height = block.height;
        self.network.transaction_count = block.transaction_count;
        self.network.tps = block.transaction_count as f64 / self.cfg.block_time_secs();
        self.network.gas_price_gwei = block.gas_price_gwei;
        self.network.origin = Some(block.origin);
        self.network.last_block_ms = now_ms;

        if !is_new {
            return None;
        }

        self.blocks_since_carrier += 1;
        let should_create = self.blocks_since_carrier >= self.cfg.blocks_per_update
            || self.carrier_queue > 0
            || self.carriers.is_empty();
        if !should_create {
            return None;
        }
        let id = self.create_carrier(&block, now_ms);
        self.carrier_queue = 0;
        self.blocks_since_carrier = 0;

        let newly = self
            .achievements
            .check_population(self.carriers.len(), self.passengers.len());
        for a in newly {
            self.celebrate(a);
        }
        Some(id)
    }

    /// One carrier for the block, then one walking passenger per confirmed
    /// transaction, in that order.
    pub fn create_carrier(&mut self, block: &Block, now_ms: u64) -> CarrierId {
        let id = CarrierId(self.next_carrier_id);
        self.next_carrier_id += 1;

        let span = (self.cfg.canvas_width - 500.0).max(1.0);
        let x = 250.0 + self.rng.gen::<f64>() * span;
        let y = self.cfg.launch_height.min(self.cfg.canvas_height - 150.0);
        let size = 45.0 + self.rng.gen::<f64>() * 20.0;
        let mut carrier = Carrier::new(
            id,
            block.height,
            block.hash.clone(),
            block.transaction_count,
            Vec2::new(x, y),
            size,
            now_ms,
            self.cfg.wait_timeout_ms,
        );
        carrier.wind_offset = self.rng.gen::<f64>() * std::f64::consts::TAU;
        let boarding = carrier.boarding_point();
        self.carriers.insert(carrier);
        self.counters.carriers_created += 1;

        let room = self.cfg.max_passengers.saturating_sub(self.passengers.len());
        let riders: Vec<Transaction> = block
            .confirmed_transactions()
            .take(block.transaction_count.min(room))
            .cloned()
            .collect();
        let riders_len = riders.len();
        for tx in riders {
            let pid = self.spawn_passenger(Some(tx), now_ms);
            let speed = self.cfg.walk_speed + self.rng.gen::<f64>();
            if let Some(p) = self.passenger_mut(pid) {
                p.walk_to(id, boarding, speed);
            }
        }

        log(
            Level::Info,
            Domain::Carrier,
            "created",
            obj(&[
                ("carrier_id", v_str(&id.to_string())),
                ("block_height", v_u64(block.height)),
                ("capacity", v_u64(block.transaction_count as u64)),
                ("riders", v_u64(riders_len as u64)),
                (
                    "origin",
                    v_str(match block.origin {
                        BlockOrigin::Live => "live",
                        BlockOrigin::Synthetic => "synthetic",
                    }),
                ),
            ]),
        );
        id
    }

    /// Add a waiting passenger. Without a transaction it gets the next
    /// pseudo transaction.
    pub fn spawn_passenger(&mut self, tx: Option<Transaction>, now_ms: u64) -> PassengerId {
        let id = PassengerId(self.next_passenger_id);
        self.next_passenger_id += 1;
        let tx = tx.unwrap_or_else(|| {
            let t = pseudo_transaction(self.pseudo_index, now_ms);
            self.pseudo_index += 1;
            t
        });
        let position = spawn_point(&mut self.rng, &self.cfg);
        self.passengers.push(Passenger::new(id, tx, position, now_ms));
        self.counters.passengers_created += 1;
        id
    }

    /// Passengers on the ground and not yet committed to a carrier trip.
    pub fn waiting_count(&self) -> usize {
        self.passengers
            .iter()
            .filter(|p| {
                matches!(
                    p.state,
                    PassengerState::Waiting | PassengerState::Walking | PassengerState::Returning
                )
            })
            .count()
    }

    /// Throughput-scaled random spawn, bounded by both ceilings.
    pub(crate) fn spawn_unbound(&mut self, now_ms: u64) -> usize {
        if self.passengers.len() >= self.cfg.max_passengers {
            return 0;
        }
        let idle = self.passengers.iter().filter(|p| p.state.is_idle()).count();
        if idle >= self.cfg.max_waiting_passengers {
            return 0;
        }
        let chance = self.cfg.spawn_rate * (1.0 + self.network.tps / 20.0);
        if self.rng.gen::<f64>() >= chance {
            return 0;
        }
        self.spawn_passenger(None, now_ms);
        1
    }

    /// Remove bound passengers that missed their block: more than one
    /// block behind, or their block's carrier is gone, and not aboard.
    pub fn prune_stale(&mut self) -> usize {
        let latest = self.network.block_height;
        let carriers = &self.carriers;
        let before = self.passengers.len();
        self.passengers = std::mem::take(&mut self.passengers)
            .into_iter()
            .filter(|p| {
                let Some(h) = p.transaction.bound_height() else {
                    return true;
                };
                if p.is_aboard() {
                    return true;
                }
                !(p.is_stale(latest) || carriers.for_height(h).is_none())
            })
            .collect();
        let pruned = before - self.passengers.len();
        if pruned > 0 {
            self.counters.passengers_pruned += pruned as u64;
            log(
                Level::Debug,
                Domain::Population,
                "pruned_stale",
                obj(&[("count", v_u64(pruned as u64)), ("latest", v_u64(latest))]),
            );
        }
        pruned
    }

    /// Periodic sweep: faded carriers, the carrier ceiling, excess idle
    /// passengers (oldest first) and dead particles.
    pub fn cleanup(&mut self, _now_ms: u64) -> CleanupReport {
        let mut report = CleanupReport {
            carriers_removed: self.carriers.remove_faded(),
            ..Default::default()
        };

        if self.carriers.len() > self.cfg.max_carriers {
            let extra = self.carriers.len() - self.cfg.max_carriers;
            let oldest: Vec<CarrierId> = self.carriers.ids().into_iter().take(extra).collect();
            for id in oldest {
                let returned = match self.carriers.get_mut(id) {
                    Some(c) if c.state != CarrierState::Gone => {
                        report.carriers_capped += 1;
                        c.force_gone()
                    }
                    _ => continue,
                };
                self.return_passengers(&returned);
            }
        }

        if self.passengers.len() > self.cfg.max_passengers {
            let excess = self.passengers.len() - self.cfg.max_passengers;
            let cull: Vec<PassengerId> = self
                .passengers
                .iter()
                .filter(|p| p.state.is_idle())
                .take(excess)
                .map(|p| p.id)
                .collect();
            report.passengers_culled = cull.len();
            self.passengers = std::mem::take(&mut self.passengers)
                .into_iter()
                .filter(|p| !cull.contains(&p.id))
                .collect();
        }

        report.particles_swept = self.particles.sweep();

        log(
            Level::Debug,
            Domain::Population,
            "cleanup",
            obj(&[
                ("carriers", v_u64(self.carriers.len() as u64)),
                ("passengers", v_u64(self.passengers.len() as u64)),
                ("particles", v_u64(self.particles.len() as u64)),
                ("carriers_removed", v_u64(report.carriers_removed as u64)),
                ("carriers_capped", v_u64(report.carriers_capped as u64)),
                ("passengers_culled", v_u64(report.passengers_culled as u64)),
                ("tps", v_num(self.network.tps)),
            ]),
        );
        report
    }

    /// Indices of the passengers updated this tick. Under the cap everyone
    /// is; above it, transiting passengers first, then idle ones nearest
    /// the canvas centre.
    pub fn visible_passenger_indices(&self) -> Vec<usize> {
        let cap = self.cfg.max_visible_passengers;
        if self.passengers.len() <= cap {
            return (0..self.passengers.len()).collect();
        }
        let center = self.cfg.canvas_center();
        let mut active: Vec<usize> = Vec::new();
        let mut idle: Vec<(f64, usize)> = Vec::new();
        for (i, p) in self.passengers.iter().enumerate() {
            if p.state.is_transiting() {
                active.push(i);
            } else {
                idle.push((p.position.manhattan(center), i));
            }
        }
        idle.sort_by(|a, b| a.0.total_cmp(&b.0));
        active.truncate(cap);
        let room = cap - active.len();
        active.extend(idle.into_iter().take(room).map(|(_, i)| i));
        active.sort_unstable();
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::feed::synthetic::SyntheticGenerator;

    fn world() -> WorldState {
        let cfg = Config { initial_passengers: 0, ..Default::default() };
        WorldState::new(cfg, 0)
    }

    #[test]
    fn test_equal_height_refreshes_stats_only() {
        let mut w = world();
        let mut gen = SyntheticGenerator::new();
        assert!(w.apply_block(gen.block(10, 0), 0).is_some());
        let mut again = gen.block(10, 100);
        again.gas_price_gwei = 9.0;
        assert!(w.apply_block(again, 100).is_none());
        assert_eq!(w.carriers.len(), 1);
        assert_eq!(w.network.gas_price_gwei, 9.0);
    }

    #[test]
    fn test_stale_block_discarded() {
        let mut w = world();
        let mut gen = SyntheticGenerator::new();
        w.apply_block(gen.block(10, 0), 0);
        assert!(w.apply_block(gen.block(9, 0), 0).is_none());
        assert_eq!(w.network.block_height, 10);
        assert_eq!(w.counters.stale_blocks, 1);
    }

    #[test]
    fn test_blocks_per_update_skips_until_due() {
        let cfg = Config { initial_passengers: 0, blocks_per_update: 3, ..Default::default() };
        let mut w = WorldState::new(cfg, 0);
        let mut gen = SyntheticGenerator::new();
        // No carriers yet, so the first block creates one regardless.
        assert!(w.apply_block(gen.block(1, 0), 0).is_some());
        assert!(w.apply_block(gen.block(2, 0), 0).is_none());
        assert!(w.apply_block(gen.block(3, 0), 0).is_none());
        assert!(w.apply_block(gen.block(4, 0), 0).is_some());
    }

    #[test]
    fn test_carrier_queue_forces_creation() {
        let cfg = Config { initial_passengers: 0, blocks_per_update: 10, ..Default::default() };
        let mut w = WorldState::new(cfg, 0);
        let mut gen = SyntheticGenerator::new();
        w.apply_block(gen.block(1, 0), 0);
        w.carrier_queue = 1;
        assert!(w.apply_block(gen.block(2, 0), 0).is_some());
        assert_eq!(w.carrier_queue, 0);
    }

    #[test]
    fn test_cleanup_caps_carriers_oldest_first() {
        let cfg = Config { initial_passengers: 0, max_carriers: 2, ..Default::default() };
        let mut w = WorldState::new(cfg, 0);
        let mut gen = SyntheticGenerator::new();
        for h in 1..=4 {
            w.apply_block(gen.block(h, 0), 0);
        }
        let report = w.cleanup(0);
        assert_eq!(report.carriers_capped, 2);
        assert_eq!(w.carriers.get(CarrierId(1)).unwrap().state, CarrierState::Gone);
        assert_eq!(w.carriers.get(CarrierId(4)).unwrap().state, CarrierState::Loading);
        // Faded carriers go on the next sweep.
        assert_eq!(w.cleanup(0).carriers_removed, 2);
    }

    #[test]
    fn test_cleanup_culls_idle_passengers_only() {
        let cfg = Config { initial_passengers: 10, max_passengers: 6, ..Default::default() };
        let mut w = WorldState::new(cfg, 0);
        w.passengers[0].state = PassengerState::Walking;
        let keep = w.passengers[0].id;
        let report = w.cleanup(0);
        assert_eq!(report.passengers_culled, 4);
        assert_eq!(w.passengers.len(), 6);
        assert!(w.passenger(keep).is_some());
    }

    #[test]
    fn test_visibility_prefers_transiting() {
        let cfg = Config { initial_passengers: 10, max_visible_passengers: 4, ..Default::default() };
        let mut w = WorldState::new(cfg, 0);
        w.passengers[9].state = PassengerState::Walking;
        let visible = w.visible_passenger_indices();
        assert_eq!(visible.len(), 4);
        assert!(visible.contains(&9));
    }

    #[test]
    fn test_spawn_respects_waiting_cap() {
        let cfg = Config {
            initial_passengers: 5,
            max_waiting_passengers: 5,
            spawn_rate: 1.0,
            ..Default::default()
        };
        let mut w = WorldState::new(cfg, 0);
        assert_eq!(w.spawn_unbound(0), 0);
    }

    #[test]
    fn test_returning_passengers_count_toward_waiting_cap() {
        let cfg = Config {
            initial_passengers: 5,
            max_waiting_passengers: 5,
            spawn_rate: 1.0,
            ..Default::default()
        };
        let mut w = WorldState::new(cfg, 0);
        for p in w.passengers.iter_mut().take(3) {
            p.return_to_waiting(Vec2::new(100.0, 600.0));
        }
        assert_eq!(w.spawn_unbound(0), 0);
        w.passengers.truncate(4);
        assert_eq!(w.spawn_unbound(0), 1);
    }

    #[test]
    fn test_live_block_supersedes_synthetic_height() {
        let mut w = world();
        let mut gen = SyntheticGenerator::new();
        assert!(w.apply_block(gen.block(78_000_000, 0), 0).is_some());

        let mut live = gen.block(40_000_001, 500);
        live.origin = BlockOrigin::Live;
        assert!(w.apply_block(live, 500).is_some());
        assert_eq!(w.network.block_height, 40_000_001);
        assert_eq!(w.network.origin, Some(BlockOrigin::Live));
        assert_eq!(w.counters.stale_blocks, 0);

        // Once live, lower heights are stale again whatever their origin.
        assert!(w.apply_block(gen.block(39_000_000, 600), 600).is_none());
        assert_eq!(w.counters.stale_blocks, 1);
        assert_eq!(w.network.block_height, 40_000_001);
    }
}
