//! The simulation world: carriers, passengers and everything that ties
//! them to the feed. All mutation happens inside `tick` or the periodic
//! tasks, never mid-traversal.

pub mod achievements;
pub mod carrier;
pub mod control;
pub mod particles;
pub mod passenger;
pub mod population;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

use crate::config::{CarrierKind, Config};
use crate::logging::{log, obj, v_str, v_u64, Domain, Level, PopulationSummary, ProfileScope};
use crate::model::{Block, BlockOrigin, CarrierId, PassengerId, Vec2};
use crate::reliability::fault::{EntityFault, EntityRef, Fault, SystemFault};
use crate::reliability::inject::{mix, should_fault, FaultProfile};
use crate::reliability::supervisor::{EscalationHook, RecoverySupervisor};
use crate::verify::invariants;
use achievements::{Achievement, Achievements};
use carrier::{CarrierEvent, CarrierRegistry, CarrierState, FlightEnv};
use particles::{BurstKind, ParticleField};
use passenger::{waiting_spot, Passenger, PassengerOutcome, PassengerState, WalkEnv};

/// Latest network figures, as shown on the HUD.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkStats {
    pub block_height: u64,
    pub tps: f64,
    pub gas_price_gwei: f64,
    pub transaction_count: usize,
    pub origin: Option<BlockOrigin>,
    pub last_block_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub blocks_applied: usize,
    pub carriers_created: usize,
    pub launches: usize,
    pub passengers_updated: usize,
    pub passengers_removed: usize,
    pub spawned: usize,
    pub faults: usize,
}

/// Lifetime counters, for summaries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorldCounters {
    pub carriers_created: u64,
    pub passengers_created: u64,
    pub passengers_pruned: u64,
    pub stale_blocks: u64,
    pub forced_launches: u64,
    pub entity_faults: u64,
}

fn inject_roll(profile: &FaultProfile, seed: u64, tick: u64, salt: u64) -> bool {
    profile.entity_fault_rate > 0.0
        && should_fault(mix(seed ^ (tick << 20) ^ salt), profile.entity_fault_rate)
}

pub struct WorldState {
    pub cfg: Config,
    pub carrier_kind: CarrierKind,
    pub carriers: CarrierRegistry,
    pub passengers: Vec<Passenger>,
    pub particles: ParticleField,
    pub network: NetworkStats,
    pub supervisor: RecoverySupervisor,
    pub achievements: Achievements,
    pub fault_profile: FaultProfile,
    pub counters: WorldCounters,
    /// Replacement carriers requested by user destruction.
    pub carrier_queue: u32,
    pending_blocks: VecDeque<Block>,
    blocks_since_carrier: u32,
    next_carrier_id: u64,
    next_passenger_id: u64,
    pseudo_index: u64,
    pub tick_seq: u64,
    rng: StdRng,
}

impl WorldState {
    pub fn new(cfg: Config, now_ms: u64) -> Self {
        let supervisor =
            RecoverySupervisor::new(cfg.max_errors, cfg.recovery_delay_ms, cfg.error_forgive_ms);
        let mut world = Self {
            carrier_kind: cfg.carrier_kind,
            carriers: CarrierRegistry::new(),
            passengers: Vec::new(),
            particles: ParticleField::new(cfg.max_particles),
            network: NetworkStats::default(),
            supervisor,
            achievements: Achievements::new(),
            fault_profile: FaultProfile::disabled(),
            counters: WorldCounters::default(),
            carrier_queue: 0,
            pending_blocks: VecDeque::new(),
            blocks_since_carrier: 0,
            next_carrier_id: 1,
            next_passenger_id: 1,
            pseudo_index: 0,
            tick_seq: 0,
            rng: StdRng::seed_from_u64(cfg.seed),
            cfg,
        };
        world.spawn_initial(now_ms);
        world
    }

    pub fn with_fault_profile(mut self, profile: FaultProfile) -> Self {
        self.fault_profile = profile;
        self
    }

    pub fn passenger(&self, id: PassengerId) -> Option<&Passenger> {
        self.passengers.iter().find(|p| p.id == id)
    }

    pub fn passenger_mut(&mut self, id: PassengerId) -> Option<&mut Passenger> {
        self.passengers.iter_mut().find(|p| p.id == id)
    }

    pub fn pending_blocks(&self) -> usize {
        self.pending_blocks.len()
    }

    /// Queue a block from the poll path; it is applied at the start of the
    /// next tick.
    pub fn enqueue_block(&mut self, block: Block) {
        self.pending_blocks.push_back(block);
    }

    /// One full update pass: queued blocks, carriers, passengers, particles,
    /// then an invariant check.
    pub fn tick(&mut self, now_ms: u64) -> Result<TickReport, SystemFault> {
        self.tick_seq += 1;
        let _profile = ProfileScope::with_context(
            "world_tick",
            &[
                ("tick", v_u64(self.tick_seq)),
                ("carriers", v_u64(self.carriers.len() as u64)),
                ("passengers", v_u64(self.passengers.len() as u64)),
            ],
        );
        let mut report = TickReport::default();

        while let Some(block) = self.pending_blocks.pop_front() {
            report.blocks_applied += 1;
            if self.apply_block(block, now_ms).is_some() {
                report.carriers_created += 1;
            }
        }

        // Zero-passenger or not, a carrier loading for too long is errored out.
        let stuck: Vec<(CarrierId, u64)> = self
            .carriers
            .iter()
            .filter(|c| c.is_stuck(now_ms, self.cfg.stuck_timeout_ms))
            .map(|c| (c.id, c.age_ms(now_ms)))
            .collect();
        for (carrier, age_ms) in stuck {
            self.fault_carrier(carrier, EntityFault::Stuck { carrier, age_ms }, now_ms);
            report.faults += 1;
        }

        report.launches += self.update_carriers(now_ms, &mut report.faults);

        report.spawned += self.spawn_unbound(now_ms);
        self.update_passengers(now_ms, &mut report);

        self.particles.update();

        invariants::check_world(self)
            .map_err(|v| SystemFault::new(format!("invariant violated after tick: {}", v.msg)))?;
        Ok(report)
    }

    fn update_carriers(&mut self, now_ms: u64, faults: &mut usize) -> usize {
        let env = FlightEnv { now_ms, kind: self.carrier_kind, cfg: &self.cfg };
        let mut results = Vec::with_capacity(self.carriers.len());
        for carrier in self.carriers.iter_mut() {
            let injected = carrier.state != CarrierState::Gone
                && inject_roll(&self.fault_profile, self.cfg.seed, self.tick_seq, carrier.id.0);
            let result = if injected {
                Err(EntityFault::Injected { entity: EntityRef::Carrier(carrier.id) })
            } else {
                carrier.update(&env)
            };
            results.push((carrier.id, carrier.position, result));
        }

        let mut launches = 0;
        for (id, position, result) in results {
            match result {
                Ok(Some(CarrierEvent::Launched { forced, evicted })) => {
                    launches += 1;
                    // A departure frees a slot; the next new block refills it.
                    self.carrier_queue += 1;
                    if forced {
                        self.counters.forced_launches += 1;
                    }
                    for pid in &evicted {
                        let spot = waiting_spot(&mut self.rng, &self.cfg);
                        if let Some(p) = self.passenger_mut(*pid) {
                            p.return_to_waiting(spot);
                        }
                    }
                    self.particles.burst(BurstKind::Launch, position, &mut self.rng);
                    log(
                        Level::Info,
                        Domain::Carrier,
                        "launched",
                        obj(&[
                            ("carrier_id", v_str(&id.to_string())),
                            ("forced", serde_json::Value::Bool(forced)),
                            ("evicted", v_u64(evicted.len() as u64)),
                        ]),
                    );
                }
                Ok(Some(CarrierEvent::TookOff { speed, dominant })) => {
                    log(
                        Level::Debug,
                        Domain::Carrier,
                        "took_off",
                        obj(&[
                            ("carrier_id", v_str(&id.to_string())),
                            ("speed", serde_json::json!(speed)),
                            ("dominant", v_str(dominant.map(|c| c.as_str()).unwrap_or("none"))),
                        ]),
                    );
                }
                Ok(Some(CarrierEvent::Exited)) | Ok(Some(CarrierEvent::OutOfBounds)) => {
                    log(
                        Level::Debug,
                        Domain::Carrier,
                        "gone",
                        obj(&[("carrier_id", v_str(&id.to_string()))]),
                    );
                }
                Ok(None) => {}
                Err(fault) => {
                    *faults += 1;
                    self.fault_carrier(id, fault, now_ms);
                }
            }
        }
        launches
    }

    fn update_passengers(&mut self, now_ms: u64, report: &mut TickReport) {
        report.passengers_removed += self.prune_stale();

        let visible = self.visible_passenger_indices();
        let env = WalkEnv { now_ms, cfg: &self.cfg };
        let mut removed: HashSet<PassengerId> = HashSet::new();
        let mut faulted: Vec<(usize, EntityFault)> = Vec::new();

        for &i in &visible {
            let salt = self.passengers[i].id.0 | (1 << 63);
            let injected = inject_roll(&self.fault_profile, self.cfg.seed, self.tick_seq, salt);
            let p = &mut self.passengers[i];
            let result = if injected {
                Err(EntityFault::Injected { entity: EntityRef::Passenger(p.id) })
            } else {
                p.update(&mut self.carriers, &env, &mut self.rng)
            };
            report.passengers_updated += 1;
            match result {
                Ok(PassengerOutcome::Stay) => {}
                Ok(PassengerOutcome::Remove) => {
                    removed.insert(p.id);
                }
                Err(fault) => faulted.push((i, fault)),
            }
        }

        for (i, fault) in faulted {
            report.faults += 1;
            self.fault_passenger(i, fault, now_ms);
        }

        if !removed.is_empty() {
            report.passengers_removed += removed.len();
            self.passengers = std::mem::take(&mut self.passengers)
                .into_iter()
                .filter(|p| !removed.contains(&p.id))
                .collect();
        }
    }

    /// Force a carrier to `Gone`, hand its passengers back, count the fault.
    pub fn fault_carrier(&mut self, id: CarrierId, fault: EntityFault, now_ms: u64) {
        let returned = match self.carriers.get_mut(id) {
            Some(c) => c.force_gone(),
            None => Vec::new(),
        };
        self.return_passengers(&returned);
        log(
            Level::Warn,
            Domain::Carrier,
            "carrier_fault",
            obj(&[
                ("entity", v_str(&fault.entity().to_string())),
                ("kind", v_str(fault.kind())),
                ("returned", v_u64(returned.len() as u64)),
                ("msg", v_str(&fault.to_string())),
            ]),
        );
        self.record_fault(Fault::Entity(fault), now_ms);
    }

    /// Reset a passenger to a safe waiting spot, detached from any carrier.
    fn fault_passenger(&mut self, index: usize, fault: EntityFault, now_ms: u64) {
        let spot = Vec2::new(
            100.0 + self.rng.gen::<f64>() * 200.0,
            self.cfg.canvas_height - 150.0,
        );
        let Some(p) = self.passengers.get_mut(index) else {
            return;
        };
        if let Some(cid) = p.carrier {
            if let Some(c) = self.carriers.get_mut(cid) {
                c.remove_passenger(p.id);
            }
        }
        p.reset_to(spot);
        log(
            Level::Warn,
            Domain::Passenger,
            "passenger_fault",
            obj(&[
                ("entity", v_str(&fault.entity().to_string())),
                ("kind", v_str(fault.kind())),
                ("msg", v_str(&fault.to_string())),
            ]),
        );
        self.record_fault(Fault::Entity(fault), now_ms);
    }

    pub(crate) fn return_passengers(&mut self, ids: &[PassengerId]) {
        for pid in ids {
            let spot = waiting_spot(&mut self.rng, &self.cfg);
            if let Some(p) = self.passengers.iter_mut().find(|p| p.id == *pid) {
                p.return_to_waiting(spot);
            }
        }
    }

    /// Count a fault against the error budget.
    pub fn record_fault(&mut self, fault: Fault, now_ms: u64) -> bool {
        if let Fault::Entity(_) = fault {
            self.counters.entity_faults += 1;
        }
        self.supervisor.record(&fault, now_ms)
    }

    /// Soft recovery: expire empty loading carriers, reset the budget,
    /// clean up, and re-verify. An error here means escalation.
    pub fn soft_recovery(&mut self, now_ms: u64) -> Result<(), SystemFault> {
        let empties: Vec<CarrierId> = self
            .carriers
            .iter()
            .filter(|c| c.state == CarrierState::Loading && c.passengers.is_empty())
            .map(|c| c.id)
            .collect();
        for id in &empties {
            if let Some(c) = self.carriers.get_mut(*id) {
                c.force_gone();
            }
        }
        self.supervisor.complete_recovery();
        self.supervisor.last_error_ms = None;
        self.cleanup(now_ms);

        let center = self.cfg.canvas_center();
        self.particles.burst(BurstKind::Achievement, center, &mut self.rng);
        log(
            Level::Info,
            Domain::Recovery,
            "soft_recovery",
            obj(&[
                ("expired_carriers", v_u64(empties.len() as u64)),
                ("recoveries", v_u64(self.supervisor.recoveries)),
            ]),
        );

        invariants::check_world(self)
            .map_err(|v| SystemFault::new(format!("soft recovery left bad state: {}", v.msg)))
    }

    /// Run a scheduled soft recovery if it is due. Returns true if one ran.
    pub fn service_recovery(&mut self, now_ms: u64, hook: &mut dyn EscalationHook) -> bool {
        if !self.supervisor.recovery_due(now_ms) {
            return false;
        }
        if let Err(fault) = self.soft_recovery(now_ms) {
            self.supervisor.escalate(&fault, hook);
        }
        true
    }

    /// Long-period check: expire carriers stuck well past the tick check,
    /// forgive old errors, cull an overgrown population.
    pub fn health_check(&mut self, now_ms: u64) {
        let stuck: Vec<(CarrierId, u64)> = self
            .carriers
            .iter()
            .filter(|c| c.is_stuck(now_ms, self.cfg.health_stuck_ms))
            .map(|c| (c.id, c.age_ms(now_ms)))
            .collect();
        for (carrier, age_ms) in &stuck {
            self.fault_carrier(*carrier, EntityFault::Stuck { carrier: *carrier, age_ms: *age_ms }, now_ms);
        }
        let forgiven = self.supervisor.forgive(now_ms);
        let overgrown = self.passengers.len() as f64 > self.cfg.max_passengers as f64 * 1.5;
        if overgrown {
            self.cleanup(now_ms);
        }
        log(
            Level::Debug,
            Domain::Recovery,
            "health_check",
            obj(&[
                ("stuck", v_u64(stuck.len() as u64)),
                ("forgiven", serde_json::Value::Bool(forgiven)),
                ("error_count", v_u64(self.supervisor.error_count as u64)),
                ("overgrown", serde_json::Value::Bool(overgrown)),
            ]),
        );
    }

    pub(crate) fn celebrate(&mut self, achievement: Achievement) {
        let center = self.cfg.canvas_center();
        self.particles.burst(BurstKind::Achievement, center, &mut self.rng);
        log(
            Level::Info,
            Domain::Population,
            "achievement",
            obj(&[("title", v_str(achievement.title()))]),
        );
    }

    pub fn summary(&self) -> PopulationSummary {
        PopulationSummary {
            block_height: self.network.block_height,
            carriers: self.carriers.len(),
            loading_carriers: self.carriers.count_in(CarrierState::Loading),
            passengers: self.passengers.len(),
            waiting_passengers: self
                .passengers
                .iter()
                .filter(|p| p.state == PassengerState::Waiting)
                .count(),
            particles: self.particles.len(),
            error_count: self.supervisor.error_count,
            recoveries: self.supervisor.recoveries,
            ticks: self.tick_seq,
        }
    }
}
