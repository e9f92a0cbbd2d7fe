//! Drives the world: feed deliveries, scheduled maintenance, ticks and the
//! draw pass, all on one cooperative loop.

use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::Config;
use crate::feed::{BlockSource, FeedAdapter, PollOutcome};
use crate::logging::{log, log_checkpoint, obj, v_num, v_str, v_u64, Domain, Level, ProfileScope};
use crate::reliability::fault::{Fault, SystemFault};
use crate::reliability::supervisor::{ReloadRequest, SupervisorState};
use crate::scheduler::{now_ms, Scheduler, Task};
use crate::world::control::HudSnapshot;
use crate::world::WorldState;

/// Read-only consumer of world state, called once per frame after the tick.
pub trait Surface {
    fn draw(&mut self, world: &WorldState, now_ms: u64);
}

pub struct NullSurface;

impl Surface for NullSurface {
    fn draw(&mut self, _world: &WorldState, _now_ms: u64) {}
}

/// Headless surface that logs the HUD snapshot every `interval_ms`.
pub struct HudSurface {
    interval_ms: u64,
    last_ms: Option<u64>,
}

impl HudSurface {
    pub fn new(interval_ms: u64) -> Self {
        Self { interval_ms, last_ms: None }
    }
}

impl Surface for HudSurface {
    fn draw(&mut self, world: &WorldState, now_ms: u64) {
        if let Some(last) = self.last_ms {
            if now_ms.saturating_sub(last) < self.interval_ms {
                return;
            }
        }
        self.last_ms = Some(now_ms);
        let hud = world.hud_snapshot();
        let fields = match serde_json::to_value(&hud) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => obj(&[]),
        };
        log(Level::Info, Domain::Control, "hud", fields);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub frames: u64,
    pub deliveries: u64,
    pub transport_faults: u64,
    pub system_faults: u64,
    pub entity_faults: u64,
    pub recoveries: u64,
    pub escalations: u64,
    pub reloads: u64,
    pub carriers_created: u64,
    pub passengers_created: u64,
    pub hud: HudSnapshot,
}

pub struct Runtime<S: Surface> {
    pub world: WorldState,
    scheduler: Scheduler,
    reload: ReloadRequest,
    surface: S,
    pub frames: u64,
    pub deliveries: u64,
    pub transport_faults: u64,
    pub system_faults: u64,
    pub reloads: u64,
}

impl<S: Surface> Runtime<S> {
    pub fn new(cfg: Config, surface: S, now_ms: u64) -> Self {
        let scheduler = Scheduler::from_config(&cfg, now_ms);
        Self::with_world(WorldState::new(cfg, now_ms), scheduler, surface)
    }

    pub fn with_world(world: WorldState, scheduler: Scheduler, surface: S) -> Self {
        Self {
            world,
            scheduler,
            reload: ReloadRequest::default(),
            surface,
            frames: 0,
            deliveries: 0,
            transport_faults: 0,
            system_faults: 0,
            reloads: 0,
        }
    }

    /// Hand a poll result to the world. The block itself is applied on the
    /// next frame's tick.
    pub fn deliver(&mut self, outcome: PollOutcome, now_ms: u64) {
        self.deliveries += 1;
        match outcome.fault {
            Some(fault) => {
                self.transport_faults += 1;
                self.world.record_fault(Fault::Transport(fault), now_ms);
            }
            None if outcome.is_live() => self.world.supervisor.record_success(),
            None => {}
        }
        if outcome.block.height < outcome.expected_height {
            log(
                Level::Debug,
                Domain::Feed,
                "late_response",
                obj(&[
                    ("block_height", v_u64(outcome.block.height)),
                    ("expected", v_u64(outcome.expected_height)),
                ]),
            );
        }
        self.world.enqueue_block(outcome.block);
        self.sync_recovery();
    }

    pub fn record_system_fault(&mut self, fault: SystemFault, now_ms: u64) {
        self.system_faults += 1;
        log(
            Level::Error,
            Domain::System,
            "system_fault",
            obj(&[("msg", v_str(&fault.msg))]),
        );
        self.world.record_fault(Fault::System(fault), now_ms);
        self.sync_recovery();
    }

    fn sync_recovery(&mut self) {
        if let SupervisorState::RecoveryScheduled { due_ms } = self.world.supervisor.state {
            self.scheduler.schedule_at(Task::Recovery, due_ms);
        }
    }

    fn run_task(&mut self, task: Task, now_ms: u64) {
        match task {
            Task::Recovery => {
                self.world.service_recovery(now_ms, &mut self.reload);
            }
            Task::Cleanup => {
                self.world.cleanup(now_ms);
            }
            Task::HealthCheck => self.world.health_check(now_ms),
            Task::Checkpoint => log_checkpoint(&self.world.summary()),
        }
        self.sync_recovery();
    }

    /// Rebuild the world from its config. Last resort after a failed
    /// soft recovery.
    fn full_reload(&mut self, reason: String, now_ms: u64) {
        self.reloads += 1;
        let cfg = self.world.cfg.clone();
        let profile = self.world.fault_profile.clone();
        let network = self.world.network.clone();
        let escalations = self.world.supervisor.escalations;
        self.world = WorldState::new(cfg, now_ms).with_fault_profile(profile);
        self.world.network = network;
        self.world.supervisor.escalations = escalations;
        self.scheduler = Scheduler::from_config(&self.world.cfg, now_ms);
        log(
            Level::Warn,
            Domain::Recovery,
            "full_reload",
            obj(&[("msg", v_str(&reason)), ("reloads", v_u64(self.reloads))]),
        );
    }

    /// One frame: due tasks, the tick, then the draw pass.
    pub fn frame(&mut self, now_ms: u64) {
        let _profile = ProfileScope::new("frame");
        self.frames += 1;
        for task in self.scheduler.due(now_ms) {
            self.run_task(task, now_ms);
        }
        if let Some(reason) = self.reload.take() {
            self.full_reload(reason, now_ms);
        }
        match self.world.tick(now_ms) {
            Ok(report) => {
                if report.faults > 0 {
                    log(
                        Level::Debug,
                        Domain::System,
                        "tick_faults",
                        obj(&[
                            ("faults", v_u64(report.faults as u64)),
                            ("tick", v_u64(self.world.tick_seq)),
                        ]),
                    );
                }
                self.sync_recovery();
            }
            Err(fault) => self.record_system_fault(fault, now_ms),
        }
        self.surface.draw(&self.world, now_ms);
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: crate::logging::run_id().to_string(),
            frames: self.frames,
            deliveries: self.deliveries,
            transport_faults: self.transport_faults,
            system_faults: self.system_faults,
            entity_faults: self.world.counters.entity_faults,
            recoveries: self.world.supervisor.recoveries,
            escalations: self.world.supervisor.escalations,
            reloads: self.reloads,
            carriers_created: self.world.counters.carriers_created,
            passengers_created: self.world.counters.passengers_created,
            hud: self.world.hud_snapshot(),
        }
    }
}

/// Run until ctrl-c, or until `max_frames` frames have been drawn.
pub async fn run<S: Surface>(
    cfg: Config,
    source: Box<dyn BlockSource>,
    surface: S,
    max_frames: Option<u64>,
) -> Result<RunSummary> {
    let (tx, mut rx) = mpsc::channel::<PollOutcome>(cfg.feed_channel_capacity.max(1));
    let mut feed = FeedAdapter::new(source, cfg.block_time_ms);
    let poll_interval = Duration::from_millis(cfg.poll_interval_ms);
    let poller = tokio::spawn(async move {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let outcome = feed.poll(now_ms()).await;
            if tx.send(outcome).await.is_err() {
                break;
            }
        }
    });

    let mut frames = interval(Duration::from_millis(cfg.frame_interval_ms));
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    log(
        Level::Info,
        Domain::System,
        "run_start",
        obj(&[
            ("poll_interval_ms", v_u64(cfg.poll_interval_ms)),
            ("frame_interval_ms", v_u64(cfg.frame_interval_ms)),
            ("carrier_kind", v_str(cfg.carrier_kind.as_str())),
            ("fly_speed", v_num(cfg.fly_speed)),
        ]),
    );
    let mut runtime = Runtime::new(cfg, surface, now_ms());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut feed_alive = true;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log(Level::Info, Domain::System, "shutdown", obj(&[("reason", v_str("ctrl_c"))]));
                break;
            }
            delivered = rx.recv(), if feed_alive => match delivered {
                Some(outcome) => runtime.deliver(outcome, now_ms()),
                None => {
                    feed_alive = false;
                    runtime.record_system_fault(SystemFault::new("poll task stopped"), now_ms());
                }
            },
            _ = frames.tick() => {
                runtime.frame(now_ms());
                if max_frames.map_or(false, |max| runtime.frames >= max) {
                    log(Level::Info, Domain::System, "shutdown", obj(&[("reason", v_str("frame_limit"))]));
                    break;
                }
            }
        }
    }

    poller.abort();
    Ok(runtime.summary())
}
