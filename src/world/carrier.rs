//! Block carriers: capacity-bounded vehicles with a forward-only lifecycle.

use serde::Serialize;
use std::fmt;

use crate::config::{CarrierKind, Config};
use crate::model::{lerp, CarrierId, PassengerId, TransactionCategory, Vec2};
use crate::reliability::fault::{EntityFault, EntityRef};

/// Balloons ease toward this height; they are gone once above `BALLOON_EXIT_Y`.
pub const BALLOON_TARGET_Y: f64 = -400.0;
pub const BALLOON_EXIT_Y: f64 = -300.0;
pub const ZEPPELIN_EXIT_MARGIN: f64 = 200.0;
pub const FADE_PER_TICK: f64 = 0.02;
pub const HIT_MARGIN: f64 = 30.0;
/// Loading carriers hover at least this far above the bottom edge.
pub const GROUND_CLEARANCE: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CarrierState {
    Loading,
    Launching,
    Flying,
    Gone,
}

impl CarrierState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CarrierState::Loading => "loading",
            CarrierState::Launching => "launching",
            CarrierState::Flying => "flying",
            CarrierState::Gone => "gone",
        }
    }

    fn next(self) -> Option<CarrierState> {
        match self {
            CarrierState::Loading => Some(CarrierState::Launching),
            CarrierState::Launching => Some(CarrierState::Flying),
            CarrierState::Flying => Some(CarrierState::Gone),
            CarrierState::Gone => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitionError {
    pub msg: String,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.msg)
    }
}

impl std::error::Error for TransitionError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boarded {
    pub passenger: PassengerId,
    pub category: TransactionCategory,
}

/// What a carrier update produced, for the population manager to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum CarrierEvent {
    Launched { forced: bool, evicted: Vec<PassengerId> },
    TookOff { speed: f64, dominant: Option<TransactionCategory> },
    Exited,
    OutOfBounds,
}

/// Per-tick inputs a carrier needs from the world.
pub struct FlightEnv<'a> {
    pub now_ms: u64,
    pub kind: CarrierKind,
    pub cfg: &'a Config,
}

#[derive(Debug, Clone)]
pub struct Carrier {
    pub id: CarrierId,
    pub block_height: u64,
    pub block_hash: String,
    pub capacity: usize,
    /// Ordered by boarding time.
    pub passengers: Vec<Boarded>,
    pub state: CarrierState,
    pub position: Vec2,
    pub target: Vec2,
    pub size: f64,
    pub opacity: f64,
    pub created_at_ms: u64,
    pub launch_deadline_ms: u64,
    pub trip_speed: f64,
    pub dominant: Option<TransactionCategory>,
    pub forced_launch: bool,
    pub animation: f64,
    pub wind_offset: f64,
}

impl Carrier {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: CarrierId,
        block_height: u64,
        block_hash: String,
        capacity: usize,
        position: Vec2,
        size: f64,
        now_ms: u64,
        wait_timeout_ms: u64,
    ) -> Self {
        Self {
            id,
            block_height,
            block_hash,
            capacity,
            passengers: Vec::with_capacity(capacity),
            state: CarrierState::Loading,
            position,
            target: position,
            size,
            opacity: 1.0,
            created_at_ms: now_ms,
            launch_deadline_ms: now_ms + wait_timeout_ms,
            trip_speed: 0.0,
            dominant: None,
            forced_launch: false,
            animation: 0.0,
            wind_offset: 0.0,
        }
    }

    pub fn has_room(&self) -> bool {
        self.state == CarrierState::Loading && self.passengers.len() < self.capacity
    }

    pub fn contains(&self, passenger: PassengerId) -> bool {
        self.passengers.iter().any(|b| b.passenger == passenger)
    }

    /// Board a passenger. Rejections leave the carrier untouched.
    pub fn add_passenger(&mut self, passenger: PassengerId, category: TransactionCategory) -> bool {
        if !self.has_room() || self.contains(passenger) {
            return false;
        }
        self.passengers.push(Boarded { passenger, category });
        true
    }

    pub fn remove_passenger(&mut self, passenger: PassengerId) -> bool {
        let before = self.passengers.len();
        self.passengers.retain(|b| b.passenger != passenger);
        self.passengers.len() != before
    }

    /// Spot beneath the basket where passengers climb in.
    pub fn boarding_point(&self) -> Vec2 {
        Vec2::new(self.position.x, self.position.y + self.size / 2.0 + 45.0)
    }

    pub fn launch_due(&self, now_ms: u64) -> bool {
        self.state == CarrierState::Loading
            && (self.passengers.len() >= self.capacity || now_ms > self.launch_deadline_ms)
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }

    pub fn is_stuck(&self, now_ms: u64, threshold_ms: u64) -> bool {
        self.state == CarrierState::Loading && self.age_ms(now_ms) > threshold_ms
    }

    pub fn is_removable(&self) -> bool {
        self.state == CarrierState::Gone && self.opacity <= 0.0
    }

    pub fn hit_test(&self, point: Vec2) -> bool {
        self.position.distance(point) <= self.size + HIT_MARGIN
    }

    pub fn out_of_bounds(&self, width: f64) -> bool {
        self.position.x < -300.0 || self.position.x > width + 300.0 || self.position.y < -500.0
    }

    /// Forward-only. Any live state may jump straight to `Gone`.
    pub fn transition(&mut self, next: CarrierState) -> Result<(), TransitionError> {
        let allowed = self.state.next() == Some(next)
            || (next == CarrierState::Gone && self.state != CarrierState::Gone);
        if !allowed {
            return Err(TransitionError {
                msg: format!("{} cannot go {} -> {}", self.id, self.state.as_str(), next.as_str()),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Most common category aboard; ties go to the one that boarded first.
    pub fn dominant_category(&self) -> Option<TransactionCategory> {
        let mut tally: Vec<(TransactionCategory, usize)> = Vec::new();
        for b in &self.passengers {
            match tally.iter_mut().find(|(c, _)| *c == b.category) {
                Some((_, n)) => *n += 1,
                None => tally.push((b.category, 1)),
            }
        }
        let mut best: Option<(TransactionCategory, usize)> = None;
        for (c, n) in tally {
            if best.map_or(true, |(_, m)| n > m) {
                best = Some((c, n));
            }
        }
        best.map(|(c, _)| c)
    }

    /// Leave `Loading`. Anyone past capacity is evicted and handed back.
    pub fn launch(&mut self, now_ms: u64) -> Result<Vec<PassengerId>, TransitionError> {
        self.transition(CarrierState::Launching)?;
        self.forced_launch = self.passengers.len() < self.capacity && now_ms > self.launch_deadline_ms;
        let evicted = if self.passengers.len() > self.capacity {
            self.passengers.split_off(self.capacity)
        } else {
            Vec::new()
        };
        Ok(evicted.into_iter().map(|b| b.passenger).collect())
    }

    /// Terminal error exit. Returns the passengers that were aboard.
    pub fn force_gone(&mut self) -> Vec<PassengerId> {
        if self.state == CarrierState::Gone {
            return Vec::new();
        }
        self.state = CarrierState::Gone;
        self.opacity = 0.0;
        self.passengers.drain(..).map(|b| b.passenger).collect()
    }

    pub fn update(&mut self, env: &FlightEnv<'_>) -> Result<Option<CarrierEvent>, EntityFault> {
        if !self.position.is_finite() {
            return Err(EntityFault::NonFinitePosition { entity: EntityRef::Carrier(self.id) });
        }
        self.animation += 0.03;
        let wind = (self.animation + self.wind_offset).sin() * env.cfg.wind_strength;

        match self.state {
            CarrierState::Loading => {
                let floor = env.cfg.canvas_height - GROUND_CLEARANCE;
                if self.position.y > floor {
                    self.position.y = floor;
                }
                if self.launch_due(env.now_ms) {
                    let evicted = self.launch(env.now_ms).map_err(|e| self.illegal(e))?;
                    return Ok(Some(CarrierEvent::Launched { forced: self.forced_launch, evicted }));
                }
                Ok(None)
            }
            CarrierState::Launching => {
                self.transition(CarrierState::Flying).map_err(|e| self.illegal(e))?;
                self.dominant = self.dominant_category();
                let factor = self
                    .dominant
                    .map(|c| env.cfg.category_speeds.factor(c))
                    .unwrap_or(1.0);
                self.trip_speed = env.cfg.fly_speed * factor;
                self.target = Vec2::new(self.position.x, BALLOON_TARGET_Y);
                Ok(Some(CarrierEvent::TookOff { speed: self.trip_speed, dominant: self.dominant }))
            }
            CarrierState::Flying => {
                let exited = match env.kind {
                    CarrierKind::Balloon => {
                        self.position.y = lerp(self.position.y, self.target.y, self.trip_speed * 0.008);
                        self.position.x += wind;
                        self.position.y < BALLOON_EXIT_Y
                    }
                    CarrierKind::Zeppelin => {
                        let cruise_y = env.cfg.canvas_height / 2.0;
                        if self.position.y > cruise_y {
                            self.position.y -= self.trip_speed * 1.5;
                            self.position.x += wind * 0.3;
                        } else {
                            self.position.x += self.trip_speed * 4.0;
                            self.position.y += wind;
                        }
                        self.position.x > env.cfg.canvas_width + ZEPPELIN_EXIT_MARGIN
                    }
                };
                if exited {
                    self.transition(CarrierState::Gone).map_err(|e| self.illegal(e))?;
                    return Ok(Some(CarrierEvent::Exited));
                }
                if self.out_of_bounds(env.cfg.canvas_width) {
                    self.transition(CarrierState::Gone).map_err(|e| self.illegal(e))?;
                    self.opacity = 0.0;
                    return Ok(Some(CarrierEvent::OutOfBounds));
                }
                Ok(None)
            }
            CarrierState::Gone => {
                self.opacity = (self.opacity - FADE_PER_TICK).max(0.0);
                Ok(None)
            }
        }
    }

    fn illegal(&self, e: TransitionError) -> EntityFault {
        EntityFault::IllegalTransition { entity: EntityRef::Carrier(self.id), msg: e.msg }
    }
}

/// Central carrier table. Passengers hold `CarrierId`s and resolve them here.
#[derive(Debug, Clone, Default)]
pub struct CarrierRegistry {
    carriers: Vec<Carrier>,
}

impl CarrierRegistry {
    pub fn new() -> Self {
        Self { carriers: Vec::new() }
    }

    pub fn insert(&mut self, carrier: Carrier) {
        self.carriers.push(carrier);
    }

    pub fn get(&self, id: CarrierId) -> Option<&Carrier> {
        self.carriers.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: CarrierId) -> Option<&mut Carrier> {
        self.carriers.iter_mut().find(|c| c.id == id)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Carrier> {
        self.carriers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Carrier> {
        self.carriers.iter_mut()
    }

    pub fn ids(&self) -> Vec<CarrierId> {
        self.carriers.iter().map(|c| c.id).collect()
    }

    pub fn len(&self) -> usize {
        self.carriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.carriers.is_empty()
    }

    pub fn count_in(&self, state: CarrierState) -> usize {
        self.carriers.iter().filter(|c| c.state == state).count()
    }

    pub fn clear(&mut self) {
        self.carriers.clear();
    }

    /// Live carrier for a block height, if any.
    pub fn for_height(&self, height: u64) -> Option<&Carrier> {
        self.carriers
            .iter()
            .find(|c| c.block_height == height && c.state != CarrierState::Gone)
    }

    /// Closest loading carrier with room. A bound passenger only matches
    /// the carrier of its own block.
    pub fn nearest_open(&self, from: Vec2, required_height: Option<u64>) -> Option<CarrierId> {
        self.carriers
            .iter()
            .filter(|c| c.has_room())
            .filter(|c| required_height.map_or(true, |h| c.block_height == h))
            .min_by(|a, b| {
                from.distance(a.boarding_point())
                    .total_cmp(&from.distance(b.boarding_point()))
            })
            .map(|c| c.id)
    }

    /// Drop fully faded carriers. Returns how many were removed.
    pub fn remove_faded(&mut self) -> usize {
        let before = self.carriers.len();
        self.carriers = std::mem::take(&mut self.carriers)
            .into_iter()
            .filter(|c| !c.is_removable())
            .collect();
        before - self.carriers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carrier(capacity: usize) -> Carrier {
        Carrier::new(CarrierId(1), 100, "0xabc".into(), capacity, Vec2::new(400.0, 600.0), 50.0, 0, 10_000)
    }

    fn env(cfg: &Config, now_ms: u64) -> FlightEnv<'_> {
        FlightEnv { now_ms, kind: CarrierKind::Balloon, cfg }
    }

    #[test]
    fn test_add_rejects_when_full_without_mutation() {
        let mut c = carrier(2);
        assert!(c.add_passenger(PassengerId(1), TransactionCategory::Swap));
        assert!(c.add_passenger(PassengerId(2), TransactionCategory::Swap));
        let before = c.passengers.clone();
        assert!(!c.add_passenger(PassengerId(3), TransactionCategory::Swap));
        assert_eq!(c.passengers, before);
        assert_eq!(c.state, CarrierState::Loading);
    }

    #[test]
    fn test_add_rejects_duplicate() {
        let mut c = carrier(3);
        assert!(c.add_passenger(PassengerId(1), TransactionCategory::Swap));
        assert!(!c.add_passenger(PassengerId(1), TransactionCategory::Swap));
        assert_eq!(c.passengers.len(), 1);
    }

    #[test]
    fn test_transitions_are_forward_only() {
        let mut c = carrier(1);
        assert!(c.transition(CarrierState::Flying).is_err());
        c.transition(CarrierState::Launching).unwrap();
        assert!(c.transition(CarrierState::Loading).is_err());
        c.transition(CarrierState::Gone).unwrap();
        assert!(c.transition(CarrierState::Gone).is_err());
    }

    #[test]
    fn test_forced_launch_not_before_deadline() {
        let cfg = Config::default();
        let mut c = carrier(5);
        c.add_passenger(PassengerId(1), TransactionCategory::Transfer);
        assert_eq!(c.update(&env(&cfg, 10_000)).unwrap(), None);
        assert_eq!(c.state, CarrierState::Loading);
        let ev = c.update(&env(&cfg, 10_001)).unwrap();
        assert_eq!(ev, Some(CarrierEvent::Launched { forced: true, evicted: vec![] }));
        assert_eq!(c.state, CarrierState::Launching);
    }

    #[test]
    fn test_full_carrier_launches_immediately() {
        let cfg = Config::default();
        let mut c = carrier(1);
        c.add_passenger(PassengerId(1), TransactionCategory::Claim);
        let ev = c.update(&env(&cfg, 1)).unwrap();
        assert_eq!(ev, Some(CarrierEvent::Launched { forced: false, evicted: vec![] }));
    }

    #[test]
    fn test_launch_evicts_overflow() {
        let mut c = carrier(1);
        c.passengers.push(Boarded { passenger: PassengerId(1), category: TransactionCategory::Swap });
        c.passengers.push(Boarded { passenger: PassengerId(2), category: TransactionCategory::Swap });
        let evicted = c.launch(20_000).unwrap();
        assert_eq!(evicted, vec![PassengerId(2)]);
        assert_eq!(c.passengers.len(), 1);
    }

    #[test]
    fn test_dominant_tie_goes_to_first_boarded() {
        let mut c = carrier(4);
        c.add_passenger(PassengerId(1), TransactionCategory::Stake);
        c.add_passenger(PassengerId(2), TransactionCategory::Swap);
        c.add_passenger(PassengerId(3), TransactionCategory::Swap);
        c.add_passenger(PassengerId(4), TransactionCategory::Stake);
        assert_eq!(c.dominant_category(), Some(TransactionCategory::Stake));
        c.remove_passenger(PassengerId(4));
        assert_eq!(c.dominant_category(), Some(TransactionCategory::Swap));
    }

    #[test]
    fn test_trip_speed_uses_dominant_factor() {
        let cfg = Config::default();
        let mut c = carrier(2);
        c.add_passenger(PassengerId(1), TransactionCategory::Swap);
        c.add_passenger(PassengerId(2), TransactionCategory::Swap);
        c.update(&env(&cfg, 1)).unwrap();
        let ev = c.update(&env(&cfg, 2)).unwrap();
        assert!(matches!(ev, Some(CarrierEvent::TookOff { .. })));
        assert!((c.trip_speed - 0.7 * 1.5).abs() < 1e-9);
        assert_eq!(c.state, CarrierState::Flying);
    }

    #[test]
    fn test_balloon_eventually_exits_and_fades() {
        let cfg = Config::default();
        let mut c = carrier(0);
        let mut exited = false;
        for t in 0..5_000u64 {
            if let Some(CarrierEvent::Exited) = c.update(&env(&cfg, t)).unwrap() {
                exited = true;
            }
            if c.is_removable() {
                break;
            }
        }
        assert!(exited);
        assert!(c.is_removable());
    }

    #[test]
    fn test_zeppelin_exits_right() {
        let cfg = Config::default();
        let mut c = carrier(0);
        let zenv = |t| FlightEnv { now_ms: t, kind: CarrierKind::Zeppelin, cfg: &cfg };
        let mut t = 0;
        while c.state != CarrierState::Gone && t < 10_000 {
            c.update(&zenv(t)).unwrap();
            t += 1;
        }
        assert_eq!(c.state, CarrierState::Gone);
        assert!(c.position.x > cfg.canvas_width + ZEPPELIN_EXIT_MARGIN);
    }

    #[test]
    fn test_nan_position_faults() {
        let cfg = Config::default();
        let mut c = carrier(1);
        c.position.x = f64::NAN;
        assert!(matches!(
            c.update(&env(&cfg, 0)),
            Err(EntityFault::NonFinitePosition { .. })
        ));
    }

    #[test]
    fn test_force_gone_returns_passengers() {
        let mut c = carrier(3);
        c.add_passenger(PassengerId(7), TransactionCategory::Approve);
        assert_eq!(c.force_gone(), vec![PassengerId(7)]);
        assert!(c.is_removable());
        assert!(c.force_gone().is_empty());
    }

    #[test]
    fn test_registry_nearest_open_respects_height() {
        let mut reg = CarrierRegistry::new();
        reg.insert(carrier(1));
        let mut far = Carrier::new(CarrierId(2), 101, "0xdef".into(), 1, Vec2::new(900.0, 600.0), 50.0, 0, 10_000);
        far.opacity = 1.0;
        reg.insert(far);
        let from = Vec2::new(100.0, 700.0);
        assert_eq!(reg.nearest_open(from, None), Some(CarrierId(1)));
        assert_eq!(reg.nearest_open(from, Some(101)), Some(CarrierId(2)));
        assert_eq!(reg.nearest_open(from, Some(55)), None);
    }
}
