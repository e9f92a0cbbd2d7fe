//! Transaction passengers: walk to a carrier, board, fly, or wander back.

use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;

use crate::config::Config;
use crate::model::{CarrierId, PassengerId, Transaction, Vec2};
use crate::reliability::fault::{EntityFault, EntityRef};
use crate::world::carrier::{CarrierRegistry, CarrierState};

pub const WALK_ARRIVAL: f64 = 8.0;
pub const RETURN_ARRIVAL: f64 = 5.0;
const BOUNCE_HEIGHT: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassengerState {
    Waiting,
    Walking,
    Boarding,
    Flying,
    Returning,
}

impl PassengerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassengerState::Waiting => "waiting",
            PassengerState::Walking => "walking",
            PassengerState::Boarding => "boarding",
            PassengerState::Flying => "flying",
            PassengerState::Returning => "returning",
        }
    }

    /// On the ground and not committed to a carrier.
    pub fn is_idle(&self) -> bool {
        matches!(self, PassengerState::Waiting | PassengerState::Returning)
    }

    pub fn is_transiting(&self) -> bool {
        matches!(
            self,
            PassengerState::Walking | PassengerState::Boarding | PassengerState::Flying
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassengerOutcome {
    Stay,
    Remove,
}

pub struct WalkEnv<'a> {
    pub now_ms: u64,
    pub cfg: &'a Config,
}

/// Random spot in the waiting area near the bottom-left of the canvas.
pub fn waiting_spot(rng: &mut StdRng, cfg: &Config) -> Vec2 {
    let h = cfg.canvas_height;
    let x = rng.gen_range(50.0..250.0);
    let mut y = rng.gen_range(h - 120.0..h - 60.0);
    if y > h - 100.0 {
        y = h - 150.0;
    }
    Vec2::new(x, y)
}

pub fn spawn_point(rng: &mut StdRng, cfg: &Config) -> Vec2 {
    let h = cfg.canvas_height;
    Vec2::new(rng.gen_range(50.0..350.0), rng.gen_range(h - 150.0..h - 90.0))
}

#[derive(Debug, Clone)]
pub struct Passenger {
    pub id: PassengerId,
    pub transaction: Transaction,
    pub state: PassengerState,
    pub position: Vec2,
    pub target: Vec2,
    pub waiting_spot: Vec2,
    /// Back-reference only; the carrier's list is authoritative.
    pub carrier: Option<CarrierId>,
    pub speed: f64,
    pub animation: f64,
    pub created_at_ms: u64,
}

impl Passenger {
    pub fn new(id: PassengerId, transaction: Transaction, position: Vec2, now_ms: u64) -> Self {
        Self {
            id,
            transaction,
            state: PassengerState::Waiting,
            position,
            target: position,
            waiting_spot: position,
            carrier: None,
            speed: 0.0,
            animation: 0.0,
            created_at_ms: now_ms,
        }
    }

    pub fn walk_to(&mut self, carrier: CarrierId, target: Vec2, speed: f64) {
        self.state = PassengerState::Walking;
        self.carrier = Some(carrier);
        self.target = target;
        self.speed = speed;
    }

    /// Detach from any carrier and head back to a fresh waiting spot.
    pub fn return_to_waiting(&mut self, spot: Vec2) {
        self.state = PassengerState::Returning;
        self.carrier = None;
        self.target = spot;
        self.waiting_spot = spot;
    }

    /// Reset after a fault: straight to a safe spot, no carrier.
    pub fn reset_to(&mut self, spot: Vec2) {
        self.state = PassengerState::Waiting;
        self.carrier = None;
        self.position = spot;
        self.target = spot;
        self.waiting_spot = spot;
    }

    /// In a carrier's list right now. Riders sent back to the ground are not.
    pub fn is_aboard(&self) -> bool {
        matches!(self.state, PassengerState::Boarding | PassengerState::Flying)
    }

    /// Bound to a block more than one behind `latest` and not aboard.
    pub fn is_stale(&self, latest_height: u64) -> bool {
        match self.transaction.bound_height() {
            Some(h) => !self.is_aboard() && h + 1 < latest_height,
            None => false,
        }
    }

    fn clamp_to_ground(&mut self, cfg: &Config) {
        self.position.x = self.position.x.clamp(-100.0, cfg.canvas_width + 100.0);
        if self.position.y < 0.0 || self.position.y > cfg.canvas_height {
            self.position.y = cfg.canvas_height - 150.0;
        }
    }

    pub fn update(
        &mut self,
        carriers: &mut CarrierRegistry,
        env: &WalkEnv<'_>,
        rng: &mut StdRng,
    ) -> Result<PassengerOutcome, EntityFault> {
        if !self.position.is_finite() {
            return Err(EntityFault::NonFinitePosition { entity: EntityRef::Passenger(self.id) });
        }
        self.animation += 0.1;
        if !matches!(self.state, PassengerState::Flying | PassengerState::Boarding) {
            self.clamp_to_ground(env.cfg);
        }

        match self.state {
            PassengerState::Waiting => {
                self.position.y = self.waiting_spot.y + self.animation.sin() * BOUNCE_HEIGHT;
                if let Some(id) = carriers.nearest_open(self.position, self.transaction.bound_height()) {
                    if let Some(c) = carriers.get(id) {
                        let speed = env.cfg.walk_speed + rng.gen::<f64>();
                        self.walk_to(id, c.boarding_point(), speed);
                    }
                }
            }
            PassengerState::Walking => {
                let open = self
                    .carrier
                    .and_then(|id| carriers.get(id))
                    .filter(|c| c.state == CarrierState::Loading)
                    .map(|c| (c.id, c.boarding_point()));
                let Some((id, point)) = open else {
                    self.return_to_waiting(waiting_spot(rng, env.cfg));
                    return Ok(PassengerOutcome::Stay);
                };
                self.target = point;
                if self.position.distance(point) > WALK_ARRIVAL {
                    self.position = self.position.step_toward(point, self.speed);
                } else {
                    let accepted = carriers
                        .get_mut(id)
                        .map(|c| c.add_passenger(self.id, self.transaction.category))
                        .unwrap_or(false);
                    if accepted {
                        self.state = PassengerState::Boarding;
                        self.position = point;
                    } else {
                        self.return_to_waiting(waiting_spot(rng, env.cfg));
                    }
                }
            }
            PassengerState::Boarding => {
                let id = self.carrier.ok_or(EntityFault::IllegalTransition {
                    entity: EntityRef::Passenger(self.id),
                    msg: "boarding without a carrier".to_string(),
                })?;
                let carrier = carriers
                    .get(id)
                    .ok_or(EntityFault::DanglingCarrier { passenger: self.id, carrier: id })?;
                if !carrier.contains(self.id) {
                    // Evicted or drained; the carrier no longer counts us.
                    self.return_to_waiting(waiting_spot(rng, env.cfg));
                    return Ok(PassengerOutcome::Stay);
                }
                match carrier.state {
                    CarrierState::Loading => self.position = carrier.boarding_point(),
                    CarrierState::Launching | CarrierState::Flying => {
                        self.state = PassengerState::Flying;
                        self.position = carrier.position;
                    }
                    CarrierState::Gone => return Ok(PassengerOutcome::Remove),
                }
            }
            PassengerState::Flying => {
                let Some(carrier) = self.carrier.and_then(|id| carriers.get(id)) else {
                    return Ok(PassengerOutcome::Remove);
                };
                if carrier.state == CarrierState::Gone {
                    return Ok(PassengerOutcome::Remove);
                }
                self.position = Vec2::new(
                    carrier.position.x + self.animation.sin() * 10.0,
                    carrier.position.y + self.animation.cos() * 6.0,
                );
            }
            PassengerState::Returning => {
                if self.position.distance(self.target) > RETURN_ARRIVAL {
                    self.position = self.position.step_toward(self.target, env.cfg.return_speed);
                } else {
                    self.state = PassengerState::Waiting;
                    let mut spot = self.position;
                    if spot.y > env.cfg.canvas_height - 100.0 {
                        spot.y = env.cfg.canvas_height - 150.0;
                    }
                    self.waiting_spot = spot;
                }
            }
        }
        Ok(PassengerOutcome::Stay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::synthetic::pseudo_transaction;
    use crate::model::TransactionCategory;
    use crate::world::carrier::Carrier;
    use rand::SeedableRng;

    fn setup() -> (Config, CarrierRegistry, StdRng) {
        let cfg = Config::default();
        let mut reg = CarrierRegistry::new();
        reg.insert(Carrier::new(CarrierId(1), 10, "0x1".into(), 2, Vec2::new(300.0, 600.0), 50.0, 0, 10_000));
        (cfg, reg, StdRng::seed_from_u64(7))
    }

    fn bound_tx(height: u64) -> Transaction {
        let mut tx = pseudo_transaction(1, 0);
        tx.bind_to_block(height);
        tx
    }

    #[test]
    fn test_waiting_finds_carrier_and_boards() {
        let (cfg, mut reg, mut rng) = setup();
        let env = WalkEnv { now_ms: 0, cfg: &cfg };
        let mut p = Passenger::new(PassengerId(1), pseudo_transaction(0, 0), Vec2::new(100.0, 690.0), 0);
        p.update(&mut reg, &env, &mut rng).unwrap();
        assert_eq!(p.state, PassengerState::Walking);
        for _ in 0..500 {
            p.update(&mut reg, &env, &mut rng).unwrap();
            if p.state == PassengerState::Boarding {
                break;
            }
        }
        assert_eq!(p.state, PassengerState::Boarding);
        assert!(reg.get(CarrierId(1)).unwrap().contains(PassengerId(1)));
    }

    #[test]
    fn test_bound_passenger_ignores_other_blocks() {
        let (cfg, mut reg, mut rng) = setup();
        let env = WalkEnv { now_ms: 0, cfg: &cfg };
        let mut p = Passenger::new(PassengerId(1), bound_tx(11), Vec2::new(100.0, 690.0), 0);
        p.update(&mut reg, &env, &mut rng).unwrap();
        assert_eq!(p.state, PassengerState::Waiting);
    }

    #[test]
    fn test_full_carrier_on_arrival_sends_back() {
        let (cfg, mut reg, mut rng) = setup();
        let env = WalkEnv { now_ms: 0, cfg: &cfg };
        let point = reg.get(CarrierId(1)).unwrap().boarding_point();
        let mut p = Passenger::new(PassengerId(9), pseudo_transaction(0, 0), point, 0);
        p.walk_to(CarrierId(1), point, 3.0);
        {
            let c = reg.get_mut(CarrierId(1)).unwrap();
            c.add_passenger(PassengerId(1), TransactionCategory::Swap);
            c.add_passenger(PassengerId(2), TransactionCategory::Swap);
        }
        p.update(&mut reg, &env, &mut rng).unwrap();
        assert_eq!(p.state, PassengerState::Returning);
        assert_eq!(p.carrier, None);
        assert_eq!(reg.get(CarrierId(1)).unwrap().passengers.len(), 2);
    }

    #[test]
    fn test_walking_to_vanished_carrier_returns() {
        let (cfg, mut reg, mut rng) = setup();
        let env = WalkEnv { now_ms: 0, cfg: &cfg };
        let mut p = Passenger::new(PassengerId(1), pseudo_transaction(0, 0), Vec2::new(100.0, 690.0), 0);
        p.walk_to(CarrierId(42), Vec2::new(500.0, 600.0), 3.0);
        p.update(&mut reg, &env, &mut rng).unwrap();
        assert_eq!(p.state, PassengerState::Returning);
    }

    #[test]
    fn test_boarding_on_missing_carrier_faults() {
        let (cfg, mut reg, mut rng) = setup();
        let env = WalkEnv { now_ms: 0, cfg: &cfg };
        let mut p = Passenger::new(PassengerId(1), pseudo_transaction(0, 0), Vec2::new(100.0, 690.0), 0);
        p.state = PassengerState::Boarding;
        p.carrier = Some(CarrierId(99));
        assert!(matches!(
            p.update(&mut reg, &env, &mut rng),
            Err(EntityFault::DanglingCarrier { .. })
        ));
    }

    #[test]
    fn test_flying_removed_when_carrier_gone() {
        let (cfg, mut reg, mut rng) = setup();
        let env = WalkEnv { now_ms: 0, cfg: &cfg };
        let mut p = Passenger::new(PassengerId(1), pseudo_transaction(0, 0), Vec2::new(0.0, 0.0), 0);
        p.state = PassengerState::Flying;
        p.carrier = Some(CarrierId(1));
        assert_eq!(p.update(&mut reg, &env, &mut rng).unwrap(), PassengerOutcome::Stay);
        reg.get_mut(CarrierId(1)).unwrap().transition(CarrierState::Gone).unwrap();
        assert_eq!(p.update(&mut reg, &env, &mut rng).unwrap(), PassengerOutcome::Remove);
    }

    #[test]
    fn test_staleness() {
        let p = Passenger::new(PassengerId(1), bound_tx(100), Vec2::default(), 0);
        assert!(!p.is_stale(100));
        assert!(!p.is_stale(101));
        assert!(p.is_stale(102));
        let unbound = Passenger::new(PassengerId(2), pseudo_transaction(0, 0), Vec2::default(), 0);
        assert!(!unbound.is_stale(1_000));
    }

    #[test]
    fn test_returned_rider_is_no_longer_exempt() {
        let mut p = Passenger::new(PassengerId(1), bound_tx(100), Vec2::default(), 0);
        p.walk_to(CarrierId(1), Vec2::new(10.0, 10.0), 2.5);
        p.state = PassengerState::Flying;
        assert!(p.is_aboard());
        assert!(!p.is_stale(150));

        p.return_to_waiting(Vec2::new(100.0, 650.0));
        assert!(!p.is_aboard());
        assert!(p.is_stale(102));
    }

    #[test]
    fn test_waiting_spot_stays_off_the_edge() {
        let cfg = Config::default();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let s = waiting_spot(&mut rng, &cfg);
            assert!(s.x >= 50.0 && s.x < 250.0);
            assert!(s.y <= cfg.canvas_height - 100.0);
        }
    }
}
