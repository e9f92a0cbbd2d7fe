use std::collections::HashMap;
use std::fmt;

use crate::model::{CarrierId, PassengerId};
use crate::world::carrier::{CarrierRegistry, CarrierState};
use crate::world::passenger::{Passenger, PassengerState};
use crate::world::WorldState;

#[derive(Debug, Clone, PartialEq)]
pub struct InvariantViolation {
    pub msg: String,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.msg)
    }
}

impl std::error::Error for InvariantViolation {}

pub fn check_capacity(carriers: &CarrierRegistry) -> Result<(), InvariantViolation> {
    for c in carriers.iter() {
        if c.state == CarrierState::Loading && c.passengers.len() > c.capacity {
            return Err(InvariantViolation {
                msg: format!("{} holds {} of {}", c.id, c.passengers.len(), c.capacity),
            });
        }
    }
    Ok(())
}

pub fn check_single_membership(carriers: &CarrierRegistry) -> Result<(), InvariantViolation> {
    let mut seen: HashMap<PassengerId, CarrierId> = HashMap::new();
    for c in carriers.iter() {
        for b in &c.passengers {
            if let Some(other) = seen.insert(b.passenger, c.id) {
                return Err(InvariantViolation {
                    msg: format!("{} is aboard both {} and {}", b.passenger, other, c.id),
                });
            }
        }
    }
    Ok(())
}

/// Boarding and flying passengers must be listed by the live carrier they
/// point at. Gone carriers are skipped: their riders are removed on their
/// own next update.
pub fn check_back_references(
    carriers: &CarrierRegistry,
    passengers: &[Passenger],
) -> Result<(), InvariantViolation> {
    for p in passengers {
        if !matches!(p.state, PassengerState::Boarding | PassengerState::Flying) {
            continue;
        }
        let Some(cid) = p.carrier else {
            return Err(InvariantViolation {
                msg: format!("{} is {} without a carrier", p.id, p.state.as_str()),
            });
        };
        let Some(c) = carriers.get(cid) else {
            continue;
        };
        if c.state != CarrierState::Gone && !c.contains(p.id) {
            return Err(InvariantViolation {
                msg: format!("{} points at {} which does not list it", p.id, cid),
            });
        }
    }
    Ok(())
}

pub fn check_world(world: &WorldState) -> Result<(), InvariantViolation> {
    check_capacity(&world.carriers)?;
    check_single_membership(&world.carriers)?;
    check_back_references(&world.carriers, &world.passengers)?;
    Ok(())
}
