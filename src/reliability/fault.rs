//! Fault taxonomy shared by the feed, the entities and the supervisor.

use std::fmt;

use crate::model::{CarrierId, PassengerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Request failed, timed out, or the endpoint returned an error payload.
    Fetch,
    /// Response arrived but could not be normalised into a block.
    Malformed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub msg: String,
}

impl TransportError {
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self { kind: TransportErrorKind::Fetch, msg: msg.into() }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self { kind: TransportErrorKind::Malformed, msg: msg.into() }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransportErrorKind::Fetch => write!(f, "feed fetch failed: {}", self.msg),
            TransportErrorKind::Malformed => write!(f, "malformed feed response: {}", self.msg),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Carrier(CarrierId),
    Passenger(PassengerId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Carrier(id) => write!(f, "{}", id),
            EntityRef::Passenger(id) => write!(f, "{}", id),
        }
    }
}

/// A fault raised while updating a single entity. The entity is isolated,
/// the rest of the tick proceeds.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityFault {
    NonFinitePosition { entity: EntityRef },
    DanglingCarrier { passenger: PassengerId, carrier: CarrierId },
    IllegalTransition { entity: EntityRef, msg: String },
    Stuck { carrier: CarrierId, age_ms: u64 },
    Injected { entity: EntityRef },
}

impl EntityFault {
    pub fn entity(&self) -> EntityRef {
        match self {
            EntityFault::NonFinitePosition { entity }
            | EntityFault::IllegalTransition { entity, .. }
            | EntityFault::Injected { entity } => *entity,
            EntityFault::DanglingCarrier { passenger, .. } => EntityRef::Passenger(*passenger),
            EntityFault::Stuck { carrier, .. } => EntityRef::Carrier(*carrier),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EntityFault::NonFinitePosition { .. } => "non_finite_position",
            EntityFault::DanglingCarrier { .. } => "dangling_carrier",
            EntityFault::IllegalTransition { .. } => "illegal_transition",
            EntityFault::Stuck { .. } => "stuck",
            EntityFault::Injected { .. } => "injected",
        }
    }
}

impl fmt::Display for EntityFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityFault::NonFinitePosition { entity } => {
                write!(f, "{} has a non-finite position", entity)
            }
            EntityFault::DanglingCarrier { passenger, carrier } => {
                write!(f, "{} references missing carrier {}", passenger, carrier)
            }
            EntityFault::IllegalTransition { entity, msg } => {
                write!(f, "{} illegal transition: {}", entity, msg)
            }
            EntityFault::Stuck { carrier, age_ms } => {
                write!(f, "{} stuck loading for {}ms", carrier, age_ms)
            }
            EntityFault::Injected { entity } => write!(f, "injected fault on {}", entity),
        }
    }
}

impl std::error::Error for EntityFault {}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemFault {
    pub msg: String,
}

impl SystemFault {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

impl fmt::Display for SystemFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "system fault: {}", self.msg)
    }
}

impl std::error::Error for SystemFault {}

#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    Transport(TransportError),
    Entity(EntityFault),
    System(SystemFault),
}

impl Fault {
    /// Contribution to the supervisor's error counter.
    pub fn weight(&self) -> u32 {
        match self {
            Fault::Transport(_) => 1,
            Fault::Entity(_) => 1,
            Fault::System(_) => 2,
        }
    }

    pub fn class(&self) -> &'static str {
        match self {
            Fault::Transport(_) => "transport",
            Fault::Entity(_) => "entity",
            Fault::System(_) => "system",
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Transport(e) => e.fmt(f),
            Fault::Entity(e) => e.fmt(f),
            Fault::System(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Fault {}

impl From<TransportError> for Fault {
    fn from(e: TransportError) -> Self {
        Fault::Transport(e)
    }
}

impl From<EntityFault> for Fault {
    fn from(e: EntityFault) -> Self {
        Fault::Entity(e)
    }
}

impl From<SystemFault> for Fault {
    fn from(e: SystemFault) -> Self {
        Fault::System(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_faults_weigh_double() {
        let t: Fault = TransportError::fetch("timeout").into();
        let s: Fault = SystemFault::new("tick panicked").into();
        assert_eq!(t.weight(), 1);
        assert_eq!(s.weight(), 2);
    }

    #[test]
    fn test_entity_ref_of_stuck_is_carrier() {
        let f = EntityFault::Stuck { carrier: CarrierId(4), age_ms: 61_000 };
        assert_eq!(f.entity(), EntityRef::Carrier(CarrierId(4)));
        assert!(f.to_string().contains("C-4"));
    }
}
