use crate::logging::{log, obj, v_str, v_u64, Domain, Level};
use crate::reliability::fault::{Fault, SystemFault};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Healthy,
    /// Errors seen, still under the threshold.
    Degraded,
    RecoveryScheduled { due_ms: u64 },
}

/// Receives the fault when a soft recovery itself fails. Whatever sits
/// behind the hook owns the full reload.
pub trait EscalationHook {
    fn escalate(&mut self, fault: &SystemFault);
}

/// Hook that records a reload request for the runtime to act on.
#[derive(Debug, Clone, Default)]
pub struct ReloadRequest {
    pub requested: bool,
    pub reason: Option<String>,
}

impl ReloadRequest {
    pub fn take(&mut self) -> Option<String> {
        if !self.requested {
            return None;
        }
        self.requested = false;
        Some(self.reason.take().unwrap_or_default())
    }
}

impl EscalationHook for ReloadRequest {
    fn escalate(&mut self, fault: &SystemFault) {
        self.requested = true;
        self.reason = Some(fault.msg.clone());
    }
}

/// Error budget with delayed soft recovery.
#[derive(Debug, Clone)]
pub struct RecoverySupervisor {
    pub state: SupervisorState,
    pub error_count: u32,
    pub threshold: u32,
    pub recovery_delay_ms: u64,
    pub forgive_after_ms: u64,
    pub last_error_ms: Option<u64>,
    pub total_faults: u64,
    pub recoveries: u64,
    pub escalations: u64,
}

impl RecoverySupervisor {
    pub fn new(threshold: u32, recovery_delay_ms: u64, forgive_after_ms: u64) -> Self {
        Self {
            state: SupervisorState::Healthy,
            error_count: 0,
            threshold: threshold.max(1),
            recovery_delay_ms,
            forgive_after_ms,
            last_error_ms: None,
            total_faults: 0,
            recoveries: 0,
            escalations: 0,
        }
    }

    /// Count a fault. Returns true when this fault scheduled a recovery.
    pub fn record(&mut self, fault: &Fault, now_ms: u64) -> bool {
        self.error_count = self.error_count.saturating_add(fault.weight());
        self.total_faults += 1;
        self.last_error_ms = Some(now_ms);

        if matches!(self.state, SupervisorState::RecoveryScheduled { .. }) {
            return false;
        }
        if self.error_count >= self.threshold {
            let due_ms = now_ms + self.recovery_delay_ms;
            self.state = SupervisorState::RecoveryScheduled { due_ms };
            log(
                Level::Warn,
                Domain::Recovery,
                "recovery_scheduled",
                obj(&[
                    ("error_count", v_u64(self.error_count as u64)),
                    ("due_ms", v_u64(due_ms)),
                    ("trigger", v_str(fault.class())),
                ]),
            );
            return true;
        }
        self.state = SupervisorState::Degraded;
        false
    }

    /// A healthy live poll pays back one unit of the budget.
    pub fn record_success(&mut self) {
        if self.error_count == 0 {
            return;
        }
        self.error_count -= 1;
        if self.error_count == 0 && self.state == SupervisorState::Degraded {
            self.state = SupervisorState::Healthy;
        }
    }

    pub fn recovery_due(&self, now_ms: u64) -> bool {
        match self.state {
            SupervisorState::RecoveryScheduled { due_ms } => now_ms >= due_ms,
            _ => false,
        }
    }

    pub fn complete_recovery(&mut self) {
        self.error_count = 0;
        self.state = SupervisorState::Healthy;
        self.recoveries += 1;
    }

    pub fn escalate(&mut self, fault: &SystemFault, hook: &mut dyn EscalationHook) {
        self.escalations += 1;
        self.error_count = 0;
        self.state = SupervisorState::Healthy;
        log(
            Level::Error,
            Domain::Recovery,
            "escalate",
            obj(&[("msg", v_str(&fault.msg))]),
        );
        hook.escalate(fault);
    }

    /// Time-based forgiveness: decay by one when quiet long enough.
    pub fn forgive(&mut self, now_ms: u64) -> bool {
        if self.error_count == 0 || matches!(self.state, SupervisorState::RecoveryScheduled { .. }) {
            return false;
        }
        let quiet = match self.last_error_ms {
            Some(t) => now_ms.saturating_sub(t) > self.forgive_after_ms,
            None => true,
        };
        if !quiet {
            return false;
        }
        self.record_success();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CarrierId;
    use crate::reliability::fault::{EntityFault, TransportError};

    fn entity_fault() -> Fault {
        EntityFault::Stuck { carrier: CarrierId(1), age_ms: 0 }.into()
    }

    #[test]
    fn test_schedules_once_at_threshold() {
        let mut sup = RecoverySupervisor::new(3, 2_000, 60_000);
        assert!(!sup.record(&entity_fault(), 10));
        assert!(!sup.record(&entity_fault(), 11));
        assert_eq!(sup.state, SupervisorState::Degraded);
        assert!(sup.record(&entity_fault(), 12));
        assert_eq!(sup.state, SupervisorState::RecoveryScheduled { due_ms: 2_012 });
        assert!(!sup.record(&entity_fault(), 13));
        assert_eq!(sup.state, SupervisorState::RecoveryScheduled { due_ms: 2_012 });
    }

    #[test]
    fn test_recovery_due_after_delay() {
        let mut sup = RecoverySupervisor::new(1, 500, 60_000);
        sup.record(&TransportError::fetch("x").into(), 1_000);
        assert!(!sup.recovery_due(1_499));
        assert!(sup.recovery_due(1_500));
        sup.complete_recovery();
        assert_eq!(sup.error_count, 0);
        assert_eq!(sup.recoveries, 1);
    }

    #[test]
    fn test_forgiveness_needs_quiet_period() {
        let mut sup = RecoverySupervisor::new(10, 500, 1_000);
        sup.record(&entity_fault(), 0);
        sup.record(&entity_fault(), 0);
        assert!(!sup.forgive(900));
        assert!(sup.forgive(1_001));
        assert_eq!(sup.error_count, 1);
    }

    #[test]
    fn test_escalation_reaches_hook() {
        let mut sup = RecoverySupervisor::new(1, 0, 0);
        let mut hook = ReloadRequest::default();
        sup.escalate(&SystemFault::new("bad state"), &mut hook);
        assert_eq!(hook.take().as_deref(), Some("bad state"));
        assert!(hook.take().is_none());
        assert_eq!(sup.escalations, 1);
    }
}
