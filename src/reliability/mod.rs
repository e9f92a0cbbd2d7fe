pub mod fault;
pub mod inject;
pub mod supervisor;

pub use fault::{EntityFault, EntityRef, Fault, SystemFault, TransportError, TransportErrorKind};
pub use supervisor::{EscalationHook, RecoverySupervisor, ReloadRequest, SupervisorState};
