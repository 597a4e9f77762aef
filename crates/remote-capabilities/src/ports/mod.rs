//! Ports: traits at the boundary of the protocol components.

pub mod inbound;
pub mod outbound;

pub use inbound::{ExecutableCapability, TriggerCapability};
pub use outbound::{Dispatcher, Receiver, RegistrationTarget, SystemTimeSource, TimeSource};
