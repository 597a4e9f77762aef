//! # Registration Subsystem
//!
//! Keeps "workflow X on DON A uses capability Y on DON B" bindings alive.
//!
//! ```text
//!  caller DON (every member)              capability DON (every member)
//! ┌────────────────────┐  refresh tick   ┌───────────────────────────┐
//! │ RegistrationClient │ ──────────────→ │ RegistrationServer        │
//! │ workflow → payload │   to all members│ cache: key → sender → msg │
//! └────────────────────┘                 │ 2F+1 fresh → register()   │
//!                                        │ sweep: stale → unregister │
//!                                        └───────────────────────────┘
//! ```
//!
//! There is no unregister message. A client stops refreshing and the
//! server's expiry sweep tears the registration down.

pub mod client;
pub mod server;

pub use client::RegistrationClient;
pub use server::RegistrationServer;

/// One workflow step's subscription to one capability.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationKey {
    pub caller_don_id: u32,
    pub workflow_id: String,
    pub step_reference: String,
}

impl RegistrationKey {
    #[must_use]
    pub fn new(caller_don_id: u32, workflow_id: impl Into<String>, step_reference: impl Into<String>) -> Self {
        Self {
            caller_don_id,
            workflow_id: workflow_id.into(),
            step_reference: step_reference.into(),
        }
    }
}
