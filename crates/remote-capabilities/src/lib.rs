//! # Remote Capabilities
//!
//! The protocol layer that lets members of one Decentralized Oracle Network
//! (DON) use capabilities hosted by another, tolerating up to `F` faulty
//! members in each.
//!
//! ## Components
//!
//! | Component | Runs on | Quorum |
//! |-----------|---------|--------|
//! | [`RegistrationClient`] / [`RegistrationServer`] | caller / capability DON | `2F+1` of caller DON to register |
//! | [`ExecutableClient`] / [`ExecutableServer`] | caller / capability DON | `F+1` callers to execute, `F+1` identical responses to accept |
//! | [`TriggerPublisher`] / [`TriggerSubscriber`] | capability / caller DON | `F+1` identical events to deliver |
//! | [`DonNotifier`] | anywhere | n/a |
//!
//! Every component owns its state, is driven by inbound messages through the
//! [`Receiver`] port and by its own background loops, and follows the same
//! lifecycle: `start()` once, `close()` waits for every spawned task.

pub mod config;
pub mod domain;
pub mod don_notifier;
pub mod error;
pub mod executable;
mod lifecycle;
pub mod ports;
pub mod registration;
pub mod trigger;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{RemoteExecutableConfig, RemoteTriggerConfig};
pub use domain::{aggregate_mode_raw, Aggregator, DefaultModeAggregator, MessageCache};
pub use don_notifier::DonNotifier;
pub use error::{AggregationError, RemoteCapabilityError, Result, TransmissionError};
pub use executable::{ExecutableClient, ExecutableServer, LocalExecutableCapability};
pub use ports::{
    Dispatcher, ExecutableCapability, Receiver, RegistrationTarget, SystemTimeSource, TimeSource,
    TriggerCapability,
};
pub use registration::{RegistrationClient, RegistrationKey, RegistrationServer};
pub use trigger::{TriggerEventKey, TriggerPublisher, TriggerSubscriber};

#[cfg(feature = "test-utils")]
pub use test_utils::ManualTimeSource;
