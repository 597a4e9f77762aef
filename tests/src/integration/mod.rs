//! Cross-crate protocol flows: real components on every node, connected by
//! the in-memory broker.

pub mod fixtures;

mod executable_flows;
mod registration_flows;
