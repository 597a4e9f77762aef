//! Pure protocol logic: quorum bookkeeping, aggregation, scheduling, hashing.

pub mod aggregation;
pub mod message_cache;
pub mod request_hash;
pub mod transmission;

pub use aggregation::{aggregate_mode_raw, Aggregator, DefaultModeAggregator};
pub use message_cache::MessageCache;
pub use request_hash::request_hash;
pub use transmission::{delay_for, peer_delays, Schedule, TransmissionConfig};
