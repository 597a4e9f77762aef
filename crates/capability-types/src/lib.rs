//! # Capability Types Crate
//!
//! Domain entities and wire types shared by every remote capability component.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: `PeerId`, `Don`, `CapabilityInfo` and the
//!   `MessageBody` frame are defined once, here.
//! - **Opaque Payloads**: `MessageBody::payload` is capability-specific bytes.
//!   The request/response shapes in [`requests`] are encoded with
//!   [`to_payload`] so that equal values always produce equal bytes, which is
//!   what byte-exact quorum aggregation relies on.
//! - **Envelope Identity**: `sender`/`receiver` are stamped by the transport,
//!   never trusted from the payload.

pub mod entities;
pub mod errors;
pub mod message;
pub mod requests;
pub mod validation;

pub use entities::*;
pub use errors::*;
pub use message::*;
pub use requests::*;
pub use validation::*;
