//! # Capability Transport
//!
//! The seam between the remote capability protocol and whatever physically
//! moves bytes between peers.
//!
//! ```text
//! ┌──────────────┐   Dispatcher::send()   ┌──────────────┐
//! │  Component   │ ─────────────────────→ │  Transport   │
//! │ (node A)     │                        │              │
//! └──────────────┘                        └──────┬───────┘
//!                                                │ route by
//!                                                │ (capability_id, don_id)
//!                                                ↓
//!                                         ┌──────────────┐
//!                                         │  Component   │
//!                                         │ (node B)     │ Receiver::receive()
//!                                         └──────────────┘
//! ```
//!
//! [`InMemoryBroker`] is an in-process transport: every node gets a
//! [`NodeDispatcher`], frames are wire-encoded on send and decoded on delivery,
//! and each node has a single bounded inbox drained by one delivery task.

pub mod broker;
pub mod dispatcher;

pub use broker::{InMemoryBroker, NodeDispatcher};
pub use dispatcher::{Dispatcher, Receiver, TransportError};

/// Frames buffered per node inbox before sends fail with `QueueFull`.
pub const DEFAULT_INBOX_CAPACITY: usize = 1000;
