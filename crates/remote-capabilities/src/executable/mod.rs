//! # Executable Capability Protocol
//!
//! ```text
//!  calling DON                                 capability DON
//! ┌──────────────────┐   Execute (staggered)  ┌───────────────────────┐
//! │ ExecutableClient │ ─────────────────────→ │ ExecutableServer      │
//! │ F+1 matching     │                        │ bucket by id + hash   │
//! │ responses        │ ←───────────────────── │ F+1 callers → run once│
//! └──────────────────┘   OK / TIMEOUT /       └───────────────────────┘
//!                        INTERNAL_ERROR
//! ```

pub mod client;
mod client_request;
pub mod local;
pub mod server;
mod server_request;

pub use client::ExecutableClient;
pub use local::LocalExecutableCapability;
pub use server::ExecutableServer;
