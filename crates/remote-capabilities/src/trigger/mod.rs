//! # Trigger Publish/Subscribe Protocol
//!
//! ```text
//!  capability DON                              workflow DON
//! ┌────────────────────┐  RegisterTrigger   ┌───────────────────┐
//! │ TriggerPublisher   │ ←───────────────── │ TriggerSubscriber │
//! │  RegistrationServer│   (refreshed)      │ RegistrationClient│
//! │  event task / reg  │                    │                   │
//! │  batching loop     │ ─────────────────→ │ cache + aggregate │
//! └────────────────────┘  TriggerEvent      │ → workflow channel│
//!                         [workflow ids]    └───────────────────┘
//! ```

pub mod publisher;
pub mod subscriber;

pub use publisher::TriggerPublisher;
pub use subscriber::{TriggerEventKey, TriggerSubscriber};
