//! Component configuration.
//!
//! Durations are written as humantime strings (`"30s"`, `"100ms"`). A zero
//! value means "unset"; `apply_defaults()` fills every unset field.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_REGISTRATION_REFRESH: Duration = Duration::from_secs(30);
pub const DEFAULT_REGISTRATION_EXPIRY: Duration = Duration::from_secs(120);
pub const DEFAULT_MESSAGE_EXPIRY: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_BATCH_SIZE: u32 = 100;
pub const DEFAULT_BATCH_COLLECTION_PERIOD: Duration = Duration::from_millis(100);
/// Batching is disabled for periods shorter than this.
pub const MIN_BATCH_COLLECTION_PERIOD: Duration = Duration::from_millis(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(8 * 60);
pub const DEFAULT_SERVER_MAX_PARALLEL_REQUESTS: u32 = 1000;
/// Upper bound on how often servers sweep finished requests.
pub const DEFAULT_EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(1);
const MIN_EXPIRY_CHECK_INTERVAL: Duration = Duration::from_millis(1);

/// Settings shared by the trigger publisher and subscriber.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteTriggerConfig {
    #[serde(with = "humantime_serde")]
    pub registration_refresh: Duration,
    #[serde(with = "humantime_serde")]
    pub registration_expiry: Duration,
    /// Matching events required before delivery. Zero means `F + 1` of the
    /// capability DON, resolved by the subscriber.
    pub min_responses_to_aggregate: u32,
    #[serde(with = "humantime_serde")]
    pub message_expiry: Duration,
    pub max_batch_size: u32,
    #[serde(with = "humantime_serde")]
    pub batch_collection_period: Duration,
}

impl RemoteTriggerConfig {
    pub fn apply_defaults(&mut self) {
        if self.registration_refresh.is_zero() {
            self.registration_refresh = DEFAULT_REGISTRATION_REFRESH;
        }
        if self.registration_expiry.is_zero() {
            self.registration_expiry = DEFAULT_REGISTRATION_EXPIRY;
        }
        if self.message_expiry.is_zero() {
            self.message_expiry = DEFAULT_MESSAGE_EXPIRY;
        }
        if self.max_batch_size == 0 {
            self.max_batch_size = DEFAULT_MAX_BATCH_SIZE;
        }
        if self.batch_collection_period.is_zero() {
            self.batch_collection_period = DEFAULT_BATCH_COLLECTION_PERIOD;
        }
    }

    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.apply_defaults();
        self
    }

    /// Whether the publisher coalesces identical events into batches.
    #[must_use]
    pub fn batching_enabled(&self) -> bool {
        self.max_batch_size > 1 && self.batch_collection_period >= MIN_BATCH_COLLECTION_PERIOD
    }
}

/// Settings for the executable client and server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteExecutableConfig {
    /// Dotted paths into the request `inputs` ignored when hashing requests.
    pub request_hash_excluded_attributes: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub registration_refresh: Duration,
    #[serde(with = "humantime_serde")]
    pub registration_expiry: Duration,
    /// How long a caller waits for `F + 1` matching responses.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// How long a server waits for `F + 1` callers before answering
    /// `TIMEOUT`. Unset means seven eighths of `request_timeout`, so the
    /// answer reaches callers before they give up themselves.
    #[serde(with = "humantime_serde")]
    pub server_request_timeout: Duration,
    pub server_max_parallel_requests: u32,
}

impl RemoteExecutableConfig {
    pub fn apply_defaults(&mut self) {
        if self.registration_refresh.is_zero() {
            self.registration_refresh = DEFAULT_REGISTRATION_REFRESH;
        }
        if self.registration_expiry.is_zero() {
            self.registration_expiry = DEFAULT_REGISTRATION_EXPIRY;
        }
        if self.request_timeout.is_zero() {
            self.request_timeout = DEFAULT_REQUEST_TIMEOUT;
        }
        if self.server_request_timeout.is_zero() {
            self.server_request_timeout = self.request_timeout - self.request_timeout / 8;
        }
        if self.server_max_parallel_requests == 0 {
            self.server_max_parallel_requests = DEFAULT_SERVER_MAX_PARALLEL_REQUESTS;
        }
    }

    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.apply_defaults();
        self
    }

    /// Period of the server's housekeeping sweep: a tenth of the server
    /// timeout, capped at [`DEFAULT_EXPIRY_CHECK_INTERVAL`].
    #[must_use]
    pub fn expiry_check_interval(&self) -> Duration {
        (self.server_request_timeout / 10)
            .min(DEFAULT_EXPIRY_CHECK_INTERVAL)
            .max(MIN_EXPIRY_CHECK_INTERVAL)
    }
}
