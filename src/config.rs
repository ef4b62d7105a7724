//! # Session Configuration
//!
//! Static configuration supplied once before the session starts, plus the
//! retry cadences used by the state machines.
//!
//! The three cadences encode three different failure classes:
//!
//! - **Reconnection** (broker unreachable): aggressive doubling, low cap.
//! - **Subscribe** (no answer on the command topic): doubling from a few
//!   seconds, because the broker session is up and the cloud is just slow.
//! - **Attach** (the cloud answered but without a usable thing id): a much
//!   more patient doubling cadence, because no amount of fast retrying
//!   produces a thing that was never configured.

use embassy_time::Duration;

use crate::error::ConfigError;
use crate::message::{DeviceId, LIB_VERSION_CAPACITY};

/// Broker reconnection cadence: 2s -> 4s -> 8s -> 16s -> 32s -> 32s ...
pub const RECONNECTION_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const MAX_RECONNECTION_RETRY_DELAY: Duration = Duration::from_secs(32);

/// Command-topic subscribe cadence: 4s -> 8s -> 16s -> 32s -> 32s ...
pub const SUBSCRIBE_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const MAX_SUBSCRIBE_RETRY_DELAY: Duration = Duration::from_secs(32);

/// Thing-attach cadence: 80s -> 160s -> 320s -> 640s -> 1280s -> 1280s ...
pub const ATTACH_RETRY_DELAY: Duration = Duration::from_secs(40);
pub const MAX_ATTACH_RETRY_DELAY: Duration = Duration::from_secs(1280);

/// Fixed cadence for shadow (last-values) requests.
pub const LAST_VALUES_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Retries before the device process forces a teardown.
pub const MAX_SUBSCRIBE_RETRY_COUNT: u32 = 10;
/// Retries before an attach attempt forces a teardown.
pub const MAX_ATTACH_RETRY_COUNT: u32 = 10;
/// Shadow requests before the thing process forces a teardown.
pub const MAX_LAST_VALUES_RETRY_COUNT: u32 = 10;

/// Size of the transmit and retransmit buffers.
pub const TX_BUFFER_CAPACITY: usize = 256;

/// Maximum length of the broker host name.
pub const BROKER_HOST_CAPACITY: usize = 64;

/// Default broker endpoint.
pub const DEFAULT_BROKER_HOST: &str = "mqtts.iot.example.com";
pub const DEFAULT_BROKER_PORT: u16 = 8883;

/// Version string announced in the capability message.
pub const LIB_VERSION: &str = "0.2.0";

/// Static session parameters, built once by the embedding application.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub broker_host: heapless::String<BROKER_HOST_CAPACITY>,
    pub broker_port: u16,
    pub device_id: DeviceId,
    pub lib_version: heapless::String<LIB_VERSION_CAPACITY>,
    /// Whether a pending firmware update waits for explicit approval.
    pub ota_approval_required: bool,
}

impl SessionConfig {
    /// Builds a configuration for the default broker endpoint.
    pub fn new(device_id: &str) -> Result<Self, ConfigError> {
        Self::with_broker(device_id, DEFAULT_BROKER_HOST, DEFAULT_BROKER_PORT)
    }

    /// Builds a configuration for a specific broker endpoint.
    pub fn with_broker(device_id: &str, host: &str, port: u16) -> Result<Self, ConfigError> {
        Ok(Self {
            broker_host: heapless::String::try_from(host).map_err(|_| ConfigError::ValueTooLong)?,
            broker_port: port,
            device_id: DeviceId::try_from(device_id).map_err(|_| ConfigError::ValueTooLong)?,
            lib_version: heapless::String::try_from(LIB_VERSION)
                .map_err(|_| ConfigError::ValueTooLong)?,
            ota_approval_required: false,
        })
    }

    /// Requires explicit approval before a firmware update starts.
    pub fn require_ota_approval(mut self) -> Self {
        self.ota_approval_required = true;
        self
    }
}
