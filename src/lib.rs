//! # Cloud Session Protocol for Embedded Systems
//!
//! `nimbus-session` is a `no_std` compatible client-side session protocol for
//! constrained devices that keep a durable logical connection to a cloud
//! service, synchronize named typed properties in both directions, and
//! coordinate over-the-air firmware updates.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** Designed to run on bare-metal
//!   microcontrollers without a standard library or dynamic memory
//!   allocation. Buffers are managed using `heapless`.
//! - **Tick-driven:** One external driver calls [`CloudSession::update`] at
//!   its own cadence; no component ever blocks on I/O. Suspension is
//!   implicit — a state re-enters itself until a backoff expires or a
//!   message arrives.
//! - **Layered state machines:** Session, device-attach, property-sync and
//!   OTA coordination are independent machines composed over one message
//!   bus, each with its own retry cadence.
//! - **Collaborator seams:** The MQTT-like transport, the binary codec, the
//!   time source and the board's firmware storage are traits supplied by
//!   the embedding application, keeping the protocol core portable and
//!   fully testable on the host.
//!
//! ## Architecture
//!
//! ```ignore
//! let config = SessionConfig::new("my-device-id")?;
//! let mut session: CloudSession<_, _, _, _, 16> =
//!     CloudSession::new(config, transport, codec, time, ota_platform);
//!
//! session.begin();
//! session
//!     .properties_mut()
//!     .add("temperature", PropertyValue::Float(0.0), Permission::Read)
//!     .map(|p| p.set_publish_on_change(0.5, Duration::from_secs(1)));
//!
//! loop {
//!     session.update();
//!     // ... application work, then yield until the next tick ...
//! }
//! ```
//!
//! Messages produced by the sub-processes flow upward through the
//! [`MessageBus`] to be wire-encoded and transmitted; inbound messages are
//! decoded and routed down to the process owning that message kind, which
//! consumes them on its next tick.

#![no_std]
pub mod backoff;
pub mod bus;
pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod process;
pub mod property;
pub mod session;
pub mod time;
pub mod transport;

// Re-export key types for easier access at the crate root.
pub use backoff::Backoff;
pub use bus::MessageBus;
pub use codec::{Codec, PropertyUpdate};
pub use config::SessionConfig;
pub use error::{CloudError, CodecError, ConfigError};
pub use message::{Command, CommandId, DeviceId, ThingId};
pub use process::device::DeviceProcess;
pub use process::ota::{
    BootOutcome, FetchStatus, OtaContext, OtaCoordinator, OtaError, OtaPlatform, OtaState,
};
pub use process::thing::ThingProcess;
pub use process::{CloudProcess, channel};
pub use property::{Permission, Property, PropertyContainer, PropertyValue, PublishPolicy};
pub use session::{CloudSession, SessionEvent};
pub use time::TimeSource;
pub use transport::{CloudTransport, InboundMessage};
