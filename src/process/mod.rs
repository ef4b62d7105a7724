//! # Cloud Processes
//!
//! The session is composed of three cooperating sub-processes, each a
//! tick-driven state machine implementing the common [`CloudProcess`]
//! contract:
//!
//! - [`DeviceProcess`](device::DeviceProcess) — attaches the physical
//!   device to its logical thing identity.
//! - [`ThingProcess`](thing::ThingProcess) — synchronizes thing properties
//!   once attached.
//! - [`OtaCoordinator`](ota::OtaCoordinator) — drives the firmware-update
//!   lifecycle.
//!
//! The process set is fixed at compile time: the session orchestrator owns
//! the three concrete instances and ticks them directly, so the trait is a
//! shared contract (and a seam for test doubles), not a dispatch table.
//!
//! # Message handling
//!
//! Processes receive messages through their bus channel. The orchestrator
//! takes the pending message at the top of a process's tick and hands it to
//! [`CloudProcess::handle_message`], which is restricted to plain field
//! assignment — all real processing happens inside the next
//! [`CloudProcess::update`] call. Processes reply by enqueuing upstream
//! messages on the bus; the orchestrator drains and transmits them after
//! the tick returns.

pub mod device;
pub mod ota;
pub mod thing;

use embassy_time::Instant;

use crate::bus::MessageBus;
use crate::message::Command;
use crate::time::TimeSource;

/// Channel names the orchestrator routes downstream messages on.
pub mod channel {
    /// The device-attach process.
    pub const DEVICE: &str = "device";
    /// The property-sync process.
    pub const THING: &str = "thing";
    /// The OTA coordinator.
    pub const OTA: &str = "ota";
}

/// The common contract implemented by every session sub-process.
pub trait CloudProcess {
    /// Advances the state machine by one tick.
    fn update(&mut self, bus: &mut MessageBus, time: &mut dyn TimeSource, now: Instant);

    /// Whether the process considers itself connected. A `false` from the
    /// device process tears the whole session down.
    fn connected(&self) -> bool;

    /// Accepts a routed message. Field assignment only; the effect is
    /// applied on the next tick.
    fn handle_message(&mut self, message: &Command);
}
