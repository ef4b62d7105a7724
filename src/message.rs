//! # Protocol Messages
//!
//! This module defines the tagged message type exchanged between the session
//! processes and the cloud. A [`Command`] is a value type: whichever process
//! dequeues it owns it, and nothing aliases it after dispatch.
//!
//! Two families exist on the wire: *upstream* commands travel device → cloud
//! (capability announce, thing-id request, last-values request, OTA begin and
//! progress) and *downstream* commands travel cloud → device (thing-id
//! assignment, last-values notification, OTA available). A third, internal
//! family never reaches the codec; those commands coordinate the processes
//! through the message bus.
//!
//! Field buffers are fixed-capacity [`heapless`] types so every maximum
//! length is a visible, checked invariant rather than an unchecked copy.

use heapless::String;

/// Maximum length of a thing identifier (a UUID string).
pub const THING_ID_CAPACITY: usize = 36;
/// Maximum length of a device identifier.
pub const DEVICE_ID_CAPACITY: usize = 36;
/// Maximum length of the announced library version.
pub const LIB_VERSION_CAPACITY: usize = 10;
/// Maximum length of an OTA download URL.
pub const OTA_URL_CAPACITY: usize = 256;
/// Length of an OTA update identifier.
pub const OTA_ID_LEN: usize = 16;
/// Length of a SHA-256 digest.
pub const SHA256_LEN: usize = 32;

/// A cloud-side logical identity a device attaches to.
pub type ThingId = String<THING_ID_CAPACITY>;
/// The physical device identity used to derive topic names.
pub type DeviceId = String<DEVICE_ID_CAPACITY>;
/// An OTA download location.
pub type OtaUrl = String<OTA_URL_CAPACITY>;

/// Wire and internal message identifiers.
///
/// The wire values match the deployed protocol; internal identifiers live in
/// a reserved low range and are never encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum CommandId {
    // Upstream (device -> cloud).
    OtaBeginUp = 0x10000,
    OtaProgressUp = 0x10200,
    ThingIdRequestUp = 0x10300,
    LastValuesRequestUp = 0x10500,
    DeviceBeginUp = 0x10700,

    // Downstream (cloud -> device).
    OtaUpdateDown = 0x10100,
    ThingIdAssignmentDown = 0x10400,
    LastValuesDown = 0x10600,

    // Internal (never encoded).
    AttachThing = 100,
    DeviceAttached = 200,
    SendProperties = 300,
    Disconnected = 400,
    Reset = 500,
}

impl CommandId {
    /// Whether this identifier belongs to the cloud → device family.
    pub fn is_downstream(self) -> bool {
        matches!(
            self,
            CommandId::OtaUpdateDown | CommandId::ThingIdAssignmentDown | CommandId::LastValuesDown
        )
    }

    /// Whether this identifier is internal to the session and must never be
    /// wire-encoded.
    pub fn is_internal(self) -> bool {
        (self as u32) < 0x10000
    }
}

/// A protocol message. The variant is the tag that determines which fields
/// are valid.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Capability announce carrying the library version.
    DeviceBegin { lib_version: String<LIB_VERSION_CAPACITY> },
    /// Ask the cloud which thing this device is bound to.
    ThingIdRequest,
    /// Ask the cloud for the last known property values (the shadow).
    LastValuesRequest,
    /// Announce the checksum of the currently running firmware.
    OtaBegin { sha256: [u8; SHA256_LEN] },
    /// Report OTA progress or failure.
    ///
    /// `state` is the coordinator's wire state code, `state_data` carries a
    /// negative error code for failures and zero otherwise.
    OtaProgress {
        id: [u8; OTA_ID_LEN],
        state: u8,
        state_data: i32,
        time: u64,
    },

    /// The cloud assigned (or refused, with an empty id) a thing identity.
    ThingIdAssignment { thing_id: ThingId },
    /// The shadow payload arrived; the values were already applied to the
    /// property container by the orchestrator.
    LastValues,
    /// A firmware update is available for download.
    OtaUpdate {
        id: [u8; OTA_ID_LEN],
        url: OtaUrl,
        initial_sha256: [u8; SHA256_LEN],
        final_sha256: [u8; SHA256_LEN],
    },

    /// Internal: the device process asks the orchestrator to perform the
    /// attach handshake for the given thing.
    AttachThing { thing_id: ThingId },
    /// Internal: the orchestrator acknowledges a successful attach.
    DeviceAttached,
    /// Internal: the thing process asks for a property container encode and
    /// transmit pass.
    SendProperties,
    /// Internal: a process requests a full session teardown.
    Disconnected,
    /// Internal: the orchestrator resets the processes after a teardown.
    Reset,
}

impl Command {
    /// The identifier tag of this message.
    pub fn id(&self) -> CommandId {
        match self {
            Command::DeviceBegin { .. } => CommandId::DeviceBeginUp,
            Command::ThingIdRequest => CommandId::ThingIdRequestUp,
            Command::LastValuesRequest => CommandId::LastValuesRequestUp,
            Command::OtaBegin { .. } => CommandId::OtaBeginUp,
            Command::OtaProgress { .. } => CommandId::OtaProgressUp,
            Command::ThingIdAssignment { .. } => CommandId::ThingIdAssignmentDown,
            Command::LastValues => CommandId::LastValuesDown,
            Command::OtaUpdate { .. } => CommandId::OtaUpdateDown,
            Command::AttachThing { .. } => CommandId::AttachThing,
            Command::DeviceAttached => CommandId::DeviceAttached,
            Command::SendProperties => CommandId::SendProperties,
            Command::Disconnected => CommandId::Disconnected,
            Command::Reset => CommandId::Reset,
        }
    }
}
