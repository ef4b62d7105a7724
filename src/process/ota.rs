//! # OTA Coordinator
//!
//! Drives the firmware-update lifecycle: announce the running firmware's
//! checksum, wait for an update offer, gate it on the approval policy, then
//! delegate download and flashing to the board collaborator and reboot.
//!
//! Status reporting is a cross-cutting rule rather than a state: whenever
//! the previous tick's state differs from the current one and the current
//! state is [`OtaState::OtaAvailable`] or later (failures included), exactly
//! one progress report goes upstream before any state logic runs. That
//! yields one report per distinct state and none for the idle chatter.
//!
//! Failures never propagate: any error from the board collaborator lands in
//! [`OtaState::Fail`], which reports once, resets the board, discards the
//! in-flight context, and returns to [`OtaState::Idle`] to await the next
//! offer.

use embassy_time::Instant;

use crate::bus::MessageBus;
use crate::message::{Command, OTA_ID_LEN, OtaUrl, SHA256_LEN};
use crate::process::CloudProcess;
use crate::time::TimeSource;

/// Terminal failure categories reported to the cloud.
///
/// The wire carries these as negative codes in the progress report's
/// `state_data` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OtaError {
    NoCapableBootloader,
    NoOtaStorage,
    StorageInit,
    StorageOpen,
    HeaderLength,
    HeaderCrc,
    HeaderMagicNumber,
    UrlParse,
    ServerConnect,
    HttpHeader,
    HttpResponse,
    Download,
    StorageEnd,
    Library,
}

impl OtaError {
    /// The negative wire code for this failure category.
    pub fn code(self) -> i32 {
        match self {
            OtaError::NoCapableBootloader => -1,
            OtaError::NoOtaStorage => -2,
            OtaError::StorageInit => -3,
            OtaError::StorageOpen => -4,
            OtaError::HeaderLength => -5,
            OtaError::HeaderCrc => -6,
            OtaError::HeaderMagicNumber => -7,
            OtaError::UrlParse => -8,
            OtaError::ServerConnect => -9,
            OtaError::HttpHeader => -10,
            OtaError::HttpResponse => -11,
            OtaError::Download => -12,
            OtaError::StorageEnd => -13,
            OtaError::Library => -14,
        }
    }
}

/// Why the device booted, as far as the bootloader can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootOutcome {
    /// A normal power-on or reset.
    ColdBoot,
    /// First boot after a firmware update was applied.
    PostUpdate,
}

/// Progress of a chunked download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FetchStatus {
    /// More data is pending; call again next tick.
    InProgress,
    /// The image is fully downloaded and verified.
    Complete,
}

/// The board/firmware collaborator: storage, download and reboot.
///
/// All methods are non-blocking; `fetch` in particular moves at most one
/// chunk per call.
pub trait OtaPlatform {
    /// Whether this board can apply firmware updates at all.
    fn is_capable(&self) -> bool;

    /// Inspects the boot reason. Called once at startup.
    fn boot_outcome(&mut self) -> BootOutcome;

    /// Checksum of the currently running firmware image.
    fn firmware_sha256(&mut self) -> Result<[u8; SHA256_LEN], OtaError>;

    /// Opens and prepares the update storage for the offered image.
    fn open(&mut self, context: &OtaContext) -> Result<(), OtaError>;

    /// Downloads the next chunk of the image.
    fn fetch(&mut self, context: &OtaContext) -> Result<FetchStatus, OtaError>;

    /// Activates the downloaded image.
    fn flash(&mut self, context: &OtaContext) -> Result<(), OtaError>;

    /// Restarts the device. Expected never to return control.
    fn reboot(&mut self);

    /// Cleans up after a failed attempt.
    fn reset(&mut self);
}

/// State carried only while an update is in flight.
#[derive(Debug, Clone)]
pub struct OtaContext {
    pub id: [u8; OTA_ID_LEN],
    pub url: OtaUrl,
    pub initial_sha256: [u8; SHA256_LEN],
    pub final_sha256: [u8; SHA256_LEN],
    report_counter: u16,
}

/// Coordinator states. `Fail` carries the terminal failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OtaState {
    Resume,
    OtaBegin,
    Idle,
    OtaAvailable,
    StartOta,
    Fetch,
    FlashOta,
    Reboot,
    Fail(OtaError),
}

impl OtaState {
    /// The wire code of this state in progress reports.
    pub fn wire_code(self) -> u8 {
        match self {
            OtaState::Resume => 0,
            OtaState::OtaBegin => 1,
            OtaState::Idle => 2,
            OtaState::OtaAvailable => 3,
            OtaState::StartOta => 4,
            OtaState::Fetch => 5,
            OtaState::FlashOta => 6,
            OtaState::Reboot => 7,
            OtaState::Fail(_) => 8,
        }
    }

    /// Whether entering this state emits a progress report.
    fn reportable(self) -> bool {
        matches!(
            self,
            OtaState::OtaAvailable
                | OtaState::StartOta
                | OtaState::Fetch
                | OtaState::FlashOta
                | OtaState::Reboot
                | OtaState::Fail(_)
        )
    }

    fn state_data(self) -> i32 {
        match self {
            OtaState::Fail(error) => error.code(),
            _ => 0,
        }
    }
}

/// The firmware-update coordinator.
pub struct OtaCoordinator<P: OtaPlatform> {
    platform: P,
    state: OtaState,
    previous_state: OtaState,
    context: Option<OtaContext>,
    pending_update: Option<OtaContext>,
    approval_required: bool,
    approved: bool,
}

impl<P: OtaPlatform> OtaCoordinator<P> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            state: OtaState::Resume,
            previous_state: OtaState::Resume,
            context: None,
            pending_update: None,
            approval_required: false,
            approved: false,
        }
    }

    /// Current coordinator state.
    pub fn state(&self) -> OtaState {
        self.state
    }

    /// Requires (or stops requiring) explicit approval before an offered
    /// update starts.
    pub fn set_approval_required(&mut self, required: bool) {
        self.approval_required = required;
    }

    /// Grants approval for the currently offered update.
    pub fn approve(&mut self) {
        self.approved = true;
    }

    /// The board collaborator.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    fn resume(&mut self) -> OtaState {
        let _outcome = self.platform.boot_outcome();
        #[cfg(feature = "log")]
        log::debug!("ota: boot outcome {:?}", _outcome);
        OtaState::OtaBegin
    }

    fn ota_begin(&mut self, bus: &mut MessageBus) -> OtaState {
        if !self.platform.is_capable() {
            // Capability never recovers without a reboot; staying here keeps
            // the coordinator in a safe no-op loop.
            if self.previous_state != OtaState::OtaBegin {
                #[cfg(feature = "log")]
                log::warn!("ota: updates are not available on this board");
            }
            return OtaState::OtaBegin;
        }

        match self.platform.firmware_sha256() {
            Ok(sha256) => {
                bus.send_upstream(Command::OtaBegin { sha256 });
                OtaState::Idle
            }
            Err(_error) => {
                #[cfg(feature = "log")]
                log::error!("ota: checksum of running firmware failed: {:?}", _error);
                OtaState::OtaBegin
            }
        }
    }

    fn idle(&mut self) -> OtaState {
        match self.pending_update.take() {
            Some(context) if self.context.is_none() => {
                self.context = Some(context);
                OtaState::OtaAvailable
            }
            _ => OtaState::Idle,
        }
    }

    fn ota_available(&mut self) -> OtaState {
        if self.approval_required && !self.approved {
            return OtaState::OtaAvailable;
        }
        self.approved = false;
        OtaState::StartOta
    }

    fn start_ota(&mut self) -> OtaState {
        let Some(context) = self.context.as_ref() else {
            return OtaState::Idle;
        };
        match self.platform.open(context) {
            Ok(()) => OtaState::Fetch,
            Err(error) => OtaState::Fail(error),
        }
    }

    fn fetch(&mut self) -> OtaState {
        let Some(context) = self.context.as_ref() else {
            return OtaState::Idle;
        };
        match self.platform.fetch(context) {
            Ok(FetchStatus::InProgress) => OtaState::Fetch,
            Ok(FetchStatus::Complete) => OtaState::FlashOta,
            Err(error) => OtaState::Fail(error),
        }
    }

    fn flash_ota(&mut self) -> OtaState {
        let Some(context) = self.context.as_ref() else {
            return OtaState::Idle;
        };
        match self.platform.flash(context) {
            Ok(()) => OtaState::Reboot,
            Err(error) => OtaState::Fail(error),
        }
    }

    fn reboot(&mut self) -> OtaState {
        self.platform.reboot();
        // Control is not expected back; if the collaborator returns anyway,
        // stay here.
        OtaState::Reboot
    }

    fn fail(&mut self) -> OtaState {
        self.platform.reset();
        self.context = None;
        OtaState::Idle
    }

    fn report_status(&mut self, bus: &mut MessageBus, time: &mut dyn TimeSource) {
        let Some(context) = self.context.as_mut() else {
            return;
        };
        // Sub-second uniqueness for consecutive reports within one posix
        // second.
        let time_us = time
            .now_posix()
            .saturating_mul(1_000_000)
            .saturating_add(context.report_counter as u64);
        context.report_counter = context.report_counter.saturating_add(1);
        bus.send_upstream(Command::OtaProgress {
            id: context.id,
            state: self.state.wire_code(),
            state_data: self.state.state_data(),
            time: time_us,
        });
    }
}

impl<P: OtaPlatform> CloudProcess for OtaCoordinator<P> {
    fn update(&mut self, bus: &mut MessageBus, time: &mut dyn TimeSource, _now: Instant) {
        if self.state != self.previous_state && self.state.reportable() {
            self.report_status(bus, time);
        }
        self.previous_state = self.state;

        self.state = match self.state {
            OtaState::Resume => self.resume(),
            OtaState::OtaBegin => self.ota_begin(bus),
            OtaState::Idle => self.idle(),
            OtaState::OtaAvailable => self.ota_available(),
            OtaState::StartOta => self.start_ota(),
            OtaState::Fetch => self.fetch(),
            OtaState::FlashOta => self.flash_ota(),
            OtaState::Reboot => self.reboot(),
            OtaState::Fail(_) => self.fail(),
        };
    }

    fn connected(&self) -> bool {
        true
    }

    fn handle_message(&mut self, message: &Command) {
        if let Command::OtaUpdate {
            id,
            url,
            initial_sha256,
            final_sha256,
        } = message
        {
            self.pending_update = Some(OtaContext {
                id: *id,
                url: url.clone(),
                initial_sha256: *initial_sha256,
                final_sha256: *final_sha256,
                report_counter: 0,
            });
        }
    }
}
