//! # Device Attach Process
//!
//! Attaches the physical device to its logical thing identity through a
//! capability announce, a thing-id request, and an attach handshake.
//!
//! Two retry cadences are deliberately distinct: a missing answer to the
//! thing-id request retries on the *subscribe* cadence (the cloud is slow),
//! while an answer carrying an empty thing id switches to the much more
//! patient *attach* cadence (the device is registered but no thing is
//! configured for it, and nothing short of user action fixes that).
//!
//! The attach handshake itself is performed by the orchestrator (it owns
//! the transport); its success comes back as a [`Command::DeviceAttached`]
//! acknowledgment. A failed handshake produces no acknowledgment, and the
//! attach backoff simply fires again.

use embassy_time::Instant;

use crate::backoff::Backoff;
use crate::bus::MessageBus;
use crate::config;
use crate::message::{Command, LIB_VERSION_CAPACITY, ThingId};
use crate::process::CloudProcess;
use crate::property::PropertyContainer;
use crate::time::TimeSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    SendCapabilities,
    RequestThingId,
    ProcessThingId,
    AttachThing,
    Connected,
    Disconnect,
}

/// The device-attach state machine.
pub struct DeviceProcess<const N: usize> {
    state: State,
    attempt: Backoff,
    lib_version: heapless::String<LIB_VERSION_CAPACITY>,
    thing_id: Option<ThingId>,
    pending_assignment: Option<ThingId>,
    attached: bool,
    properties: PropertyContainer<N>,
}

impl<const N: usize> DeviceProcess<N> {
    pub fn new(lib_version: &str) -> Self {
        let mut version = heapless::String::new();
        let _ = version.push_str(lib_version);
        Self {
            state: State::SendCapabilities,
            attempt: Backoff::new(
                config::SUBSCRIBE_RETRY_DELAY,
                config::MAX_SUBSCRIBE_RETRY_DELAY,
            ),
            lib_version: version,
            thing_id: None,
            pending_assignment: None,
            attached: false,
            properties: PropertyContainer::new(),
        }
    }

    /// Whether the attach handshake has completed.
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// The validated thing identity, once assigned.
    pub fn thing_id(&self) -> Option<&ThingId> {
        self.thing_id.as_ref()
    }

    /// Device-scope properties.
    pub fn properties(&self) -> &PropertyContainer<N> {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyContainer<N> {
        &mut self.properties
    }

    fn handle_send_capabilities(&mut self, bus: &mut MessageBus) -> State {
        bus.send_upstream(Command::DeviceBegin {
            lib_version: self.lib_version.clone(),
        });
        State::RequestThingId
    }

    fn handle_request_thing_id(&mut self, bus: &mut MessageBus, now: Instant) -> State {
        if self.attempt.is_retry() && !self.attempt.is_expired(now) {
            return State::RequestThingId;
        }

        if self.attempt.retry_count() > config::MAX_SUBSCRIBE_RETRY_COUNT {
            return State::Disconnect;
        }

        bus.send_upstream(Command::ThingIdRequest);
        self.attempt.retry(now);
        #[cfg(feature = "log")]
        log::debug!(
            "device: thing id requested, attempt {} next in {} ms",
            self.attempt.retry_count(),
            self.attempt.wait_time().as_millis()
        );
        State::RequestThingId
    }

    fn handle_process_thing_id(&mut self, now: Instant) -> State {
        let Some(assignment) = self.pending_assignment.take() else {
            return State::RequestThingId;
        };

        if assignment.is_empty() {
            // Registered, but no thing is bound yet. Keep the retry count and
            // switch to the patient attach cadence.
            self.attempt.reconfigure(
                now,
                config::ATTACH_RETRY_DELAY,
                config::MAX_ATTACH_RETRY_DELAY,
            );
            #[cfg(feature = "log")]
            log::warn!(
                "device: empty thing id, next request in {} ms",
                self.attempt.wait_time().as_millis()
            );
            return State::RequestThingId;
        }

        self.thing_id = Some(assignment);
        self.attempt.begin(
            now,
            config::SUBSCRIBE_RETRY_DELAY,
            config::MAX_SUBSCRIBE_RETRY_DELAY,
        );
        State::AttachThing
    }

    fn handle_attach_thing(&mut self, bus: &mut MessageBus, now: Instant) -> State {
        if self.attached {
            self.attempt.begin(
                now,
                config::SUBSCRIBE_RETRY_DELAY,
                config::MAX_SUBSCRIBE_RETRY_DELAY,
            );
            #[cfg(feature = "log")]
            log::info!("device: attached");
            return State::Connected;
        }

        if self.attempt.is_retry() && !self.attempt.is_expired(now) {
            return State::AttachThing;
        }

        if self.attempt.retry_count() > config::MAX_ATTACH_RETRY_COUNT {
            return State::Disconnect;
        }

        let Some(thing_id) = self.thing_id.clone() else {
            return State::Disconnect;
        };
        bus.send_upstream(Command::AttachThing { thing_id });
        self.attempt.retry(now);
        State::AttachThing
    }

    fn handle_disconnect(&mut self, bus: &mut MessageBus) -> State {
        bus.send_upstream(Command::Disconnected);
        self.reset();
        State::SendCapabilities
    }

    fn reset(&mut self) {
        self.thing_id = None;
        self.pending_assignment = None;
        self.attached = false;
        self.attempt.rearm(
            config::SUBSCRIBE_RETRY_DELAY,
            config::MAX_SUBSCRIBE_RETRY_DELAY,
        );
    }
}

impl<const N: usize> CloudProcess for DeviceProcess<N> {
    fn update(&mut self, bus: &mut MessageBus, _time: &mut dyn TimeSource, now: Instant) {
        self.state = match self.state {
            State::SendCapabilities => self.handle_send_capabilities(bus),
            State::RequestThingId => self.handle_request_thing_id(bus, now),
            State::ProcessThingId => self.handle_process_thing_id(now),
            State::AttachThing => self.handle_attach_thing(bus, now),
            State::Connected => State::Connected,
            State::Disconnect => self.handle_disconnect(bus),
        };
    }

    fn connected(&self) -> bool {
        self.state != State::Disconnect
    }

    fn handle_message(&mut self, message: &Command) {
        match message {
            Command::ThingIdAssignment { thing_id } => {
                self.pending_assignment = Some(thing_id.clone());
                self.state = State::ProcessThingId;
            }
            Command::DeviceAttached => {
                self.attached = true;
            }
            Command::Reset => {
                self.reset();
                self.state = State::SendCapabilities;
            }
            _ => {}
        }
    }
}
