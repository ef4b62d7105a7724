//! # Property Sync Process
//!
//! Synchronizes thing properties once the device is attached. On entry the
//! process fetches the shadow — the cloud-held last-known-values snapshot —
//! and only then starts the steady publish loop.
//!
//! The publish loop is deliberately entangled with timezone revalidation: a
//! device whose clock authority has expired cannot evaluate time-based
//! publish policies, so passing the timezone-valid-until bound forces a full
//! resynchronization instead of publishing on a stale clock.

use embassy_time::Instant;

use crate::backoff::Backoff;
use crate::bus::MessageBus;
use crate::config;
use crate::message::Command;
use crate::process::CloudProcess;
use crate::property::{Permission, PropertyContainer, PropertyValue};
use crate::time::TimeSource;

/// Reserved property carrying the timezone offset in seconds.
pub const TZ_OFFSET_PROPERTY: &str = "tz_offset";
/// Reserved property carrying the posix timestamp until which the offset is
/// valid.
pub const TZ_VALID_UNTIL_PROPERTY: &str = "tz_dst_until";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    RequestLastValues,
    Connected,
    Disconnect,
}

/// The property-sync state machine.
pub struct ThingProcess<const N: usize> {
    state: State,
    attempt: Backoff,
    properties: PropertyContainer<N>,
}

impl<const N: usize> ThingProcess<N> {
    pub fn new() -> Self {
        Self {
            state: State::RequestLastValues,
            attempt: Backoff::new(
                config::LAST_VALUES_RETRY_DELAY,
                config::LAST_VALUES_RETRY_DELAY,
            ),
            properties: PropertyContainer::new(),
        }
    }

    /// Registers the reserved timezone properties.
    ///
    /// Call once before the session starts and before adding user
    /// properties.
    pub fn begin(&mut self) {
        if let Some(p) = self
            .properties
            .add(TZ_OFFSET_PROPERTY, PropertyValue::Int(0), Permission::ReadWrite)
        {
            p.mark_write_on_demand();
        }
        if let Some(p) = self.properties.add(
            TZ_VALID_UNTIL_PROPERTY,
            PropertyValue::Unsigned(0),
            Permission::ReadWrite,
        ) {
            p.mark_write_on_demand();
        }
    }

    /// Thing-scope properties.
    pub fn properties(&self) -> &PropertyContainer<N> {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyContainer<N> {
        &mut self.properties
    }

    fn handle_request_last_values(&mut self, bus: &mut MessageBus, now: Instant) -> State {
        if self.attempt.is_retry() && !self.attempt.is_expired(now) {
            return State::RequestLastValues;
        }

        // If the shadow never arrives it is a better strategy to tear the
        // session down and re-establish from the ground up than to run with
        // possibly-stale state.
        if self.attempt.retry_count() > config::MAX_LAST_VALUES_RETRY_COUNT {
            return State::Disconnect;
        }

        self.attempt.retry(now);
        bus.send_upstream(Command::LastValuesRequest);
        State::RequestLastValues
    }

    fn handle_connected(&mut self, bus: &mut MessageBus, time: &mut dyn TimeSource) -> State {
        let now_posix = time.now_posix();
        self.properties.refresh_timestamps(now_posix);

        self.apply_timezone(time);

        bus.send_upstream(Command::SendProperties);

        if now_posix > self.tz_valid_until() {
            #[cfg(feature = "log")]
            log::info!("thing: timezone validity expired, resynchronizing");
            return State::RequestLastValues;
        }
        State::Connected
    }

    fn handle_disconnect(&mut self, bus: &mut MessageBus) -> State {
        bus.send_upstream(Command::Disconnected);
        self.attempt.rearm(
            config::LAST_VALUES_RETRY_DELAY,
            config::LAST_VALUES_RETRY_DELAY,
        );
        State::RequestLastValues
    }

    fn apply_timezone(&mut self, time: &mut dyn TimeSource) {
        let offset_changed = self
            .properties
            .get(TZ_OFFSET_PROPERTY)
            .is_some_and(|p| p.is_different_from_cloud());
        let until_changed = self
            .properties
            .get(TZ_VALID_UNTIL_PROPERTY)
            .is_some_and(|p| p.is_different_from_cloud());
        if !offset_changed && !until_changed {
            return;
        }

        if let Some(p) = self.properties.get_mut(TZ_OFFSET_PROPERTY) {
            p.commit_cloud_to_local();
        }
        if let Some(p) = self.properties.get_mut(TZ_VALID_UNTIL_PROPERTY) {
            p.commit_cloud_to_local();
        }

        let offset = self
            .properties
            .get(TZ_OFFSET_PROPERTY)
            .and_then(|p| p.value().as_i32())
            .unwrap_or(0);
        let until = self.tz_valid_until();
        time.set_timezone(offset, until);
    }

    fn tz_valid_until(&self) -> u64 {
        self.properties
            .get(TZ_VALID_UNTIL_PROPERTY)
            .and_then(|p| p.value().as_u32())
            .map(u64::from)
            .unwrap_or(0)
    }
}

impl<const N: usize> Default for ThingProcess<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> CloudProcess for ThingProcess<N> {
    fn update(&mut self, bus: &mut MessageBus, time: &mut dyn TimeSource, now: Instant) {
        self.state = match self.state {
            State::RequestLastValues => self.handle_request_last_values(bus, now),
            State::Connected => self.handle_connected(bus, time),
            State::Disconnect => self.handle_disconnect(bus),
        };
    }

    fn connected(&self) -> bool {
        self.state == State::Connected
    }

    fn handle_message(&mut self, message: &Command) {
        match message {
            Command::LastValues => {
                self.attempt.reset();
                self.state = State::Connected;
            }
            Command::Reset => {
                self.attempt.rearm(
                    config::LAST_VALUES_RETRY_DELAY,
                    config::LAST_VALUES_RETRY_DELAY,
                );
                self.state = State::RequestLastValues;
            }
            _ => {}
        }
    }
}
