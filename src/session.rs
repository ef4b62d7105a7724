//! # Session Orchestrator
//!
//! The top-level state machine owning physical connectivity, time sync, the
//! broker connection, and the three sub-processes. One external driver
//! calls [`CloudSession::update`] at its own cadence; every tick performs
//! at most one non-blocking attempt per state and returns.
//!
//! The orchestrator is also the bus's upstream sink: after ticking the
//! processes it drains their queued messages, intercepting the internal
//! ones (property transmission, the attach handshake, teardown requests)
//! and wire-encoding the rest onto the command topic.

use embassy_time::Instant;

use crate::backoff::Backoff;
use crate::bus::MessageBus;
use crate::codec::Codec;
use crate::config::{self, SessionConfig, TX_BUFFER_CAPACITY};
use crate::error::CloudError;
use crate::message::{Command, CommandId, ThingId};
use crate::process::device::DeviceProcess;
use crate::process::ota::{OtaCoordinator, OtaPlatform, OtaState};
use crate::process::thing::ThingProcess;
use crate::process::{CloudProcess, channel};
use crate::time::{TimeSource, is_plausible};
use crate::transport::{CloudTransport, DeviceTopics, InboundMessage, ThingTopics};

/// Notifications surfaced to the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionEvent {
    /// The device attached to its thing.
    Connected,
    /// The shadow was applied to the local properties.
    Synchronized,
    /// The session tore down and will reconnect.
    Disconnected,
}

/// Callback invoked on session events.
pub type OnEventCallback = fn(SessionEvent);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    ConnectPhy,
    SyncTime,
    ConnectMqttBroker,
    Connected,
    Disconnect,
}

/// A durable logical connection between one device and one cloud thing.
pub struct CloudSession<T, C, Z, P, const N: usize = 16>
where
    T: CloudTransport,
    C: Codec,
    Z: TimeSource,
    P: OtaPlatform,
{
    config: SessionConfig,
    state: State,
    attempt: Backoff,
    transport: T,
    codec: C,
    time: Z,
    bus: MessageBus,
    device: DeviceProcess<N>,
    thing: ThingProcess<N>,
    ota: OtaCoordinator<P>,
    device_topics: DeviceTopics,
    thing_topics: Option<ThingTopics>,
    retransmit_buf: heapless::Vec<u8, TX_BUFFER_CAPACITY>,
    retransmit_pending: bool,
    teardown_requested: bool,
    on_event: Option<OnEventCallback>,
}

impl<T, C, Z, P, const N: usize> CloudSession<T, C, Z, P, N>
where
    T: CloudTransport,
    C: Codec,
    Z: TimeSource,
    P: OtaPlatform,
{
    pub fn new(config: SessionConfig, transport: T, codec: C, time: Z, platform: P) -> Self {
        let device_topics = DeviceTopics::new(config.device_id.as_str());
        let mut bus = MessageBus::new();
        bus.register(channel::DEVICE);
        bus.register(channel::THING);
        bus.register(channel::OTA);

        let device = DeviceProcess::new(config.lib_version.as_str());
        let thing = ThingProcess::new();
        let mut ota = OtaCoordinator::new(platform);
        ota.set_approval_required(config.ota_approval_required);

        Self {
            config,
            state: State::ConnectPhy,
            attempt: Backoff::new(
                config::RECONNECTION_RETRY_DELAY,
                config::MAX_RECONNECTION_RETRY_DELAY,
            ),
            transport,
            codec,
            time,
            bus,
            device,
            thing,
            ota,
            device_topics,
            thing_topics: None,
            retransmit_buf: heapless::Vec::new(),
            retransmit_pending: false,
            teardown_requested: false,
            on_event: None,
        }
    }

    /// One-time setup before the first tick: registers the reserved
    /// timezone properties.
    pub fn begin(&mut self) {
        self.thing.begin();
    }

    /// Registers the session event callback.
    pub fn on_event(&mut self, callback: OnEventCallback) {
        self.on_event = Some(callback);
    }

    /// Thing-scope properties.
    pub fn properties(&self) -> &crate::property::PropertyContainer<N> {
        self.thing.properties()
    }

    pub fn properties_mut(&mut self) -> &mut crate::property::PropertyContainer<N> {
        self.thing.properties_mut()
    }

    /// Device-scope properties.
    pub fn device_properties(&self) -> &crate::property::PropertyContainer<N> {
        self.device.properties()
    }

    pub fn device_properties_mut(&mut self) -> &mut crate::property::PropertyContainer<N> {
        self.device.properties_mut()
    }

    /// Requests re-publication of every thing property on the next pass.
    pub fn push(&mut self) {
        self.thing.properties_mut().force_publish_all();
    }

    /// Grants approval for a pending firmware update.
    pub fn approve_ota(&mut self) {
        self.ota.approve();
    }

    /// Current state of the firmware-update coordinator.
    pub fn ota_state(&self) -> OtaState {
        self.ota.state()
    }

    /// Whether the device is attached to its thing.
    pub fn is_attached(&self) -> bool {
        self.device.is_attached()
    }

    /// The assigned thing identity, once known.
    pub fn thing_id(&self) -> Option<&ThingId> {
        self.device.thing_id()
    }

    /// Whether the session reached its connected state.
    pub fn connected(&self) -> bool {
        self.state == State::Connected
    }

    /// The transport collaborator.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The shared time source.
    pub fn time(&self) -> &Z {
        &self.time
    }

    pub fn time_mut(&mut self) -> &mut Z {
        &mut self.time
    }

    /// The firmware-update coordinator.
    pub fn ota(&self) -> &OtaCoordinator<P> {
        &self.ota
    }

    pub fn ota_mut(&mut self) -> &mut OtaCoordinator<P> {
        &mut self.ota
    }

    /// Advances the session by one tick.
    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    /// Advances the session by one tick using a clock value the caller
    /// already sampled.
    pub fn update_at(&mut self, now: Instant) {
        self.state = match self.state {
            State::ConnectPhy => self.handle_connect_phy(now),
            State::SyncTime => self.handle_sync_time(),
            State::ConnectMqttBroker => self.handle_connect_broker(now),
            State::Connected => self.handle_connected(now),
            State::Disconnect => self.handle_disconnect(now),
        };

        if self.transport.is_connected() {
            self.poll_transport();
        }
    }

    fn handle_connect_phy(&mut self, now: Instant) -> State {
        if self.transport.link_connected()
            && (!self.attempt.is_retry() || self.attempt.is_expired(now))
        {
            return State::SyncTime;
        }
        State::ConnectPhy
    }

    fn handle_sync_time(&mut self) -> State {
        let posix = self.time.now_posix();
        if is_plausible(posix) {
            #[cfg(feature = "log")]
            log::debug!("session: clock synchronized to posix {}", posix);
            return State::ConnectMqttBroker;
        }
        // Go back and re-verify the link while waiting for time; a broker
        // handshake against an unset clock fails certificate validation.
        State::ConnectPhy
    }

    fn handle_connect_broker(&mut self, now: Instant) -> State {
        match self.transport.connect(
            self.config.broker_host.as_str(),
            self.config.broker_port,
            self.config.device_id.as_str(),
        ) {
            Ok(()) => {
                let _ = self.transport.subscribe(self.device_topics.command_down.as_str());
                let _ = self.transport.subscribe(self.device_topics.data_in.as_str());
                #[cfg(feature = "log")]
                log::info!(
                    "session: connected to {}:{}",
                    self.config.broker_host.as_str(),
                    self.config.broker_port
                );
                self.attempt.begin(
                    now,
                    config::SUBSCRIBE_RETRY_DELAY,
                    config::MAX_SUBSCRIBE_RETRY_DELAY,
                );
                State::Connected
            }
            Err(_error) => {
                self.attempt.retry(now);
                #[cfg(feature = "log")]
                log::error!(
                    "session: could not connect to {}:{} ({:?}), next attempt in {} ms",
                    self.config.broker_host.as_str(),
                    self.config.broker_port,
                    _error,
                    self.attempt.wait_time().as_millis()
                );
                // The clock or the physical link may have regressed too.
                State::ConnectPhy
            }
        }
    }

    fn handle_connected(&mut self, now: Instant) -> State {
        if !self.transport.is_connected() || !self.device.connected() {
            return State::Disconnect;
        }

        // Retransmit a possibly lost transaction before any other work.
        if self.retransmit_pending && !self.retransmit_buf.is_empty() {
            if let Some(topics) = &self.thing_topics {
                if self
                    .transport
                    .publish(topics.data_out.as_str(), &self.retransmit_buf)
                    .is_ok()
                {
                    self.retransmit_pending = false;
                }
            } else {
                // The thing identity is gone; the backup has nowhere to go.
                self.retransmit_pending = false;
                self.retransmit_buf.clear();
            }
        }

        if let Some(message) = self.bus.take(channel::DEVICE) {
            self.device.handle_message(&message);
        }
        self.device.update(&mut self.bus, &mut self.time, now);

        if let Some(message) = self.bus.take(channel::OTA) {
            self.ota.handle_message(&message);
        }
        self.ota.update(&mut self.bus, &mut self.time, now);

        if self.device.is_attached() {
            if let Some(message) = self.bus.take(channel::THING) {
                self.thing.handle_message(&message);
            }
            self.thing.update(&mut self.bus, &mut self.time, now);
        }

        while let Some(command) = self.bus.pop_upstream() {
            self.dispatch_upstream(command, now);
        }

        if self.teardown_requested {
            self.teardown_requested = false;
            return State::Disconnect;
        }
        State::Connected
    }

    fn handle_disconnect(&mut self, now: Instant) -> State {
        if self.transport.is_connected() {
            if let Some(topics) = &self.thing_topics {
                let _ = self.transport.unsubscribe(topics.data_in.as_str());
                let _ = self.transport.unsubscribe(topics.shadow_in.as_str());
            }
            self.transport.disconnect();
        }

        self.bus.route(Command::Reset, channel::DEVICE);
        self.bus.route(Command::Reset, channel::THING);
        self.thing_topics = None;
        if !self.retransmit_buf.is_empty() {
            self.retransmit_pending = true;
        }

        #[cfg(feature = "log")]
        log::info!("session: disconnected from cloud");
        self.emit(SessionEvent::Disconnected);

        self.attempt.begin(
            now,
            config::RECONNECTION_RETRY_DELAY,
            config::MAX_RECONNECTION_RETRY_DELAY,
        );
        State::ConnectPhy
    }

    fn dispatch_upstream(&mut self, command: Command, now: Instant) {
        match command {
            Command::SendProperties => self.send_properties(now),
            Command::AttachThing { thing_id } => self.attach_thing(&thing_id),
            Command::Disconnected => self.teardown_requested = true,
            command @ (Command::DeviceBegin { .. }
            | Command::ThingIdRequest
            | Command::LastValuesRequest
            | Command::OtaBegin { .. }
            | Command::OtaProgress { .. }) => self.send_command(&command),
            _command => {
                #[cfg(feature = "log")]
                log::warn!("session: unexpected upstream message {:?}", _command.id());
            }
        }
    }

    fn send_command(&mut self, command: &Command) {
        let mut buf = [0u8; TX_BUFFER_CAPACITY];
        match self.codec.encode_command(command, &mut buf) {
            Ok(len) if len > 0 => {
                if self
                    .transport
                    .publish(self.device_topics.command_up.as_str(), &buf[..len])
                    .is_err()
                {
                    #[cfg(feature = "log")]
                    log::error!("session: publish of {:?} failed", command.id());
                }
            }
            Ok(_) => {}
            Err(_error) => {
                #[cfg(feature = "log")]
                log::error!("session: encoding {:?} failed: {:?}", command.id(), _error);
            }
        }
    }

    fn send_properties(&mut self, now: Instant) {
        let mut buf = [0u8; TX_BUFFER_CAPACITY];

        if let Some(topics) = &self.thing_topics {
            match self
                .thing
                .properties_mut()
                .encode_into(&mut self.codec, &mut buf, now)
            {
                Ok(len) if len > 0 => {
                    // Keep a backup so a dropped transaction can be replayed.
                    self.retransmit_buf.clear();
                    let _ = self.retransmit_buf.extend_from_slice(&buf[..len]);
                    if self
                        .transport
                        .publish(topics.data_out.as_str(), &buf[..len])
                        .is_err()
                    {
                        self.retransmit_pending = true;
                    }
                }
                Ok(_) => {}
                Err(_error) => {
                    #[cfg(feature = "log")]
                    log::error!("session: thing property encoding failed: {:?}", _error);
                }
            }
        }

        match self
            .device
            .properties_mut()
            .encode_into(&mut self.codec, &mut buf, now)
        {
            Ok(len) if len > 0 => {
                let _ = self
                    .transport
                    .publish(self.device_topics.data_out.as_str(), &buf[..len]);
            }
            Ok(_) => {}
            Err(_error) => {
                #[cfg(feature = "log")]
                log::error!("session: device property encoding failed: {:?}", _error);
            }
        }
    }

    fn attach_thing(&mut self, thing_id: &ThingId) {
        if let Err(_error) = self.try_attach(thing_id) {
            // No acknowledgment is routed back; the device process's attach
            // backoff fires again.
            #[cfg(feature = "log")]
            log::error!(
                "session: attach to thing {} failed: {:?}",
                thing_id.as_str(),
                _error
            );
        }
    }

    fn try_attach(&mut self, thing_id: &ThingId) -> Result<(), CloudError<T::Error>> {
        let topics = ThingTopics::new(thing_id.as_str());
        self.transport.subscribe(topics.data_in.as_str())?;
        self.transport.subscribe(topics.shadow_in.as_str())?;

        #[cfg(feature = "log")]
        log::info!("session: attached to thing {}", thing_id.as_str());
        self.thing_topics = Some(topics);
        self.bus.route(Command::DeviceAttached, channel::DEVICE);
        self.emit(SessionEvent::Connected);
        Ok(())
    }

    fn poll_transport(&mut self) {
        loop {
            match self.transport.poll() {
                Ok(Some(message)) => self.route_inbound(message),
                Ok(None) => break,
                Err(_error) => {
                    #[cfg(feature = "log")]
                    log::warn!("session: transport poll failed: {:?}", _error);
                    break;
                }
            }
        }
    }

    fn route_inbound(&mut self, message: InboundMessage) {
        if message.topic == self.device_topics.command_down {
            match self.codec.decode_command(&message.payload) {
                Ok(command) => match command.id() {
                    CommandId::ThingIdAssignmentDown => self.bus.route(command, channel::DEVICE),
                    CommandId::OtaUpdateDown => self.bus.route(command, channel::OTA),
                    CommandId::LastValuesDown => self.bus.route(command, channel::THING),
                    _ => {}
                },
                Err(_error) => {
                    #[cfg(feature = "log")]
                    log::warn!("session: dropping malformed command: {:?}", _error);
                }
            }
            return;
        }

        if message.topic == self.device_topics.data_in {
            self.apply_device_properties(&message.payload);
            return;
        }

        let is_shadow = self
            .thing_topics
            .as_ref()
            .is_some_and(|t| message.topic == t.shadow_in);
        let is_thing_data = self
            .thing_topics
            .as_ref()
            .is_some_and(|t| message.topic == t.data_in);

        if is_shadow {
            self.apply_thing_properties(&message.payload);
            self.bus.route(Command::LastValues, channel::THING);
            self.emit(SessionEvent::Synchronized);
        } else if is_thing_data {
            self.apply_thing_properties(&message.payload);
        }
    }

    fn apply_thing_properties(&mut self, payload: &[u8]) {
        let container = self.thing.properties_mut();
        let result = self.codec.decode_properties(payload, &mut |update| {
            container.apply_update(update.name, update.value);
        });
        if result.is_err() {
            #[cfg(feature = "log")]
            log::warn!("session: dropping malformed thing property payload");
        }
    }

    fn apply_device_properties(&mut self, payload: &[u8]) {
        let container = self.device.properties_mut();
        let result = self.codec.decode_properties(payload, &mut |update| {
            container.apply_update(update.name, update.value);
        });
        if result.is_err() {
            #[cfg(feature = "log")]
            log::warn!("session: dropping malformed device property payload");
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(callback) = self.on_event {
            callback(event);
        }
    }
}
