//! Mock collaborators shared by the integration tests.
//!
//! The mock codec uses a trivial length-prefixed binary format that is
//! symmetric for all wire commands, so tests can both feed the session
//! inbound frames and decode what it published.

#![allow(dead_code)]

use std::collections::VecDeque;

use nimbus_session::message::{OTA_ID_LEN, SHA256_LEN};
use nimbus_session::process::ota::{BootOutcome, FetchStatus, OtaContext, OtaError, OtaPlatform};
use nimbus_session::property::{Property, PropertyValue};
use nimbus_session::transport::{RX_BUFFER_CAPACITY, Topic};
use nimbus_session::{Codec, CodecError, CloudTransport, Command, InboundMessage, TimeSource};

/// A posix timestamp comfortably past the plausibility epoch.
pub const TEST_POSIX: u64 = 1_700_000_000;

#[derive(Debug)]
pub struct MockError;

#[derive(Default)]
pub struct MockTransport {
    pub link_up: bool,
    pub broker_available: bool,
    pub connected: bool,
    pub fail_publish: bool,
    pub fail_subscribe: bool,
    pub connect_calls: usize,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
    pub inbound: VecDeque<InboundMessage>,
}

impl MockTransport {
    pub fn online() -> Self {
        Self {
            link_up: true,
            broker_available: true,
            ..Self::default()
        }
    }

    pub fn push_inbound(&mut self, topic: &str, payload: &[u8]) {
        let mut owned_topic = Topic::new();
        owned_topic.push_str(topic).unwrap();
        let owned_payload: heapless::Vec<u8, RX_BUFFER_CAPACITY> =
            heapless::Vec::from_slice(payload).unwrap();
        self.inbound.push_back(InboundMessage {
            topic: owned_topic,
            payload: owned_payload,
        });
    }

    /// Payloads published to `topic`, oldest first.
    pub fn published_to(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|t| t == topic)
    }
}

impl CloudTransport for MockTransport {
    type Error = MockError;

    fn link_connected(&mut self) -> bool {
        self.link_up
    }

    fn connect(&mut self, _host: &str, _port: u16, _client_id: &str) -> Result<(), MockError> {
        self.connect_calls += 1;
        if self.broker_available {
            self.connected = true;
            Ok(())
        } else {
            Err(MockError)
        }
    }

    fn is_connected(&mut self) -> bool {
        self.connected
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), MockError> {
        if self.fail_subscribe {
            return Err(MockError);
        }
        self.subscriptions.push(topic.to_owned());
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), MockError> {
        self.subscriptions.retain(|t| t != topic);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), MockError> {
        if self.fail_publish {
            return Err(MockError);
        }
        self.published.push((topic.to_owned(), payload.to_vec()));
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<InboundMessage>, MockError> {
        Ok(self.inbound.pop_front())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

pub struct MockTime {
    pub posix: u64,
    pub timezone: Option<(i32, u64)>,
}

impl MockTime {
    pub fn synced() -> Self {
        Self {
            posix: TEST_POSIX,
            timezone: None,
        }
    }

    pub fn unset() -> Self {
        Self {
            posix: 0,
            timezone: None,
        }
    }
}

impl TimeSource for MockTime {
    fn now_posix(&mut self) -> u64 {
        self.posix
    }

    fn set_timezone(&mut self, offset_seconds: i32, valid_until: u64) {
        self.timezone = Some((offset_seconds, valid_until));
    }
}

pub struct MockPlatform {
    pub capable: bool,
    pub boot: BootOutcome,
    pub sha: [u8; SHA256_LEN],
    pub open_result: Result<(), OtaError>,
    pub fetch_results: VecDeque<Result<FetchStatus, OtaError>>,
    pub flash_result: Result<(), OtaError>,
    pub rebooted: bool,
    pub reset_count: usize,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self {
            capable: true,
            boot: BootOutcome::ColdBoot,
            sha: [0xAB; SHA256_LEN],
            open_result: Ok(()),
            fetch_results: VecDeque::new(),
            flash_result: Ok(()),
            rebooted: false,
            reset_count: 0,
        }
    }
}

impl OtaPlatform for MockPlatform {
    fn is_capable(&self) -> bool {
        self.capable
    }

    fn boot_outcome(&mut self) -> BootOutcome {
        self.boot
    }

    fn firmware_sha256(&mut self) -> Result<[u8; SHA256_LEN], OtaError> {
        Ok(self.sha)
    }

    fn open(&mut self, _context: &OtaContext) -> Result<(), OtaError> {
        self.open_result
    }

    fn fetch(&mut self, _context: &OtaContext) -> Result<FetchStatus, OtaError> {
        self.fetch_results
            .pop_front()
            .unwrap_or(Ok(FetchStatus::Complete))
    }

    fn flash(&mut self, _context: &OtaContext) -> Result<(), OtaError> {
        self.flash_result
    }

    fn reboot(&mut self) {
        self.rebooted = true;
    }

    fn reset(&mut self) {
        self.reset_count += 1;
    }
}

const TYPE_BOOL: u8 = 0x01;
const TYPE_INT: u8 = 0x02;
const TYPE_UNSIGNED: u8 = 0x03;
const TYPE_FLOAT: u8 = 0x04;
const TYPE_TEXT: u8 = 0x05;

/// Length-prefixed test codec, symmetric for every wire command.
#[derive(Default)]
pub struct MockCodec;

impl MockCodec {
    fn encode_value(value: &PropertyValue, out: &mut Vec<u8>) {
        match value {
            PropertyValue::Bool(v) => {
                out.push(TYPE_BOOL);
                out.push(*v as u8);
            }
            PropertyValue::Int(v) => {
                out.push(TYPE_INT);
                out.extend_from_slice(&v.to_be_bytes());
            }
            PropertyValue::Unsigned(v) => {
                out.push(TYPE_UNSIGNED);
                out.extend_from_slice(&v.to_be_bytes());
            }
            PropertyValue::Float(v) => {
                out.push(TYPE_FLOAT);
                out.extend_from_slice(&v.to_bits().to_be_bytes());
            }
            PropertyValue::Text(v) => {
                out.push(TYPE_TEXT);
                out.push(v.len() as u8);
                out.extend_from_slice(v.as_bytes());
            }
        }
    }

    fn decode_value(buf: &[u8], cursor: &mut usize) -> Result<PropertyValue, CodecError> {
        let kind = *buf.get(*cursor).ok_or(CodecError::Malformed)?;
        *cursor += 1;
        match kind {
            TYPE_BOOL => {
                let v = *buf.get(*cursor).ok_or(CodecError::Malformed)?;
                *cursor += 1;
                Ok(PropertyValue::Bool(v != 0))
            }
            TYPE_INT => {
                let bytes = read_array::<4>(buf, cursor)?;
                Ok(PropertyValue::Int(i32::from_be_bytes(bytes)))
            }
            TYPE_UNSIGNED => {
                let bytes = read_array::<4>(buf, cursor)?;
                Ok(PropertyValue::Unsigned(u32::from_be_bytes(bytes)))
            }
            TYPE_FLOAT => {
                let bytes = read_array::<4>(buf, cursor)?;
                Ok(PropertyValue::Float(f32::from_bits(u32::from_be_bytes(
                    bytes,
                ))))
            }
            TYPE_TEXT => {
                let len = *buf.get(*cursor).ok_or(CodecError::Malformed)? as usize;
                *cursor += 1;
                let bytes = buf
                    .get(*cursor..*cursor + len)
                    .ok_or(CodecError::Malformed)?;
                *cursor += len;
                let text = core::str::from_utf8(bytes).map_err(|_| CodecError::Malformed)?;
                PropertyValue::text(text).ok_or(CodecError::Malformed)
            }
            _ => Err(CodecError::Malformed),
        }
    }

    /// Encodes a property record the way `encode_property` does, for
    /// building shadow payloads in tests.
    pub fn property_record(name: &str, value: &PropertyValue) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
        Self::encode_value(value, &mut out);
        out
    }
}

fn read_array<const L: usize>(buf: &[u8], cursor: &mut usize) -> Result<[u8; L], CodecError> {
    let bytes = buf
        .get(*cursor..*cursor + L)
        .ok_or(CodecError::Malformed)?;
    *cursor += L;
    Ok(bytes.try_into().unwrap())
}

fn read_short_str<'a>(buf: &'a [u8], cursor: &mut usize) -> Result<&'a str, CodecError> {
    let len = *buf.get(*cursor).ok_or(CodecError::Malformed)? as usize;
    *cursor += 1;
    let bytes = buf
        .get(*cursor..*cursor + len)
        .ok_or(CodecError::Malformed)?;
    *cursor += len;
    core::str::from_utf8(bytes).map_err(|_| CodecError::Malformed)
}

impl Codec for MockCodec {
    fn encode_command(&mut self, command: &Command, buf: &mut [u8]) -> Result<usize, CodecError> {
        if command.id().is_internal() {
            return Err(CodecError::UnsupportedCommand);
        }

        let mut out: Vec<u8> = Vec::new();
        out.extend_from_slice(&(command.id() as u32).to_be_bytes());
        match command {
            Command::DeviceBegin { lib_version } => {
                out.push(lib_version.len() as u8);
                out.extend_from_slice(lib_version.as_bytes());
            }
            Command::ThingIdRequest | Command::LastValuesRequest | Command::LastValues => {}
            Command::OtaBegin { sha256 } => out.extend_from_slice(sha256),
            Command::OtaProgress {
                id,
                state,
                state_data,
                time,
            } => {
                out.extend_from_slice(id);
                out.push(*state);
                out.extend_from_slice(&state_data.to_be_bytes());
                out.extend_from_slice(&time.to_be_bytes());
            }
            Command::ThingIdAssignment { thing_id } => {
                out.push(thing_id.len() as u8);
                out.extend_from_slice(thing_id.as_bytes());
            }
            Command::OtaUpdate {
                id,
                url,
                initial_sha256,
                final_sha256,
            } => {
                out.extend_from_slice(id);
                out.push(url.len() as u8);
                out.extend_from_slice(url.as_bytes());
                out.extend_from_slice(initial_sha256);
                out.extend_from_slice(final_sha256);
            }
            _ => return Err(CodecError::UnsupportedCommand),
        }

        if out.len() > buf.len() {
            return Err(CodecError::BufferTooSmall);
        }
        buf[..out.len()].copy_from_slice(&out);
        Ok(out.len())
    }

    fn decode_command(&mut self, buf: &[u8]) -> Result<Command, CodecError> {
        let mut cursor = 0;
        let id = u32::from_be_bytes(read_array::<4>(buf, &mut cursor)?);
        match id {
            0x10700 => {
                let version = read_short_str(buf, &mut cursor)?;
                Ok(Command::DeviceBegin {
                    lib_version: heapless::String::try_from(version)
                        .map_err(|_| CodecError::Malformed)?,
                })
            }
            0x10300 => Ok(Command::ThingIdRequest),
            0x10500 => Ok(Command::LastValuesRequest),
            0x10600 => Ok(Command::LastValues),
            0x10000 => Ok(Command::OtaBegin {
                sha256: read_array::<SHA256_LEN>(buf, &mut cursor)?,
            }),
            0x10200 => {
                let id = read_array::<OTA_ID_LEN>(buf, &mut cursor)?;
                let state = *buf.get(cursor).ok_or(CodecError::Malformed)?;
                cursor += 1;
                let state_data = i32::from_be_bytes(read_array::<4>(buf, &mut cursor)?);
                let time = u64::from_be_bytes(read_array::<8>(buf, &mut cursor)?);
                Ok(Command::OtaProgress {
                    id,
                    state,
                    state_data,
                    time,
                })
            }
            0x10400 => {
                let thing_id = read_short_str(buf, &mut cursor)?;
                Ok(Command::ThingIdAssignment {
                    thing_id: heapless::String::try_from(thing_id)
                        .map_err(|_| CodecError::Malformed)?,
                })
            }
            0x10100 => {
                let id = read_array::<OTA_ID_LEN>(buf, &mut cursor)?;
                let url = read_short_str(buf, &mut cursor)?;
                let url = heapless::String::try_from(url).map_err(|_| CodecError::Malformed)?;
                let initial_sha256 = read_array::<SHA256_LEN>(buf, &mut cursor)?;
                let final_sha256 = read_array::<SHA256_LEN>(buf, &mut cursor)?;
                Ok(Command::OtaUpdate {
                    id,
                    url,
                    initial_sha256,
                    final_sha256,
                })
            }
            _ => Err(CodecError::Malformed),
        }
    }

    fn encode_property(&mut self, property: &Property, buf: &mut [u8]) -> Result<usize, CodecError> {
        let record = Self::property_record(property.name(), property.value());
        if record.len() > buf.len() {
            return Err(CodecError::BufferTooSmall);
        }
        buf[..record.len()].copy_from_slice(&record);
        Ok(record.len())
    }

    fn decode_properties(
        &mut self,
        buf: &[u8],
        apply: &mut dyn FnMut(nimbus_session::PropertyUpdate<'_>),
    ) -> Result<(), CodecError> {
        let mut cursor = 0;
        while cursor < buf.len() {
            let name = read_short_str(buf, &mut cursor)?;
            let value = Self::decode_value(buf, &mut cursor)?;
            apply(nimbus_session::PropertyUpdate { name, value });
        }
        Ok(())
    }
}

/// Encodes a wire command into an owned payload for feeding the session.
pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut buf = [0u8; 512];
    let len = MockCodec.encode_command(command, &mut buf).unwrap();
    buf[..len].to_vec()
}

/// Decodes every command published to a topic.
pub fn decode_published(transport: &MockTransport, topic: &str) -> Vec<Command> {
    transport
        .published_to(topic)
        .iter()
        .map(|payload| MockCodec.decode_command(payload).unwrap())
        .collect()
}
