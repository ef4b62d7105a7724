//! # Binary Codec Abstraction
//!
//! This module defines the seam to the compact binary wire format (CBOR in
//! the deployed system). The session core does not know the bit-level
//! layout; it only requires that
//!
//! - command encoding reports the bytes written, and refuses internal
//!   commands;
//! - property encoding is *resumable*: records are encoded one at a time and
//!   a record that does not fit reports [`CodecError::BufferTooSmall`] so
//!   the container can park its cursor and continue in the next packet;
//! - decoding is tolerant of partial or garbage input: it reports an error
//!   instead of corrupting state.

use crate::error::CodecError;
use crate::message::Command;
use crate::property::{Property, PropertyValue};

/// A decoded cloud write to a single named property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyUpdate<'a> {
    /// The property name as it appeared on the wire.
    pub name: &'a str,
    /// The decoded value.
    pub value: PropertyValue,
}

/// Encodes and decodes protocol messages and property records.
pub trait Codec {
    /// Encodes a wire command into `buf`, returning the bytes written.
    ///
    /// Internal commands yield [`CodecError::UnsupportedCommand`].
    fn encode_command(&mut self, command: &Command, buf: &mut [u8]) -> Result<usize, CodecError>;

    /// Decodes one inbound command from `buf`.
    fn decode_command(&mut self, buf: &[u8]) -> Result<Command, CodecError>;

    /// Encodes a single property record into `buf`, returning the bytes
    /// written, or [`CodecError::BufferTooSmall`] if it does not fit.
    fn encode_property(&mut self, property: &Property, buf: &mut [u8]) -> Result<usize, CodecError>;

    /// Decodes a property payload, invoking `apply` once per record.
    ///
    /// Records decoded before a malformed tail was detected may already have
    /// been applied; the container treats each record independently, so this
    /// is safe.
    fn decode_properties(
        &mut self,
        buf: &[u8],
        apply: &mut dyn FnMut(PropertyUpdate<'_>),
    ) -> Result<(), CodecError>;
}
