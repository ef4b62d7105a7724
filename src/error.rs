//! # Error Types
//!
//! This module defines the error types used throughout the session library.
//! Internally the state machines never propagate errors — every fallible
//! step resolves to a next-state value and recovery happens through backoff
//! and state regression. These types appear at the seams instead: the
//! transport, the binary codec, and session setup.

/// The primary error enum for the session layer.
///
/// It is generic over the transport error type `T`, allowing it to wrap
/// specific errors from the underlying network transport.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CloudError<T> {
    /// An error occurred in the underlying transport layer.
    Transport(T),
    /// The binary codec rejected a payload.
    Codec(CodecError),
    /// The session is not connected to the broker.
    NotConnected,
    /// The buffer provided for an operation was too small.
    BufferTooSmall,
}

/// Allows automatic conversion of any transport error into a `CloudError`,
/// so the `?` operator works on transport results.
impl<T> From<T> for CloudError<T> {
    fn from(err: T) -> Self {
        CloudError::Transport(err)
    }
}

/// Errors reported by the binary codec collaborator.
///
/// A decode error on a single inbound message is always treated as
/// transient: the message is dropped and the session keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    /// The output buffer cannot hold the encoded form.
    BufferTooSmall,
    /// The input is not a well-formed message.
    Malformed,
    /// The message tag is not one this codec can represent, e.g. an
    /// internal command that must never be wire-encoded.
    UnsupportedCommand,
}

/// Errors raised while building the static session configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A configuration value exceeds its fixed capacity.
    ValueTooLong,
}
