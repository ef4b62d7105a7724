//! # Transport Abstraction
//!
//! This module defines the `CloudTransport` trait, which abstracts the
//! MQTT-like publish/subscribe transport (including its TLS session and the
//! physical link underneath), allowing the session core to be hardware and
//! network-stack agnostic.
//!
//! Every method is non-blocking: the tick-driven session performs at most
//! one attempt per call and regresses through its own state machine on
//! failure. Inbound traffic is pulled with [`CloudTransport::poll`], which
//! hands over at most one owned message per call; the session routes it and
//! the owning process consumes it on its next tick.
//!
//! The module also derives the deterministic topic set from the device and
//! thing identities.

use core::fmt::Write as _;

use heapless::{String, Vec};

/// Maximum length for a single topic string.
pub const MAX_TOPIC_LEN: usize = 128;
/// Capacity of the inbound payload buffer. Sized for shadow payloads, the
/// largest message the cloud sends.
pub const RX_BUFFER_CAPACITY: usize = 1024;

/// A topic string buffer.
pub type Topic = String<MAX_TOPIC_LEN>;

/// One message received from the broker, owned by the session after the
/// poll call returns.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: Topic,
    pub payload: Vec<u8, RX_BUFFER_CAPACITY>,
}

/// A trait representing the broker transport.
pub trait CloudTransport {
    /// The error type returned by the transport.
    type Error: core::fmt::Debug;

    /// Whether the physical/link layer below the broker session is up.
    fn link_connected(&mut self) -> bool;

    /// Attempts the broker handshake. One non-blocking attempt.
    fn connect(&mut self, host: &str, port: u16, client_id: &str) -> Result<(), Self::Error>;

    /// Whether the broker session is currently established.
    fn is_connected(&mut self) -> bool;

    /// Subscribes to a topic.
    fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Unsubscribes from a topic.
    fn unsubscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Publishes a payload to a topic.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error>;

    /// Drives reception, returning at most one pending inbound message.
    fn poll(&mut self) -> Result<Option<InboundMessage>, Self::Error>;

    /// Tears the broker session down.
    fn disconnect(&mut self);
}

/// Topics derived from the device identity.
///
/// `/e/` topics carry property data, `/c/` topics carry protocol commands.
#[derive(Debug, Clone)]
pub struct DeviceTopics {
    pub data_out: Topic,
    pub data_in: Topic,
    pub command_up: Topic,
    pub command_down: Topic,
}

impl DeviceTopics {
    pub fn new(device_id: &str) -> Self {
        Self {
            data_out: format_topic(format_args!("/a/d/{device_id}/e/o")),
            data_in: format_topic(format_args!("/a/d/{device_id}/e/i")),
            command_up: format_topic(format_args!("/a/d/{device_id}/c/up")),
            command_down: format_topic(format_args!("/a/d/{device_id}/c/dw")),
        }
    }
}

/// Topics derived from the thing identity, available once attached.
#[derive(Debug, Clone)]
pub struct ThingTopics {
    pub data_out: Topic,
    pub data_in: Topic,
    pub shadow_out: Topic,
    pub shadow_in: Topic,
}

impl ThingTopics {
    pub fn new(thing_id: &str) -> Self {
        Self {
            data_out: format_topic(format_args!("/a/t/{thing_id}/e/o")),
            data_in: format_topic(format_args!("/a/t/{thing_id}/e/i")),
            shadow_out: format_topic(format_args!("/a/t/{thing_id}/shadow/o")),
            shadow_in: format_topic(format_args!("/a/t/{thing_id}/shadow/i")),
        }
    }
}

fn format_topic(args: core::fmt::Arguments<'_>) -> Topic {
    let mut topic = Topic::new();
    // Identities are capacity-bounded well below MAX_TOPIC_LEN, so the
    // write cannot overflow.
    let _ = topic.write_fmt(args);
    topic
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_topics_follow_the_scheme() {
        let topics = DeviceTopics::new("device-1");
        assert_eq!(topics.data_out.as_str(), "/a/d/device-1/e/o");
        assert_eq!(topics.data_in.as_str(), "/a/d/device-1/e/i");
        assert_eq!(topics.command_up.as_str(), "/a/d/device-1/c/up");
        assert_eq!(topics.command_down.as_str(), "/a/d/device-1/c/dw");
    }

    #[test]
    fn thing_topics_follow_the_scheme() {
        let topics = ThingTopics::new("8f3c");
        assert_eq!(topics.data_out.as_str(), "/a/t/8f3c/e/o");
        assert_eq!(topics.data_in.as_str(), "/a/t/8f3c/e/i");
        assert_eq!(topics.shadow_out.as_str(), "/a/t/8f3c/shadow/o");
        assert_eq!(topics.shadow_in.as_str(), "/a/t/8f3c/shadow/i");
    }
}
