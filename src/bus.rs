//! # Message Bus
//!
//! In-process routing of [`Command`] values between the session processes.
//!
//! The bus has two sides:
//!
//! - **Upstream**: a single bounded FIFO drained by the session orchestrator
//!   after every tick. Processes never perform I/O themselves; they enqueue
//!   and return, and the orchestrator wire-encodes and transmits afterwards.
//! - **Channels**: named single-slot mailboxes, one per process. Routing a
//!   message to a channel replaces whatever was pending there, so each
//!   channel holds *at most one* pending message and processing is always
//!   deferred to the owner's next tick. Routing to an unknown channel is a
//!   no-op, never an error — unexpected traffic must not crash the device.

use heapless::{Deque, Vec};

use crate::message::Command;

/// Maximum number of registered channels.
pub const MAX_CHANNELS: usize = 4;
/// Depth of the upstream queue.
pub const UPSTREAM_DEPTH: usize = 8;

/// Routes messages between processes and collects upstream traffic.
#[derive(Default)]
pub struct MessageBus {
    upstream: Deque<Command, UPSTREAM_DEPTH>,
    channels: Vec<(&'static str, Option<Command>), MAX_CHANNELS>,
}

impl MessageBus {
    /// Creates an empty bus with no registered channels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel, replacing any previous registration (and
    /// discarding its pending message).
    ///
    /// Returns `false` if the channel table is full.
    pub fn register(&mut self, channel: &'static str) -> bool {
        if let Some(slot) = self.slot_mut(channel) {
            *slot = None;
            return true;
        }
        self.channels.push((channel, None)).is_ok()
    }

    /// Removes a channel and drops its pending message.
    pub fn unregister(&mut self, channel: &str) {
        if let Some(index) = self.channels.iter().position(|(name, _)| *name == channel) {
            self.channels.swap_remove(index);
        }
    }

    /// Routes a message to a channel's mailbox.
    ///
    /// A pending message is replaced; an unknown channel swallows the
    /// message silently.
    pub fn route(&mut self, message: Command, channel: &str) {
        if let Some(slot) = self.slot_mut(channel) {
            *slot = Some(message);
        }
    }

    /// Takes the pending message for a channel, if any.
    pub fn take(&mut self, channel: &str) -> Option<Command> {
        self.slot_mut(channel).and_then(Option::take)
    }

    /// Enqueues a message for the upstream sink.
    ///
    /// When the queue is full the message is dropped; the retry layers above
    /// regenerate anything that matters.
    pub fn send_upstream(&mut self, message: Command) {
        if self.upstream.push_back(message).is_err() {
            #[cfg(feature = "log")]
            log::warn!("bus: upstream queue full, message dropped");
        }
    }

    /// Dequeues the oldest upstream message.
    pub fn pop_upstream(&mut self) -> Option<Command> {
        self.upstream.pop_front()
    }

    /// Number of messages waiting for the upstream sink.
    pub fn upstream_len(&self) -> usize {
        self.upstream.len()
    }

    fn slot_mut(&mut self, channel: &str) -> Option<&mut Option<Command>> {
        self.channels
            .iter_mut()
            .find(|(name, _)| *name == channel)
            .map(|(_, slot)| slot)
    }
}
