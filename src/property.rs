//! # Property Model
//!
//! Typed named properties synchronized between the device and the cloud.
//!
//! A [`Property`] wraps one typed value together with the last value the
//! cloud has acknowledged, a permission, and a publish policy. A property is
//! *different from cloud* when the two representations diverge beyond the
//! policy threshold; the publish policy then decides when the divergence is
//! actually transmitted.
//!
//! A [`PropertyContainer`] owns the properties of one process in insertion
//! order, which is also the transmission order. Containers encode through
//! the [`Codec`] seam one record at a time; when the transmit buffer fills
//! up mid-container the cursor is parked and the next encode pass resumes
//! from it — multi-packet fragmentation is a named behavior of the
//! bandwidth-bounded transport, not an error.

use embassy_time::{Duration, Instant};
use heapless::{String, Vec};

use crate::codec::Codec;
use crate::error::CodecError;

/// Maximum length of a property name.
pub const PROPERTY_NAME_CAPACITY: usize = 32;
/// Maximum length of a text property value.
pub const TEXT_VALUE_CAPACITY: usize = 64;

/// A property name buffer.
pub type PropertyName = String<PROPERTY_NAME_CAPACITY>;

/// One typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i32),
    Unsigned(u32),
    Float(f32),
    Text(String<TEXT_VALUE_CAPACITY>),
}

impl PropertyValue {
    /// Builds a text value, rejecting strings over capacity.
    pub fn text(value: &str) -> Option<Self> {
        String::try_from(value).ok().map(PropertyValue::Text)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            PropertyValue::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Whether two values are of the same kind.
    pub fn same_kind(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (PropertyValue::Bool(_), PropertyValue::Bool(_))
                | (PropertyValue::Int(_), PropertyValue::Int(_))
                | (PropertyValue::Unsigned(_), PropertyValue::Unsigned(_))
                | (PropertyValue::Float(_), PropertyValue::Float(_))
                | (PropertyValue::Text(_), PropertyValue::Text(_))
        )
    }

    /// Whether `self` diverges from `other` beyond `min_delta`.
    ///
    /// The delta applies to numeric kinds; booleans and text differ on any
    /// inequality. Values of different kinds always differ.
    pub fn differs(&self, other: &Self, min_delta: f32) -> bool {
        match (self, other) {
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a != b,
            (PropertyValue::Int(a), PropertyValue::Int(b)) => {
                (*a as f32 - *b as f32).abs() >= min_delta.max(f32::MIN_POSITIVE)
            }
            (PropertyValue::Unsigned(a), PropertyValue::Unsigned(b)) => {
                (*a as f32 - *b as f32).abs() >= min_delta.max(f32::MIN_POSITIVE)
            }
            (PropertyValue::Float(a), PropertyValue::Float(b)) => {
                (a - b).abs() >= min_delta.max(f32::MIN_POSITIVE)
            }
            (PropertyValue::Text(a), PropertyValue::Text(b)) => a != b,
            _ => true,
        }
    }
}

/// Who may change a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Permission {
    /// The cloud may only read; the device publishes.
    Read,
    /// The cloud may only write; the device applies.
    Write,
    /// Both directions.
    ReadWrite,
}

impl Permission {
    /// Whether the cloud may read this property, i.e. the device publishes it.
    pub fn cloud_readable(self) -> bool {
        matches!(self, Permission::Read | Permission::ReadWrite)
    }

    /// Whether the cloud may write this property.
    pub fn cloud_writable(self) -> bool {
        matches!(self, Permission::Write | Permission::ReadWrite)
    }
}

/// When a property's current value is transmitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PublishPolicy {
    /// Publish when the value moved at least `min_delta` away from the last
    /// acknowledged value *and* at least `min_interval` passed since the
    /// last publish.
    OnChange {
        min_delta: f32,
        min_interval: Duration,
    },
    /// Publish whenever `interval` passed since the last publish, regardless
    /// of value change.
    Every { interval: Duration },
}

/// Default minimum spacing between on-change publishes.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(500);

/// A named typed property with dirty tracking and a publish policy.
#[derive(Debug, Clone)]
pub struct Property {
    name: PropertyName,
    value: PropertyValue,
    cloud_value: PropertyValue,
    permission: Permission,
    policy: PublishPolicy,
    write_on_demand: bool,
    echo_requested: bool,
    update_requested: bool,
    change_recorded: bool,
    last_published: Option<Instant>,
    timestamp: u64,
    tag: Option<u32>,
}

impl Property {
    fn new(name: PropertyName, value: PropertyValue, permission: Permission) -> Self {
        let cloud_value = value.clone();
        Self {
            name,
            value,
            cloud_value,
            permission,
            policy: PublishPolicy::OnChange {
                min_delta: 0.0,
                min_interval: DEFAULT_MIN_INTERVAL,
            },
            write_on_demand: false,
            echo_requested: false,
            update_requested: false,
            change_recorded: false,
            last_published: None,
            timestamp: 0,
            tag: None,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    pub fn cloud_value(&self) -> &PropertyValue {
        &self.cloud_value
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn tag(&self) -> Option<u32> {
        self.tag
    }

    /// Posix timestamp of the last recorded update.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Publish when the value changed by at least `min_delta` and
    /// `min_interval` passed since the last publish.
    pub fn set_publish_on_change(&mut self, min_delta: f32, min_interval: Duration) -> &mut Self {
        self.policy = PublishPolicy::OnChange {
            min_delta,
            min_interval,
        };
        self
    }

    /// Publish periodically, regardless of value change.
    pub fn set_publish_every(&mut self, interval: Duration) -> &mut Self {
        self.policy = PublishPolicy::Every { interval };
        self
    }

    /// Suppresses policy-driven transmission; the property is only sent as
    /// an echo after a cloud-initiated write.
    pub fn mark_write_on_demand(&mut self) -> &mut Self {
        self.write_on_demand = true;
        self
    }

    /// Sets the ordering tag.
    pub fn set_tag(&mut self, tag: u32) -> &mut Self {
        self.tag = Some(tag);
        self
    }

    /// Overwrites the local value, rejecting kind mismatches. Dirtiness is
    /// derived by comparing against the cloud value.
    pub fn set(&mut self, value: PropertyValue) -> bool {
        if !self.value.same_kind(&value) {
            return false;
        }
        self.value = value;
        true
    }

    /// Manually sets the update timestamp.
    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp;
        self.change_recorded = true;
    }

    /// Whether local and last-acknowledged-cloud representations diverge
    /// beyond the policy threshold.
    pub fn is_different_from_cloud(&self) -> bool {
        let min_delta = match self.policy {
            PublishPolicy::OnChange { min_delta, .. } => min_delta,
            PublishPolicy::Every { .. } => 0.0,
        };
        self.value.differs(&self.cloud_value, min_delta)
    }

    /// Adopts the cloud value locally.
    pub fn commit_cloud_to_local(&mut self) {
        self.value = self.cloud_value.clone();
        self.change_recorded = false;
    }

    /// Marks the local value as acknowledged by the cloud.
    pub fn commit_local_to_cloud(&mut self) {
        self.cloud_value = self.value.clone();
    }

    /// Requests transmission on the next encode pass regardless of policy.
    pub fn force_publish(&mut self) {
        if self.permission.cloud_readable() {
            self.update_requested = true;
        }
    }

    /// Applies a cloud write.
    ///
    /// Rejects kind mismatches and writes to read-only properties. Write-on-
    /// demand properties keep their local value and raise the echo flag so
    /// the next encode pass acknowledges the write exactly once; everything
    /// else adopts the cloud value immediately.
    pub fn apply_cloud(&mut self, value: PropertyValue) -> bool {
        if !self.permission.cloud_writable() || !self.cloud_value.same_kind(&value) {
            return false;
        }
        self.cloud_value = value;
        if self.write_on_demand {
            self.echo_requested = true;
        } else {
            self.commit_cloud_to_local();
        }
        true
    }

    /// Stamps the first observation of a local change.
    pub fn record_local_change(&mut self, now_posix: u64) {
        if self.is_different_from_cloud() && !self.change_recorded {
            self.timestamp = now_posix;
            self.change_recorded = true;
        }
    }

    /// Whether the publish policy is currently satisfied.
    pub fn is_publishable(&self, now: Instant) -> bool {
        if !self.permission.cloud_readable() {
            return false;
        }
        if self.update_requested {
            return true;
        }
        if self.write_on_demand {
            return self.echo_requested;
        }
        match self.policy {
            PublishPolicy::OnChange { min_interval, .. } => {
                self.is_different_from_cloud() && self.elapsed_at_least(now, min_interval)
            }
            PublishPolicy::Every { interval } => self.elapsed_at_least(now, interval),
        }
    }

    fn elapsed_at_least(&self, now: Instant, interval: Duration) -> bool {
        match self.last_published {
            Some(published) => now >= published + interval,
            None => true,
        }
    }

    fn mark_published(&mut self, now: Instant) {
        self.commit_local_to_cloud();
        self.last_published = Some(now);
        self.echo_requested = false;
        self.update_requested = false;
        self.change_recorded = false;
    }
}

/// An ordered, name-addressed set of properties with a resume cursor.
///
/// Insertion order is transmission order. The cursor survives across encode
/// passes so a container larger than one transmit buffer goes out as a
/// sequence of packets.
pub struct PropertyContainer<const N: usize> {
    properties: Vec<Property, N>,
    cursor: usize,
}

impl<const N: usize> Default for PropertyContainer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PropertyContainer<N> {
    pub fn new() -> Self {
        Self {
            properties: Vec::new(),
            cursor: 0,
        }
    }

    /// Adds a property, returning a handle for policy configuration.
    ///
    /// Returns `None` when the container is full, the name exceeds capacity,
    /// or the name is already taken.
    pub fn add(
        &mut self,
        name: &str,
        value: PropertyValue,
        permission: Permission,
    ) -> Option<&mut Property> {
        if self.get(name).is_some() {
            return None;
        }
        let name = PropertyName::try_from(name).ok()?;
        self.properties
            .push(Property::new(name, value, permission))
            .ok()?;
        self.properties.last_mut()
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.iter_mut().find(|p| p.name() == name)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    /// Index the next encode pass resumes from.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Stamps the update timestamp of every locally-changed property.
    pub fn refresh_timestamps(&mut self, now_posix: u64) {
        for property in self.properties.iter_mut() {
            property.record_local_change(now_posix);
        }
    }

    /// Requests transmission of every cloud-readable property.
    pub fn force_publish_all(&mut self) {
        for property in self.properties.iter_mut() {
            property.force_publish();
        }
    }

    /// Applies a cloud write to the named property.
    ///
    /// Unknown names are ignored (the schema is device-defined; the cloud
    /// may know properties this firmware revision does not).
    pub fn apply_update(&mut self, name: &str, value: PropertyValue) -> bool {
        match self.get_mut(name) {
            Some(property) => property.apply_cloud(value),
            None => false,
        }
    }

    /// Encodes every property whose policy is currently satisfied, in
    /// container order, resuming from the stored cursor.
    ///
    /// Returns the bytes written. When the buffer fills mid-container the
    /// cursor is parked on the first record that did not fit and the pass
    /// ends; a later call continues from there. A record that cannot fit
    /// even in an empty buffer is a real error.
    pub fn encode_into<C: Codec>(
        &mut self,
        codec: &mut C,
        buf: &mut [u8],
        now: Instant,
    ) -> Result<usize, CodecError> {
        let count = self.properties.len();
        let mut index = if self.cursor < count { self.cursor } else { 0 };
        let mut written = 0;

        while index < count {
            let property = &mut self.properties[index];
            if property.is_publishable(now) {
                match codec.encode_property(property, &mut buf[written..]) {
                    Ok(n) => {
                        written += n;
                        property.mark_published(now);
                    }
                    Err(CodecError::BufferTooSmall) => {
                        if written == 0 {
                            return Err(CodecError::BufferTooSmall);
                        }
                        self.cursor = index;
                        return Ok(written);
                    }
                    Err(err) => return Err(err),
                }
            }
            index += 1;
        }

        self.cursor = 0;
        Ok(written)
    }
}
