//! Device-attach state machine tests, driven process-level through the
//! message bus with explicit clock values.

mod common;

use common::MockTime;
use embassy_time::{Duration, Instant};
use nimbus_session::process::CloudProcess;
use nimbus_session::{Command, DeviceProcess, MessageBus, ThingId};

fn at(millis: u64) -> Instant {
    Instant::from_millis(millis)
}

fn drain(bus: &mut MessageBus) -> Vec<Command> {
    let mut commands = Vec::new();
    while let Some(command) = bus.pop_upstream() {
        commands.push(command);
    }
    commands
}

fn thing_id(id: &str) -> ThingId {
    ThingId::try_from(id).unwrap()
}

#[test]
fn cooperative_cloud_reaches_attached() {
    let mut device: DeviceProcess<4> = DeviceProcess::new("0.2.0");
    let mut bus = MessageBus::new();
    let mut time = MockTime::synced();

    // Capability announce.
    device.update(&mut bus, &mut time, at(0));
    let commands = drain(&mut bus);
    assert!(matches!(commands.as_slice(), [Command::DeviceBegin { .. }]));

    // Thing-id request.
    device.update(&mut bus, &mut time, at(10));
    assert_eq!(drain(&mut bus), vec![Command::ThingIdRequest]);

    // The cloud answers with a non-empty id; validation must run before any
    // attach attempt.
    device.handle_message(&Command::ThingIdAssignment {
        thing_id: thing_id("thing-1"),
    });
    device.update(&mut bus, &mut time, at(20));
    assert!(drain(&mut bus).is_empty(), "validation tick emits nothing");
    assert!(!device.is_attached());

    // Attach handshake request goes upstream.
    device.update(&mut bus, &mut time, at(30));
    assert_eq!(
        drain(&mut bus),
        vec![Command::AttachThing {
            thing_id: thing_id("thing-1")
        }]
    );

    // The orchestrator acknowledges; the next tick completes the attach.
    device.handle_message(&Command::DeviceAttached);
    device.update(&mut bus, &mut time, at(40));
    assert!(device.is_attached());
    assert!(device.connected());
    assert_eq!(device.thing_id(), Some(&thing_id("thing-1")));
}

#[test]
fn request_retries_on_subscribe_cadence() {
    let mut device: DeviceProcess<4> = DeviceProcess::new("0.2.0");
    let mut bus = MessageBus::new();
    let mut time = MockTime::synced();

    device.update(&mut bus, &mut time, at(0));
    device.update(&mut bus, &mut time, at(0));
    drain(&mut bus);

    // First retry is due after 4s (2s base doubled once), not before.
    device.update(&mut bus, &mut time, at(3_999));
    assert!(drain(&mut bus).is_empty());
    device.update(&mut bus, &mut time, at(4_001));
    assert_eq!(drain(&mut bus), vec![Command::ThingIdRequest]);
}

#[test]
fn empty_thing_id_switches_to_attach_cadence() {
    let mut device: DeviceProcess<4> = DeviceProcess::new("0.2.0");
    let mut bus = MessageBus::new();
    let mut time = MockTime::synced();

    device.update(&mut bus, &mut time, at(0));
    device.update(&mut bus, &mut time, at(0));
    drain(&mut bus);

    // Registered, but no thing bound: the empty assignment keeps the retry
    // count and reconfigures to the attach cadence (80s at count 1).
    device.handle_message(&Command::ThingIdAssignment {
        thing_id: ThingId::new(),
    });
    device.update(&mut bus, &mut time, at(100));
    assert!(drain(&mut bus).is_empty());
    assert!(device.thing_id().is_none());

    // The subscribe cadence would have fired at 4s; nothing happens there.
    device.update(&mut bus, &mut time, at(4_100 + 30_000));
    assert!(drain(&mut bus).is_empty());

    // The attach cadence fires after 80s.
    device.update(&mut bus, &mut time, at(100 + 80_001));
    assert_eq!(drain(&mut bus), vec![Command::ThingIdRequest]);
}

#[test]
fn exhausted_requests_force_teardown() {
    let mut device: DeviceProcess<4> = DeviceProcess::new("0.2.0");
    let mut bus = MessageBus::new();
    let mut time = MockTime::synced();

    let step = Duration::from_secs(3_600).as_millis();
    let mut now = 0u64;
    let mut requests = 0usize;

    // Never answer; every expiry produces one more request until the
    // maximum is exceeded.
    for _ in 0..16 {
        device.update(&mut bus, &mut time, at(now));
        for command in drain(&mut bus) {
            match command {
                Command::ThingIdRequest => requests += 1,
                Command::DeviceBegin { .. } => {}
                Command::Disconnected => {
                    assert_eq!(requests, 11);
                    return;
                }
                other => panic!("unexpected upstream message {:?}", other.id()),
            }
        }
        assert!(device.connected() || requests == 11);
        now += step;
    }
    panic!("device never gave up");
}

#[test]
fn reset_restarts_the_handshake() {
    let mut device: DeviceProcess<4> = DeviceProcess::new("0.2.0");
    let mut bus = MessageBus::new();
    let mut time = MockTime::synced();

    device.update(&mut bus, &mut time, at(0));
    device.update(&mut bus, &mut time, at(0));
    device.handle_message(&Command::ThingIdAssignment {
        thing_id: thing_id("thing-1"),
    });
    device.update(&mut bus, &mut time, at(10));
    device.update(&mut bus, &mut time, at(20));
    device.handle_message(&Command::DeviceAttached);
    device.update(&mut bus, &mut time, at(30));
    assert!(device.is_attached());
    drain(&mut bus);

    device.handle_message(&Command::Reset);
    assert!(!device.is_attached());
    assert!(device.thing_id().is_none());

    // The cycle starts over with a fresh capability announce.
    device.update(&mut bus, &mut time, at(40));
    let commands = drain(&mut bus);
    assert!(matches!(commands.as_slice(), [Command::DeviceBegin { .. }]));
}
