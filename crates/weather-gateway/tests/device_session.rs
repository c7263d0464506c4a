//! Integration tests for the device session.
//!
//! # Purpose
//!
//! These tests drive `run_device_session` over in-memory transports exactly
//! as the accept loop does over TCP.  They verify:
//!
//! - The handshake: greeting, ACK, and each NAK reason.
//! - Claim lifetime: a station is registered while its device is connected
//!   and released however the session ends.
//! - Keepalive: pings are sent on schedule and a missing pong ends the
//!   session.
//! - Routing: a reading is delivered to the browser session it names.
//!
//! Scripted exchanges use `tokio_test::io::Builder`, which fails the test if
//! the session writes anything other than the expected bytes.  Timing tests
//! use `tokio::io::duplex` so the test can act as the device at its own
//! pace.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use uuid::Uuid;
use weather_core::protocol::{encode_inbound, HandshakePacket, InPacket, WeatherStatusPacket};
use weather_core::{StationId, TransportFlag};
use weather_gateway::application::{BrowserEvent, BrowserLink, DeviceLink};
use weather_gateway::domain::{AllowList, SessionConfig};
use weather_gateway::infrastructure::{run_device_session, SessionContext, SessionError};

const DEVICE_A: Uuid = Uuid::from_u128(0x6f1c3a52_9d44_4b8e_9102_337ac4105ed9);
const DEVICE_B: Uuid = Uuid::from_u128(0x0b7e5d21_3c8f_4a06_8e5b_91d2c7f4a310);
const UNKNOWN_DEVICE: Uuid = Uuid::from_u128(0x5a4f0c6e_7d12_4e9b_a3c1_2f8e6b9d0a47);

const GREETING: [u8; 1] = [0x00];
const ACK: [u8; 1] = [0x01];
const PING: [u8; 1] = [0x03];
const PONG: [u8; 1] = [0x01];

// ── Helpers ───────────────────────────────────────────────────────────────────

fn context(settings: SessionConfig) -> SessionContext {
    let directory = AllowList::new([DEVICE_A, DEVICE_B], [(StationId::Wf, "Goe".to_string())]);
    SessionContext::new(Arc::new(directory), settings)
}

fn handshake(uuid: Uuid, station_id: u8) -> Vec<u8> {
    encode_inbound(&InPacket::Handshake(HandshakePacket { uuid, station_id }))
}

fn weather_status(session: Uuid) -> Vec<u8> {
    encode_inbound(&InPacket::WeatherStatus(WeatherStatusPacket {
        session,
        temperature: 18.25,
        humidity: 61.5,
        time: 1_700_000_000,
        flag: TransportFlag::Plain,
    }))
}

fn nak(reason: u8) -> [u8; 2] {
    [0x02, reason]
}

fn spawn_session(ctx: &SessionContext) -> (DuplexStream, JoinHandle<Result<(), SessionError>>) {
    let (device, gateway) = tokio::io::duplex(1024);
    let task = tokio::spawn(run_device_session(gateway, ctx.clone()));
    (device, task)
}

async fn read_bytes(device: &mut DuplexStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    tokio::time::timeout(Duration::from_secs(5), device.read_exact(&mut buf))
        .await
        .expect("gateway went silent")
        .expect("read failed");
    buf
}

async fn finished(task: JoinHandle<Result<(), SessionError>>) -> Result<(), SessionError> {
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("session did not end")
        .expect("session task panicked")
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// A registered device is greeted, answered with an ACK, and may then
/// disconnect cleanly.
#[tokio::test]
async fn test_registered_device_is_acknowledged() {
    // Arrange
    let ctx = context(SessionConfig::default());
    let stream = tokio_test::io::Builder::new()
        .write(&GREETING)
        .read(&handshake(DEVICE_A, 1))
        .write(&ACK)
        .build();

    // Act
    let result = run_device_session(stream, ctx.clone()).await;

    // Assert
    assert!(result.is_ok(), "clean disconnect expected, got {result:?}");
    assert!(ctx.registry.find_device(StationId::Wf).is_none(), "claim released on exit");
}

/// While a device is connected its station is listed as online.
#[tokio::test]
async fn test_authenticated_station_is_registered_until_disconnect() {
    // Arrange
    let ctx = context(SessionConfig::default());
    let (mut device, task) = spawn_session(&ctx);
    assert_eq!(read_bytes(&mut device, 1).await, GREETING);

    // Act
    device.write_all(&handshake(DEVICE_A, 1)).await.unwrap();
    assert_eq!(read_bytes(&mut device, 1).await, ACK);

    // Assert
    assert_eq!(ctx.registry.list_device_ids(), vec![StationId::Wf]);

    drop(device);
    assert!(finished(task).await.is_ok());
    assert!(ctx.registry.list_device_ids().is_empty());
}

/// A second device claiming an occupied station is refused but kept
/// connected.
#[tokio::test]
async fn test_second_device_for_claimed_station_is_refused() {
    // Arrange: another session already holds station 1
    let ctx = context(SessionConfig::default());
    let (holder, _commands) = DeviceLink::channel(4);
    assert!(ctx.registry.join_device(StationId::Wf, &holder));

    let stream = tokio_test::io::Builder::new()
        .write(&GREETING)
        .read(&handshake(DEVICE_B, 1))
        .write(&nak(0x01))
        .build();

    // Act
    let result = run_device_session(stream, ctx.clone()).await;

    // Assert: the existing claim is untouched
    assert!(result.is_ok());
    let current = ctx.registry.find_device(StationId::Wf).expect("still claimed");
    assert!(Arc::ptr_eq(&current, &holder));
}

/// A device missing from the allow-list is refused.
#[tokio::test]
async fn test_unregistered_device_is_refused() {
    let ctx = context(SessionConfig::default());
    let stream = tokio_test::io::Builder::new()
        .write(&GREETING)
        .read(&handshake(UNKNOWN_DEVICE, 1))
        .write(&nak(0x04))
        .build();

    assert!(run_device_session(stream, ctx.clone()).await.is_ok());
    assert!(ctx.registry.list_device_ids().is_empty());
}

/// A UUID that is not a valid RFC 4122 identifier is refused.
#[tokio::test]
async fn test_malformed_uuid_is_refused() {
    let ctx = context(SessionConfig::default());
    let stream = tokio_test::io::Builder::new()
        .write(&GREETING)
        .read(&handshake(Uuid::nil(), 1))
        .write(&nak(0x08))
        .build();

    assert!(run_device_session(stream, ctx).await.is_ok());
}

/// The exclusive upper bound itself is never a valid station and never
/// claims a slot.
#[tokio::test]
async fn test_station_id_at_upper_bound_is_refused() {
    // Arrange
    let ctx = context(SessionConfig::default());
    let stream = tokio_test::io::Builder::new()
        .write(&GREETING)
        .read(&handshake(DEVICE_A, StationId::MAX))
        .write(&nak(0x02))
        .build();

    // Act
    let result = run_device_session(stream, ctx.clone()).await;

    // Assert
    assert!(result.is_ok());
    assert!(ctx.registry.list_device_ids().is_empty());
}

/// A refused handshake leaves the connection open for a corrected retry.
#[tokio::test]
async fn test_refused_device_may_retry() {
    let ctx = context(SessionConfig::default());
    let stream = tokio_test::io::Builder::new()
        .write(&GREETING)
        .read(&handshake(DEVICE_A, 0xFF))
        .write(&nak(0x02))
        .read(&handshake(DEVICE_A, 1))
        .write(&ACK)
        .build();

    assert!(run_device_session(stream, ctx).await.is_ok());
}

/// A handshake split across several reads is reassembled.
#[tokio::test]
async fn test_fragmented_handshake_is_reassembled() {
    // Arrange
    let ctx = context(SessionConfig::default());
    let packet = handshake(DEVICE_A, 1);
    let stream = tokio_test::io::Builder::new()
        .write(&GREETING)
        .read(&packet[..1])
        .read(&packet[1..9])
        .read(&packet[9..])
        .write(&ACK)
        .build();

    // Act / Assert
    assert!(run_device_session(stream, ctx).await.is_ok());
}

/// Two handshakes in a single read are answered in order.
#[tokio::test]
async fn test_back_to_back_packets_in_one_read_are_all_handled() {
    // Arrange: a bad station id followed by a good one, delivered together
    let ctx = context(SessionConfig::default());
    let mut burst = handshake(DEVICE_A, 7);
    burst.extend(handshake(DEVICE_A, 2));
    let stream = tokio_test::io::Builder::new()
        .write(&GREETING)
        .read(&burst)
        .write(&nak(0x02))
        .write(&ACK)
        .build();

    // Act / Assert
    assert!(run_device_session(stream, ctx).await.is_ok());
}

// ── Protocol violations ───────────────────────────────────────────────────────

/// An unknown packet tag drops the connection.
#[tokio::test]
async fn test_unknown_tag_drops_connection() {
    let ctx = context(SessionConfig::default());
    let stream = tokio_test::io::Builder::new()
        .write(&GREETING)
        .read(&[0x09])
        .build();

    let result = run_device_session(stream, ctx).await;

    assert!(matches!(result, Err(SessionError::BadPacket(0x09))));
}

/// Readings are only accepted from authenticated devices.
#[tokio::test]
async fn test_reading_before_handshake_drops_connection() {
    let ctx = context(SessionConfig::default());
    let stream = tokio_test::io::Builder::new()
        .write(&GREETING)
        .read(&weather_status(Uuid::new_v4()))
        .build();

    let result = run_device_session(stream, ctx).await;

    assert!(matches!(result, Err(SessionError::BadPacket(0x02))));
}

// ── Routing ───────────────────────────────────────────────────────────────────

/// A reading reaches the browser session whose UUID it carries.
#[tokio::test]
async fn test_reading_is_delivered_to_requesting_browser() {
    // Arrange: a browser session is registered and waiting
    let ctx = context(SessionConfig::default());
    let browser = Uuid::new_v4();
    let (link, mut events) = BrowserLink::channel(browser, 4);
    assert!(ctx.registry.join_browser(browser, &link, link.notifier()));

    let stream = tokio_test::io::Builder::new()
        .write(&GREETING)
        .read(&handshake(DEVICE_A, 1))
        .write(&ACK)
        .read(&weather_status(browser))
        .build();

    // Act
    assert!(run_device_session(stream, ctx).await.is_ok());

    // Assert
    let BrowserEvent::WeatherStatus(reading) = events.try_recv().expect("reading delivered");
    assert_eq!(reading.station_id, StationId::Wf);
    assert_eq!(reading.temperature, 18.25);
    assert_eq!(reading.humidity, 61.5);
    assert_eq!(reading.time, 1_700_000_000);
}

/// A reading for a browser that has already left is silently dropped.
#[tokio::test]
async fn test_reading_for_departed_browser_is_ignored() {
    let ctx = context(SessionConfig::default());
    let stream = tokio_test::io::Builder::new()
        .write(&GREETING)
        .read(&handshake(DEVICE_A, 1))
        .write(&ACK)
        .read(&weather_status(Uuid::new_v4()))
        .build();

    assert!(run_device_session(stream, ctx).await.is_ok());
}

/// A reading request queued by another session is written to the device.
#[tokio::test]
async fn test_queued_request_is_written_to_device() {
    // Arrange
    let ctx = context(SessionConfig::default());
    let (mut device, task) = spawn_session(&ctx);
    read_bytes(&mut device, 1).await;
    device.write_all(&handshake(DEVICE_A, 1)).await.unwrap();
    assert_eq!(read_bytes(&mut device, 1).await, ACK);

    // Act
    let browser = Uuid::new_v4();
    let link = ctx.registry.find_device(StationId::Wf).expect("registered");
    assert!(link.request_weather_status(browser, TransportFlag::Secure));

    // Assert: tag, browser UUID, transport flag
    let request = read_bytes(&mut device, 18).await;
    assert_eq!(request[0], 0x04);
    assert_eq!(&request[1..17], browser.as_bytes());
    assert_eq!(request[17], 0x02);

    drop(device);
    assert!(finished(task).await.is_ok());
}

// ── Timeouts and keepalive ────────────────────────────────────────────────────

/// A device that never authenticates is dropped after the handshake timeout.
#[tokio::test]
async fn test_silent_device_hits_handshake_timeout() {
    // Arrange
    let ctx = context(SessionConfig {
        handshake_timeout_ms: 50,
        ..SessionConfig::default()
    });
    let (mut device, task) = spawn_session(&ctx);
    read_bytes(&mut device, 1).await;

    // Act
    let result = finished(task).await;

    // Assert
    assert!(matches!(result, Err(SessionError::HandshakeTimeout(_))));
}

/// A device that answers every ping stays connected.
#[tokio::test]
async fn test_device_answering_pings_stays_connected() {
    // Arrange
    let ctx = context(SessionConfig {
        ping_interval_ms: 20,
        pong_timeout_ms: 500,
        ..SessionConfig::default()
    });
    let (mut device, task) = spawn_session(&ctx);
    read_bytes(&mut device, 1).await;
    device.write_all(&handshake(DEVICE_A, 1)).await.unwrap();
    assert_eq!(read_bytes(&mut device, 1).await, ACK);

    // Act: answer three rounds of keepalive
    for _ in 0..3 {
        assert_eq!(read_bytes(&mut device, 1).await, PING);
        device.write_all(&PONG).await.unwrap();
    }

    // Assert
    assert!(!task.is_finished());
    assert_eq!(ctx.registry.list_device_ids(), vec![StationId::Wf]);

    drop(device);
    assert!(finished(task).await.is_ok());
}

/// Without a pong the session ends and the station becomes available again.
#[tokio::test]
async fn test_missing_pong_disconnects_and_frees_station() {
    // Arrange
    let ctx = context(SessionConfig {
        ping_interval_ms: 20,
        pong_timeout_ms: 50,
        ..SessionConfig::default()
    });
    let (mut device, task) = spawn_session(&ctx);
    read_bytes(&mut device, 1).await;
    device.write_all(&handshake(DEVICE_A, 1)).await.unwrap();
    assert_eq!(read_bytes(&mut device, 1).await, ACK);
    assert_eq!(ctx.registry.list_device_ids(), vec![StationId::Wf]);

    // Act: receive the ping but never answer it
    assert_eq!(read_bytes(&mut device, 1).await, PING);
    let result = finished(task).await;

    // Assert
    assert!(matches!(result, Err(SessionError::PongTimeout(_))));
    assert!(ctx.registry.find_device(StationId::Wf).is_none());

    let (replacement, _commands) = DeviceLink::channel(4);
    assert!(ctx.registry.join_device(StationId::Wf, &replacement));
}
