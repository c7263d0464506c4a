//! Integration tests for the browser session.
//!
//! # Purpose
//!
//! Each test upgrades an in-memory `tokio::io::duplex` pipe with the same
//! `accept_browser` call the accept loop uses, and plays the browser with
//! `tokio_tungstenite::client_async`.  They verify:
//!
//! - Request framing: a 2-byte little-endian length and JSON, split or
//!   batched across WebSocket messages of either kind.
//! - The exact JSON of both responses.
//! - Forwarding: one device request per online station, and readings
//!   routed back asynchronously.
//! - Failure handling: malformed and oversize requests end the session with
//!   a close frame.
//! - Liveness: a stalled partial request or an unanswered ping ends the
//!   session and releases its registry entry.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{client_async, WebSocketStream};
use uuid::Uuid;
use weather_core::protocol::{encode_inbound, HandshakePacket, InPacket, WeatherStatusPacket};
use weather_core::{encode_frame, StationId, TransportFlag};
use weather_gateway::application::{DeviceCommand, DeviceLink};
use weather_gateway::domain::{AllowList, SessionConfig};
use weather_gateway::infrastructure::{
    accept_browser, run_browser_session, run_device_session, SessionContext, SessionError,
    SERVER_HEADER,
};

const DEVICE: Uuid = Uuid::from_u128(0x6f1c3a52_9d44_4b8e_9102_337ac4105ed9);

type Browser = WebSocketStream<DuplexStream>;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn context(settings: SessionConfig) -> SessionContext {
    let directory = AllowList::new([DEVICE], [(StationId::Wf, "Goe".to_string())]);
    SessionContext::new(Arc::new(directory), settings)
}

/// Starts a browser session and returns the client end plus the session task.
async fn connect(ctx: &SessionContext) -> (Browser, JoinHandle<Result<(), SessionError>>) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server_ctx = ctx.clone();
    let task = tokio::spawn(async move {
        let ws = accept_browser(server_io, &server_ctx.settings).await?;
        run_browser_session(ws, server_ctx, TransportFlag::Plain).await
    });
    let (client, _response) = client_async("ws://gateway.test/", client_io)
        .await
        .expect("upgrade failed");
    (client, task)
}

fn frame(json: &str) -> Vec<u8> {
    encode_frame(json.as_bytes()).expect("request fits in a frame")
}

async fn send(browser: &mut Browser, bytes: Vec<u8>) {
    browser.send(Message::Binary(bytes)).await.expect("send failed");
}

async fn next_message(browser: &mut Browser) -> Message {
    tokio::time::timeout(Duration::from_secs(5), browser.next())
        .await
        .expect("gateway went silent")
        .expect("stream ended")
        .expect("websocket error")
}

async fn next_json(browser: &mut Browser) -> String {
    match next_message(browser).await {
        Message::Text(text) => text,
        other => panic!("expected a text message, got {other:?}"),
    }
}

/// Runs a device session that authenticates as `station` and returns the
/// device end of the pipe.
async fn authenticated_device(ctx: &SessionContext, station: u8) -> DuplexStream {
    let (mut device, gateway_side) = tokio::io::duplex(1024);
    tokio::spawn(run_device_session(gateway_side, ctx.clone()));
    let mut greeting = [0u8; 1];
    device.read_exact(&mut greeting).await.unwrap();
    let handshake = encode_inbound(&InPacket::Handshake(HandshakePacket {
        uuid: DEVICE,
        station_id: station,
    }));
    device.write_all(&handshake).await.unwrap();
    let mut ack = [0u8; 1];
    device.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack, [0x01], "station {station} was not accepted");
    device
}

/// Reads the 18-byte request the gateway forwards to a device and returns
/// the browser session id it carries.
async fn forwarded_request(device: &mut DuplexStream) -> Uuid {
    let mut request = [0u8; 18];
    tokio::time::timeout(Duration::from_secs(5), device.read_exact(&mut request))
        .await
        .expect("no request reached the device")
        .unwrap();
    assert_eq!(request[0], 0x04);
    assert_eq!(request[17], TransportFlag::Plain as u8);
    Uuid::from_slice(&request[1..17]).unwrap()
}

async fn reply(device: &mut DuplexStream, session: Uuid, temperature: f32, time: u32) {
    let reading = encode_inbound(&InPacket::WeatherStatus(WeatherStatusPacket {
        session,
        temperature,
        humidity: 40.25,
        time,
        flag: TransportFlag::Plain,
    }));
    device.write_all(&reading).await.unwrap();
}

async fn finished(task: JoinHandle<Result<(), SessionError>>) -> Result<(), SessionError> {
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("session did not end")
        .expect("session task panicked")
}

// ── Upgrade ───────────────────────────────────────────────────────────────────

/// The upgrade response identifies the gateway.
#[tokio::test]
async fn test_upgrade_response_carries_server_header() {
    // Arrange
    let ctx = context(SessionConfig::default());
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let settings = Arc::clone(&ctx.settings);
    let server = tokio::spawn(async move { accept_browser(server_io, &settings).await.map(|_| ()) });

    // Act
    let (_client, response) = client_async("ws://gateway.test/", client_io).await.unwrap();

    // Assert
    let header = response.headers().get("server").expect("server header");
    assert_eq!(header.to_str().unwrap(), SERVER_HEADER);
    assert!(SERVER_HEADER.starts_with("weather-gateway/"));
    assert!(server.await.unwrap().is_ok());
}

// ── AvailableStations ─────────────────────────────────────────────────────────

/// The station list is built from online devices and the configured names.
#[tokio::test]
async fn test_available_stations_lists_online_devices() {
    // Arrange: station 1 is online
    let ctx = context(SessionConfig::default());
    let (device, _commands) = DeviceLink::channel(4);
    ctx.registry.join_device(StationId::Wf, &device);
    let (mut browser, _task) = connect(&ctx).await;

    // Act
    send(&mut browser, frame(r#"{"id":1}"#)).await;

    // Assert
    assert_eq!(
        next_json(&mut browser).await,
        r#"{"id":1,"stations":[{"stationId":1,"stationName":"Goe"}]}"#
    );
}

/// With nothing online the list is empty.
#[tokio::test]
async fn test_available_stations_with_no_devices_is_empty() {
    let ctx = context(SessionConfig::default());
    let (mut browser, _task) = connect(&ctx).await;

    send(&mut browser, frame(r#"{"id":1}"#)).await;

    assert_eq!(next_json(&mut browser).await, r#"{"id":1,"stations":[]}"#);
}

/// A request may arrive split over several messages, and one message may
/// carry several requests; text messages are framed like binary ones.
#[tokio::test]
async fn test_requests_are_reassembled_across_messages() {
    // Arrange
    let ctx = context(SessionConfig::default());
    let (mut browser, _task) = connect(&ctx).await;
    let first = frame(r#"{"id":1}"#);
    let mut batch = frame(r#"{"id":1}"#);
    batch.extend(frame(r#"{"id":1}"#));

    // Act: one request in three pieces, then two requests in one text message
    send(&mut browser, first[..1].to_vec()).await;
    send(&mut browser, first[1..5].to_vec()).await;
    send(&mut browser, first[5..].to_vec()).await;
    let text = String::from_utf8(batch).expect("prefix bytes are ASCII");
    browser.send(Message::Text(text)).await.unwrap();

    // Assert: three replies
    for _ in 0..3 {
        assert_eq!(next_json(&mut browser).await, r#"{"id":1,"stations":[]}"#);
    }
}

// ── WeatherStatus ─────────────────────────────────────────────────────────────

/// Only online stations receive a request; the others are skipped.
#[tokio::test]
async fn test_weather_request_reaches_only_online_stations() {
    // Arrange: stations 0 and 2 online, station 1 offline
    let ctx = context(SessionConfig::default());
    let (goe, mut goe_commands) = DeviceLink::channel(4);
    let (bs, mut bs_commands) = DeviceLink::channel(4);
    ctx.registry.join_device(StationId::Goe, &goe);
    ctx.registry.join_device(StationId::Bs, &bs);
    let (mut browser, _task) = connect(&ctx).await;

    // Act: 0, 1, 2 and an id outside the valid range
    send(&mut browser, frame(r#"{"id":0,"stationIds":[0,1,2,9]}"#)).await;
    // Requests are handled in order, so once this is answered the first one
    // has been dispatched.
    send(&mut browser, frame(r#"{"id":1}"#)).await;
    next_json(&mut browser).await;

    // Assert: exactly one request per online station
    let DeviceCommand::RequestWeatherStatus { flag, .. } = goe_commands.try_recv().unwrap();
    assert_eq!(flag, TransportFlag::Plain);
    assert!(goe_commands.try_recv().is_err());
    assert!(bs_commands.try_recv().is_ok());
    assert!(bs_commands.try_recv().is_err());
}

/// End to end: the request reaches the device and its reading comes back to
/// the browser that asked.
#[tokio::test]
async fn test_weather_status_round_trip_through_device() {
    // Arrange: device authenticates as station 1
    let ctx = context(SessionConfig::default());
    let mut device = authenticated_device(&ctx, 1).await;
    let (mut browser, _task) = connect(&ctx).await;

    // Act: browser asks for station 1
    send(&mut browser, frame(r#"{"id":0,"stationIds":[1]}"#)).await;
    let session = forwarded_request(&mut device).await;
    reply(&mut device, session, 21.5, 1_600_000_000).await;

    // Assert
    assert_eq!(
        next_json(&mut browser).await,
        r#"{"id":0,"stationId":1,"temperature":21.5,"humidity":40.25,"time":1600000000}"#
    );
}

/// Readings from several stations are streamed one message each, as soon as
/// each device answers; a slow station does not hold back a fast one.
#[tokio::test]
async fn test_readings_stream_independently_per_station() {
    // Arrange: stations 0 and 1 online
    let ctx = context(SessionConfig::default());
    let mut goe = authenticated_device(&ctx, 0).await;
    let mut wf = authenticated_device(&ctx, 1).await;
    let (mut browser, _task) = connect(&ctx).await;

    send(&mut browser, frame(r#"{"id":0,"stationIds":[0,1]}"#)).await;
    let goe_session = forwarded_request(&mut goe).await;
    let wf_session = forwarded_request(&mut wf).await;
    assert_eq!(goe_session, wf_session);

    // Act 1: only station 1 answers
    reply(&mut wf, wf_session, 12.0, 100).await;

    // Assert 1: its reading arrives while station 0 is still silent
    assert_eq!(
        next_json(&mut browser).await,
        r#"{"id":0,"stationId":1,"temperature":12.0,"humidity":40.25,"time":100}"#
    );

    // Act 2: station 0 answers later
    reply(&mut goe, goe_session, -4.5, 200).await;

    // Assert 2: a second, separate message
    assert_eq!(
        next_json(&mut browser).await,
        r#"{"id":0,"stationId":0,"temperature":-4.5,"humidity":40.25,"time":200}"#
    );
}

/// Ids that do not fit a station id byte are skipped like unknown stations;
/// the valid ids in the same request are still served.
#[tokio::test]
async fn test_ids_outside_byte_range_are_skipped() {
    // Arrange: station 1 online
    let ctx = context(SessionConfig::default());
    let (wf, mut wf_commands) = DeviceLink::channel(4);
    ctx.registry.join_device(StationId::Wf, &wf);
    let (mut browser, task) = connect(&ctx).await;

    // Act
    send(&mut browser, frame(r#"{"id":0,"stationIds":[1,300,-1,"1"]}"#)).await;
    send(&mut browser, frame(r#"{"id":1}"#)).await;

    // Assert: the session keeps serving and station 1 got one request
    assert_eq!(
        next_json(&mut browser).await,
        r#"{"id":1,"stations":[{"stationId":1,"stationName":"Goe"}]}"#
    );
    assert!(wf_commands.try_recv().is_ok());
    assert!(wf_commands.try_recv().is_err());
    assert!(!task.is_finished());
}

// ── Failures and lifetime ─────────────────────────────────────────────────────

/// Malformed JSON closes the session with a policy-violation close frame,
/// after replies to earlier requests have been sent.
#[tokio::test]
async fn test_malformed_request_closes_session() {
    // Arrange
    let ctx = context(SessionConfig::default());
    let (mut browser, task) = connect(&ctx).await;
    let mut bytes = frame(r#"{"id":1}"#);
    bytes.extend(frame("{not json"));

    // Act
    send(&mut browser, bytes).await;

    // Assert
    assert_eq!(next_json(&mut browser).await, r#"{"id":1,"stations":[]}"#);
    match next_message(&mut browser).await {
        Message::Close(Some(close)) => assert_eq!(close.code, CloseCode::Policy),
        other => panic!("expected a close frame, got {other:?}"),
    }
    assert!(matches!(finished(task).await, Err(SessionError::BadRequest)));
}

/// An unknown request id is treated like malformed JSON.
#[tokio::test]
async fn test_unknown_request_id_closes_session() {
    let ctx = context(SessionConfig::default());
    let (mut browser, task) = connect(&ctx).await;

    send(&mut browser, frame(r#"{"id":7}"#)).await;

    assert!(matches!(next_message(&mut browser).await, Message::Close(Some(_))));
    assert!(matches!(finished(task).await, Err(SessionError::BadRequest)));
}

/// A length prefix above the limit closes the session before the payload
/// is even received.
#[tokio::test]
async fn test_oversize_request_closes_session() {
    // Arrange
    let ctx = context(SessionConfig {
        max_payload_bytes: 16,
        ..SessionConfig::default()
    });
    let (mut browser, task) = connect(&ctx).await;

    // Act: only the prefix, declaring 100 bytes
    send(&mut browser, vec![100, 0]).await;

    // Assert
    match next_message(&mut browser).await {
        Message::Close(Some(close)) => assert_eq!(close.code, CloseCode::Size),
        other => panic!("expected a close frame, got {other:?}"),
    }
    assert!(matches!(finished(task).await, Err(SessionError::PayloadTooBig(16))));
}

/// The session is registered while connected and removed once the browser
/// closes.
#[tokio::test]
async fn test_browser_is_unregistered_after_close() {
    // Arrange: one round trip guarantees the session has registered
    let ctx = context(SessionConfig::default());
    let (mut browser, task) = connect(&ctx).await;
    send(&mut browser, frame(r#"{"id":1}"#)).await;
    next_json(&mut browser).await;
    assert_eq!(ctx.registry.browser_count(), 1);

    // Act
    browser.close(None).await.unwrap();
    let result = finished(task).await;

    // Assert
    assert!(result.is_ok(), "browser-initiated close is clean, got {result:?}");
    assert_eq!(ctx.registry.browser_count(), 0);
}

/// A request left half sent is abandoned after the read timeout, and the
/// session leaves the registry.
#[tokio::test]
async fn test_stalled_partial_request_times_out() {
    // Arrange
    let ctx = context(SessionConfig {
        read_timeout_ms: 50,
        ..SessionConfig::default()
    });
    let (mut browser, task) = connect(&ctx).await;

    // Act: the first byte of a length prefix, then silence
    send(&mut browser, vec![8]).await;

    // Assert
    assert!(matches!(finished(task).await, Err(SessionError::ReadTimeout(_))));
    assert_eq!(ctx.registry.browser_count(), 0);
}

/// A browser that keeps reading answers the gateway's pings and stays
/// connected well past the pong timeout.
#[tokio::test]
async fn test_browser_answering_pings_stays_connected() {
    // Arrange
    let ctx = context(SessionConfig {
        ping_interval_ms: 20,
        pong_timeout_ms: 100,
        ..SessionConfig::default()
    });
    let (mut browser, task) = connect(&ctx).await;

    // Act: reading the stream lets the client queue and flush each pong
    for _ in 0..10 {
        assert!(matches!(next_message(&mut browser).await, Message::Ping(_)));
    }

    // Assert
    assert!(!task.is_finished());
    assert_eq!(ctx.registry.browser_count(), 1);
}

/// A browser that never answers a ping is dropped and unregistered.
#[tokio::test]
async fn test_unanswered_ping_disconnects_browser() {
    // Arrange
    let ctx = context(SessionConfig {
        ping_interval_ms: 20,
        pong_timeout_ms: 50,
        ..SessionConfig::default()
    });

    // Act: connect, then never read so no pong is sent
    let (_browser, task) = connect(&ctx).await;

    // Assert
    assert!(matches!(finished(task).await, Err(SessionError::PongTimeout(_))));
    assert_eq!(ctx.registry.browser_count(), 0);
}
