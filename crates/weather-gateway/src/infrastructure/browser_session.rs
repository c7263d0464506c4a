//! Browser session: drives one WebSocket connection.
//!
//! Each WebSocket message carries a chunk of the browser byte stream, in
//! which requests are framed as a 2-byte little-endian length followed by
//! JSON.  Chunks are accumulated exactly like device reads, so a request may
//! span several messages and one message may hold several requests.
//!
//! Replies and forwarded readings are sent as text messages holding bare
//! JSON.  Outbound messages pass through a [`WriteQueue`] so at most one
//! send is in flight; the in-flight send owns the sink half of the socket
//! and hands it back when it completes.
//!
//! A malformed request or an oversize frame closes the session with a close
//! frame (policy violation or message-too-big respectively) after any
//! earlier replies have been flushed.
//!
//! Two timers reap browsers that stop talking.  A partial request left in
//! the buffer must make progress within `read_timeout`, and a WebSocket
//! ping goes out every `ping_interval` and must be answered within
//! `pong_timeout`.  Either expiry drops the connection without a close
//! frame, which also releases the registry entry.

use std::future::pending;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, SERVER};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, field, info, trace, Span};
use uuid::Uuid;
use weather_core::{HandlerResult, TransportFlag};

use crate::application::{
    BrowserEvent, BrowserHandler, BrowserLink, Keepalive, KeepaliveTimer, SessionRegistry,
    WriteQueue,
};
use crate::domain::{BrowserResponse, SessionConfig};
use crate::infrastructure::session::{keepalive_fired, SessionContext, SessionError};

/// Value of the `Server` header in the upgrade response.
pub const SERVER_HEADER: &str = concat!("weather-gateway/", env!("CARGO_PKG_VERSION"));

type WsSink<S> = SplitSink<WebSocketStream<S>, WsMessage>;
type PendingWrite<S> = BoxFuture<'static, (WsSink<S>, Result<(), SessionError>)>;

/// Performs the WebSocket upgrade on a freshly accepted connection.
///
/// # Errors
///
/// Returns [`SessionError::UpgradeTimeout`] if the client does not finish
/// the upgrade in time, or [`SessionError::WebSocket`] if it is not a valid
/// WebSocket handshake.
pub async fn accept_browser<S>(
    stream: S,
    settings: &SessionConfig,
) -> Result<WebSocketStream<S>, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let add_server_header = |_request: &Request, mut response: Response| {
        response
            .headers_mut()
            .insert(SERVER, HeaderValue::from_static(SERVER_HEADER));
        Ok::<Response, ErrorResponse>(response)
    };

    let limit = settings.websocket_handshake_timeout();
    let ws = timeout(limit, accept_hdr_async(stream, add_server_header))
        .await
        .map_err(|_| SessionError::UpgradeTimeout(limit))??;
    Ok(ws)
}

/// Runs an upgraded browser session to completion.
///
/// The session registers under a fresh UUID for as long as it runs, so
/// device sessions can route readings back to it.  `flag` records how the
/// browser reached the gateway and is echoed in every request forwarded on
/// its behalf.
///
/// # Errors
///
/// Returns the [`SessionError`] that ended the session.  A close initiated
/// by the browser is `Ok(())`.
pub async fn run_browser_session<S>(
    ws: WebSocketStream<S>,
    ctx: SessionContext,
    flag: TransportFlag,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let session = Uuid::new_v4();
    Span::current().record("session", field::display(session));

    let (link, events) = BrowserLink::channel(session, ctx.settings.queue_capacity);
    if !ctx.registry.join_browser(session, &link, link.notifier()) {
        return Err(SessionError::DuplicateSession(session));
    }
    let _registration = Registration {
        registry: Arc::clone(&ctx.registry),
        session,
    };
    info!("browser session started");

    let handler = BrowserHandler::new(
        session,
        flag,
        Arc::clone(&ctx.registry),
        ctx.directory,
        ctx.settings.max_payload_bytes,
    );
    let (sink, stream) = ws.split();
    let mut keepalive = Keepalive::new(ctx.settings.ping_interval(), ctx.settings.pong_timeout());
    keepalive.start(Instant::now());

    let mut browser = BrowserSession {
        stream,
        sink: Some(sink),
        in_flight: None,
        queue: WriteQueue::new(),
        events,
        handler,
        buffer: Vec::new(),
        read_deadline: Instant::now(),
        keepalive,
        settings: ctx.settings,
        closing: None,
        _link: link,
    };
    browser.drive().await
}

/// Keeps the session registered; leaves the registry when dropped.
struct Registration {
    registry: Arc<SessionRegistry>,
    session: Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.leave_browser(self.session);
        debug!("browser session unregistered");
    }
}

struct BrowserSession<S> {
    stream: SplitStream<WebSocketStream<S>>,
    /// `None` while a send is in flight.
    sink: Option<WsSink<S>>,
    in_flight: Option<PendingWrite<S>>,
    queue: WriteQueue<WsMessage>,
    events: mpsc::Receiver<BrowserEvent>,
    handler: BrowserHandler,
    buffer: Vec<u8>,
    /// When a partially received request must have made progress by.  Only
    /// armed while `buffer` is non-empty.
    read_deadline: Instant,
    keepalive: Keepalive,
    settings: Arc<SessionConfig>,
    /// Set once a close frame has been queued; carries the reason the
    /// session is ending.
    closing: Option<SessionError>,
    _link: Arc<BrowserLink>,
}

impl<S> BrowserSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn drive(&mut self) -> Result<(), SessionError> {
        loop {
            if self.closing.is_some() && self.queue.is_empty() {
                return self.closing.take().map_or(Ok(()), Err);
            }
            let open = self.closing.is_none();
            let partial = open && !self.buffer.is_empty();
            let keepalive_deadline = if open {
                self.keepalive.next_deadline()
            } else {
                None
            };

            tokio::select! {
                incoming = self.stream.next(), if open => match incoming {
                    Some(Ok(message)) => self.on_message(message)?,
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        debug!("browser stream ended");
                        return Ok(());
                    }
                },
                Some(event) = self.events.recv(), if open => self.on_event(event)?,
                (sink, result) = write_completed(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.sink = Some(sink);
                    result?;
                    self.queue.complete();
                    self.dispatch_head();
                }
                timer = keepalive_fired(keepalive_deadline) => self.on_keepalive(timer)?,
                () = sleep_until(self.read_deadline), if partial => {
                    return Err(SessionError::ReadTimeout(self.settings.read_timeout()));
                }
            }
        }
    }

    fn on_message(&mut self, message: WsMessage) -> Result<(), SessionError> {
        match message {
            WsMessage::Binary(bytes) => self.feed(&bytes),
            WsMessage::Text(text) => self.feed(text.as_bytes()),
            WsMessage::Close(frame) => {
                debug!(?frame, "browser sent close");
                Ok(())
            }
            WsMessage::Pong(_) => {
                trace!("browser answered ping");
                self.keepalive.pong_received(Instant::now());
                Ok(())
            }
            // Pings are answered by tungstenite itself.
            WsMessage::Ping(_) | WsMessage::Frame(_) => Ok(()),
        }
    }

    fn feed(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        trace!(bytes = bytes.len(), "read from browser");
        if bytes.is_empty() {
            return Ok(());
        }
        self.read_deadline = Instant::now() + self.settings.read_timeout();
        self.buffer.extend_from_slice(bytes);

        while !self.buffer.is_empty() {
            let (result, consumed) = self.handler.handle(&self.buffer);
            match result {
                HandlerResult::Good => {
                    self.buffer.drain(..consumed);
                    self.flush_responses()?;
                }
                HandlerResult::Indeterminate => break,
                HandlerResult::Bad => {
                    self.begin_close(
                        CloseCode::Policy,
                        "invalid request",
                        SessionError::BadRequest,
                    );
                    break;
                }
                HandlerResult::PayloadTooBig => {
                    let max = self.settings.max_payload_bytes;
                    self.begin_close(
                        CloseCode::Size,
                        "request too large",
                        SessionError::PayloadTooBig(max),
                    );
                    break;
                }
            }
        }
        Ok(())
    }

    fn flush_responses(&mut self) -> Result<(), SessionError> {
        for response in self.handler.take_responses() {
            self.send_json(&response)?;
        }
        Ok(())
    }

    fn on_event(&mut self, event: BrowserEvent) -> Result<(), SessionError> {
        match event {
            BrowserEvent::WeatherStatus(notification) => {
                trace!(station = %notification.station_id, "forwarding reading");
                self.send_json(&BrowserResponse::weather_status(&notification))
            }
        }
    }

    fn on_keepalive(&mut self, timer: KeepaliveTimer) -> Result<(), SessionError> {
        match timer {
            KeepaliveTimer::Ping => {
                trace!("sending ping");
                self.enqueue(WsMessage::Ping(Vec::new()));
                self.keepalive.ping_sent(Instant::now());
                Ok(())
            }
            KeepaliveTimer::PongTimeout => {
                Err(SessionError::PongTimeout(self.settings.pong_timeout()))
            }
        }
    }

    fn send_json(&mut self, response: &BrowserResponse) -> Result<(), SessionError> {
        let json = response.to_json()?;
        self.enqueue(WsMessage::Text(json));
        Ok(())
    }

    /// Queues a close frame behind any pending replies and stops reading.
    fn begin_close(&mut self, code: CloseCode, reason: &'static str, error: SessionError) {
        self.buffer.clear();
        self.enqueue(WsMessage::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })));
        self.closing = Some(error);
    }

    fn enqueue(&mut self, message: WsMessage) {
        if self.queue.push(message) {
            self.dispatch_head();
        }
    }

    /// Starts sending the queue head unless a send is already running.
    fn dispatch_head(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(message) = self.queue.head().cloned() else {
            return;
        };
        let Some(mut sink) = self.sink.take() else {
            return;
        };

        let limit = self.settings.write_timeout();
        self.in_flight = Some(
            async move {
                let result = match timeout(limit, sink.send(message)).await {
                    Ok(sent) => sent.map_err(SessionError::from),
                    Err(_) => Err(SessionError::WriteTimeout(limit)),
                };
                (sink, result)
            }
            .boxed(),
        );
    }
}

/// Resolves when the in-flight send finishes; never resolves when idle.
async fn write_completed<S>(
    in_flight: &mut Option<PendingWrite<S>>,
) -> (WsSink<S>, Result<(), SessionError>) {
    match in_flight {
        Some(write) => write.await,
        None => pending().await,
    }
}
