//! Device session: drives one TCP connection from a weather station.
//!
//! The session task is the only place the connection is touched.  A single
//! `select!` loop multiplexes four event sources:
//!
//! ```text
//!   socket read ──────► accumulation buffer ──► DeviceHandler ──► actions
//!   command queue ────► WeatherStatusRequest written to the device
//!   keepalive timer ──► Ping written, or PongTimeout ends the session
//!   idle timer ───────► HandshakeTimeout / ReadTimeout ends the session
//! ```
//!
//! Because only one branch body runs at a time, writes are naturally
//! serialized and the handler never sees concurrent calls.
//!
//! Bytes arrive in arbitrary fragments.  The buffer grows until the handler
//! can decode a whole packet; several packets delivered in one read are
//! handled one after another before the next read.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, trace};
use weather_core::{encode_outbound, HandlerResult, OutPacket};

use crate::application::{
    DeviceAction, DeviceCommand, DeviceHandler, DeviceLink, Keepalive, KeepaliveTimer,
};
use crate::domain::SessionConfig;
use crate::infrastructure::session::{keepalive_fired, SessionContext, SessionError};

/// Bytes requested from the socket per read.
const READ_CHUNK_SIZE: usize = 1024;

/// Runs a device session to completion.
///
/// Greets the device, then serves it until it disconnects, violates the
/// protocol, or misses a deadline.  Whatever the outcome, the station id it
/// held (if any) is released before this returns.
///
/// # Errors
///
/// Returns the [`SessionError`] that ended the session.  A clean
/// disconnect by the device is `Ok(())`.
pub async fn run_device_session<S>(stream: S, ctx: SessionContext) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (link, commands) = DeviceLink::channel(ctx.settings.queue_capacity);
    let keepalive = Keepalive::new(ctx.settings.ping_interval(), ctx.settings.pong_timeout());
    let handler = DeviceHandler::new(ctx.registry, ctx.directory, link);

    let mut session = DeviceSession {
        stream,
        handler,
        commands,
        keepalive,
        settings: ctx.settings,
        buffer: Vec::with_capacity(READ_CHUNK_SIZE),
    };

    let result = session.drive().await;
    session.finish().await;
    result
}

struct DeviceSession<S> {
    stream: S,
    handler: DeviceHandler,
    commands: mpsc::Receiver<DeviceCommand>,
    keepalive: Keepalive,
    settings: Arc<SessionConfig>,
    buffer: Vec<u8>,
}

impl<S> DeviceSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn drive(&mut self) -> Result<(), SessionError> {
        self.write_packet(OutPacket::Handshake).await?;

        let handshake_deadline = Instant::now() + self.settings.handshake_timeout();
        let mut read_deadline = Instant::now() + self.settings.read_timeout();
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            // Until the device authenticates, the handshake deadline is fixed
            // from the moment of connection; afterwards each read pushes the
            // idle deadline forward.
            let idle_deadline = if self.handler.is_authenticated() {
                read_deadline
            } else {
                handshake_deadline
            };
            let keepalive_deadline = self.keepalive.next_deadline();

            tokio::select! {
                read = self.stream.read(&mut chunk) => {
                    let n = read?;
                    if n == 0 {
                        debug!("device closed the connection");
                        return Ok(());
                    }
                    trace!(bytes = n, "read from device");
                    read_deadline = Instant::now() + self.settings.read_timeout();
                    self.buffer.extend_from_slice(&chunk[..n]);
                    self.process_buffer().await?;
                }
                Some(command) = self.commands.recv() => {
                    self.on_command(command).await?;
                }
                timer = keepalive_fired(keepalive_deadline) => {
                    self.on_keepalive(timer).await?;
                }
                () = sleep_until(idle_deadline) => {
                    return Err(self.idle_error());
                }
            }
        }
    }

    /// Feeds the buffer to the handler until it needs more bytes.
    async fn process_buffer(&mut self) -> Result<(), SessionError> {
        while !self.buffer.is_empty() {
            let (result, consumed) = self.handler.handle(&self.buffer);
            match result {
                HandlerResult::Good => {
                    self.buffer.drain(..consumed);
                    self.apply_actions().await?;
                }
                HandlerResult::Indeterminate => break,
                HandlerResult::Bad | HandlerResult::PayloadTooBig => {
                    return Err(SessionError::BadPacket(self.buffer[0]));
                }
            }
        }
        Ok(())
    }

    async fn apply_actions(&mut self) -> Result<(), SessionError> {
        for action in self.handler.take_actions() {
            match action {
                DeviceAction::Send(packet) => self.write_packet(packet).await?,
                DeviceAction::StartKeepalive => self.keepalive.start(Instant::now()),
                DeviceAction::PongReceived => self.keepalive.pong_received(Instant::now()),
            }
        }
        Ok(())
    }

    async fn on_command(&mut self, command: DeviceCommand) -> Result<(), SessionError> {
        match command {
            DeviceCommand::RequestWeatherStatus { session, flag } => {
                debug!(browser = %session, ?flag, "requesting weather status");
                self.write_packet(OutPacket::WeatherStatusRequest { session, flag })
                    .await
            }
        }
    }

    async fn on_keepalive(&mut self, timer: KeepaliveTimer) -> Result<(), SessionError> {
        match timer {
            KeepaliveTimer::Ping => {
                trace!("sending ping");
                self.write_packet(OutPacket::Ping).await?;
                self.keepalive.ping_sent(Instant::now());
                Ok(())
            }
            KeepaliveTimer::PongTimeout => {
                Err(SessionError::PongTimeout(self.settings.pong_timeout()))
            }
        }
    }

    fn idle_error(&self) -> SessionError {
        if self.handler.is_authenticated() {
            SessionError::ReadTimeout(self.settings.read_timeout())
        } else {
            SessionError::HandshakeTimeout(self.settings.handshake_timeout())
        }
    }

    async fn write_packet(&mut self, packet: OutPacket) -> Result<(), SessionError> {
        let bytes = encode_outbound(&packet);
        let limit = self.settings.write_timeout();
        let stream = &mut self.stream;
        let write = async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        };
        timeout(limit, write)
            .await
            .map_err(|_| SessionError::WriteTimeout(limit))??;
        Ok(())
    }

    /// Releases the station and shuts the socket down.
    async fn finish(&mut self) {
        self.keepalive.stop();
        if let Some(station) = self.handler.station() {
            info!(%station, "device session ending");
        }
        self.handler.close();

        let limit = self.settings.write_timeout();
        match timeout(limit, self.stream.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("socket shutdown failed: {e}"),
            Err(_) => debug!("socket shutdown timed out"),
        }
    }
}
