//! Pieces shared by device and browser sessions: the collaborators every
//! session receives at spawn time and the error type that ends a session.

use std::future::pending;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::{self, error::ProtocolError as WsProtocolError};
use uuid::Uuid;

use crate::application::{KeepaliveTimer, SessionRegistry};
use crate::domain::{SessionConfig, StationDirectory};

/// Everything a session needs besides its transport.
///
/// Cloning is cheap: every field is an `Arc`.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<SessionRegistry>,
    pub directory: Arc<dyn StationDirectory>,
    pub settings: Arc<SessionConfig>,
}

impl SessionContext {
    pub fn new(directory: Arc<dyn StationDirectory>, settings: SessionConfig) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            directory,
            settings: Arc::new(settings),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("WebSocket upgrade did not complete within {0:?}")]
    UpgradeTimeout(Duration),

    #[error("device did not authenticate within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("peer sent nothing for {0:?}")]
    ReadTimeout(Duration),

    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("peer did not answer ping within {0:?}")]
    PongTimeout(Duration),

    #[error("protocol violation in device packet with tag 0x{0:02X}")]
    BadPacket(u8),

    #[error("invalid browser request")]
    BadRequest,

    #[error("browser request larger than {0} bytes")]
    PayloadTooBig(usize),

    #[error("browser session id {0} is already registered")]
    DuplicateSession(Uuid),

    #[error("failed to serialize response: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    /// Whether this is an ordinary way for a peer to go away rather than a
    /// failure worth reporting.
    pub fn is_benign(&self) -> bool {
        match self {
            SessionError::Io(e) => is_disconnect(e.kind()),
            SessionError::WebSocket(tungstenite::Error::ConnectionClosed)
            | SessionError::WebSocket(tungstenite::Error::AlreadyClosed)
            | SessionError::WebSocket(tungstenite::Error::Protocol(
                WsProtocolError::ResetWithoutClosingHandshake,
            )) => true,
            SessionError::WebSocket(tungstenite::Error::Io(e)) => is_disconnect(e.kind()),
            _ => false,
        }
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}

/// Resolves when the armed keepalive deadline passes; never resolves while
/// the keepalive is stopped.
pub(crate) async fn keepalive_fired(deadline: Option<(Instant, KeepaliveTimer)>) -> KeepaliveTimer {
    match deadline {
        Some((at, timer)) => {
            sleep_until(at).await;
            timer
        }
        None => pending().await,
    }
}
