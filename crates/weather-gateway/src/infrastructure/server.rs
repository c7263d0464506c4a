//! Listeners and accept loops.
//!
//! The gateway listens on two TCP ports: one for devices speaking the binary
//! protocol, one for browsers speaking WebSocket.  Every accepted connection
//! becomes its own Tokio task running under a tracing span that names the
//! peer, so all log lines of one session can be grepped together.
//!
//! Both accept loops poll a shared `running` flag every 200 ms and stop
//! accepting once it is cleared.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};
use weather_core::TransportFlag;

use crate::application::SessionRegistry;
use crate::domain::{AllowList, GatewayConfig, StationDirectory};
use crate::infrastructure::browser_session::{accept_browser, run_browser_session};
use crate::infrastructure::device_session::run_device_session;
use crate::infrastructure::session::{SessionContext, SessionError};

/// How often an idle accept loop re-checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A gateway with both listeners bound, ready to serve.
pub struct Gateway {
    device_listener: TcpListener,
    browser_listener: TcpListener,
    context: SessionContext,
}

impl Gateway {
    /// Binds both listeners and builds the shared session context.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address is invalid or either port cannot
    /// be bound.
    pub async fn bind(config: &GatewayConfig) -> anyhow::Result<Self> {
        let allow_list = AllowList::from_config(config);
        if allow_list.device_count() == 0 {
            warn!("no devices are allow-listed; every handshake will be refused");
        }
        let directory: Arc<dyn StationDirectory> = Arc::new(allow_list);
        Self::bind_with(config, SessionContext::new(directory, config.session.clone())).await
    }

    /// Like [`Gateway::bind`], but with a caller-supplied context.
    pub async fn bind_with(
        config: &GatewayConfig,
        context: SessionContext,
    ) -> anyhow::Result<Self> {
        let device_addr = config.server.device_addr()?;
        let browser_addr = config.server.browser_addr()?;

        let device_listener = TcpListener::bind(device_addr)
            .await
            .with_context(|| format!("failed to bind device listener on {device_addr}"))?;
        let browser_listener = TcpListener::bind(browser_addr)
            .await
            .with_context(|| format!("failed to bind browser listener on {browser_addr}"))?;

        Ok(Self {
            device_listener,
            browser_listener,
            context,
        })
    }

    pub fn device_addr(&self) -> std::io::Result<SocketAddr> {
        self.device_listener.local_addr()
    }

    pub fn browser_addr(&self) -> std::io::Result<SocketAddr> {
        self.browser_listener.local_addr()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.context.registry)
    }

    /// Accepts connections on both ports until `running` is cleared.
    ///
    /// Sessions already running are not interrupted; they end with the
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns an error only if an accept loop task panicked.
    pub async fn serve(self, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        if let Ok(addr) = self.device_addr() {
            info!("listening for devices on {addr}");
        }
        if let Ok(addr) = self.browser_addr() {
            info!("listening for browsers on {addr}");
        }

        let device_ctx = self.context.clone();
        let devices = tokio::spawn(accept_loop(
            self.device_listener,
            Arc::clone(&running),
            "device",
            move |stream, peer| serve_device(stream, peer, device_ctx.clone()),
        ));

        let browser_ctx = self.context;
        let browsers = tokio::spawn(accept_loop(
            self.browser_listener,
            running,
            "browser",
            move |stream, peer| serve_browser(stream, peer, browser_ctx.clone()),
        ));

        let (devices, browsers) = tokio::join!(devices, browsers);
        devices.context("device accept loop panicked")?;
        browsers.context("browser accept loop panicked")?;
        Ok(())
    }
}

/// Binds and serves with the given configuration until `running` is cleared.
///
/// # Errors
///
/// See [`Gateway::bind`] and [`Gateway::serve`].
pub async fn run_server(config: GatewayConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    Gateway::bind(&config).await?.serve(running).await
}

async fn accept_loop<F, Fut>(
    listener: TcpListener,
    running: Arc<AtomicBool>,
    kind: &'static str,
    serve: F,
) where
    F: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping {kind} accept loop");
            break;
        }

        match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("could not disable Nagle for {peer}: {e}");
                }
                tokio::spawn(serve(stream, peer));
            }
            Ok(Err(e)) => error!("{kind} accept error: {e}"),
            // No connection in this interval; re-check the flag.
            Err(_) => {}
        }
    }
}

fn serve_device(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: SessionContext,
) -> impl Future<Output = ()> + Send + 'static {
    let span = info_span!("device", %peer);
    async move {
        info!("device connected");
        log_session_end("device", run_device_session(stream, ctx).await);
    }
    .instrument(span)
}

fn serve_browser(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: SessionContext,
) -> impl Future<Output = ()> + Send + 'static {
    let span = info_span!("browser", %peer, session = tracing::field::Empty);
    async move {
        debug!("browser connected");
        let result = match accept_browser(stream, &ctx.settings).await {
            Ok(ws) => run_browser_session(ws, ctx, TransportFlag::Plain).await,
            Err(e) => Err(e),
        };
        log_session_end("browser", result);
    }
    .instrument(span)
}

fn log_session_end(kind: &str, result: Result<(), SessionError>) {
    match result {
        Ok(()) => info!("{kind} session closed"),
        Err(e) if e.is_benign() => debug!("{kind} disconnected: {e}"),
        Err(e) => warn!("{kind} session ended: {e}"),
    }
}
