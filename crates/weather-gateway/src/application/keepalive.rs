//! Ping/pong timer state for an authenticated device or a browser.
//!
//! ```text
//!            start / pong                 ping due
//! Idle ─────────────────► AwaitingPing ─────────────► AwaitingPong
//!                              ▲          (send Ping)       │
//!                              └────────── Pong ────────────┘
//!                                                           │ pong timeout
//!                                                           ▼
//!                                                       disconnect
//! ```
//!
//! This type only tracks deadlines.  Each session sleeps until
//! [`Keepalive::next_deadline`] and reacts to whichever timer fired, so the
//! logic can be tested without a runtime.

use std::time::Duration;

use tokio::time::Instant;

/// Which keepalive timer a deadline belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveTimer {
    /// Time to send the next `Ping`.
    Ping,
    /// The device failed to answer the last `Ping` in time.
    PongTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    AwaitingPing(Instant),
    AwaitingPong(Instant),
}

#[derive(Debug, Clone)]
pub struct Keepalive {
    ping_interval: Duration,
    pong_timeout: Duration,
    state: State,
}

impl Keepalive {
    pub fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
            state: State::Idle,
        }
    }

    /// Arms the ping timer.  Called when a device authenticates or a browser
    /// session starts.
    pub fn start(&mut self, now: Instant) {
        self.state = State::AwaitingPing(now + self.ping_interval);
    }

    /// Cancels every timer.
    pub fn stop(&mut self) {
        self.state = State::Idle;
    }

    pub fn is_running(&self) -> bool {
        self.state != State::Idle
    }

    pub fn next_deadline(&self) -> Option<(Instant, KeepaliveTimer)> {
        match self.state {
            State::Idle => None,
            State::AwaitingPing(at) => Some((at, KeepaliveTimer::Ping)),
            State::AwaitingPong(at) => Some((at, KeepaliveTimer::PongTimeout)),
        }
    }

    /// Records that a `Ping` went out and arms the pong timeout.
    pub fn ping_sent(&mut self, now: Instant) {
        self.state = State::AwaitingPong(now + self.pong_timeout);
    }

    /// Cancels a pending pong timeout and re-arms the ping timer.  A pong
    /// nobody asked for changes nothing.
    pub fn pong_received(&mut self, now: Instant) {
        if let State::AwaitingPong(_) = self.state {
            self.state = State::AwaitingPing(now + self.ping_interval);
        }
    }
}
