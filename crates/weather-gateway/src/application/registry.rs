//! Session registry and the links between sessions.
//!
//! The registry is the only state shared between connections.  It maps:
//!
//! - `StationId` → the device session that authenticated as that station;
//! - browser session `Uuid` → that browser session plus its notifier.
//!
//! # Ownership (for beginners)
//!
//! Each session task owns its link (`Arc<DeviceLink>` / `Arc<BrowserLink>`).
//! The registry stores only `Weak` references, so it never keeps a finished
//! session alive:
//!
//! ```text
//!  device task ──owns──► Arc<DeviceLink> ◄──weak── registry.devices[station]
//! browser task ──owns──► Arc<BrowserLink> ◄──weak── registry.browsers[uuid]
//! ```
//!
//! A lookup upgrades the weak reference while holding the lock and returns
//! the strong handle after releasing it.  A session that has ended therefore
//! reads as "not found", never as a dangling handle.
//!
//! # Locking rules
//!
//! One `std::sync::Mutex` guards both maps.  Critical sections are pure map
//! operations.  Sending to another session, logging, and invoking notifiers all
//! happen after the guard is dropped.
//!
//! # Cross-session delivery
//!
//! Links wrap the bounded `mpsc` queue of their session.  Delivering to
//! another session means posting to its queue; the target session handles
//! the item on its own task, so one connection's state is only ever touched by
//! the task that owns it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;
use weather_core::{StationId, TransportFlag, WeatherStatusNotification};

/// Callback registered by a browser session; invoked by device sessions.
pub type Notifier = Arc<dyn Fn(WeatherStatusNotification) + Send + Sync>;

// ── Links ─────────────────────────────────────────────────────────────────────

/// Work another session asks a device session to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Send a `WeatherStatusRequest` on behalf of browser `session`.
    RequestWeatherStatus { session: Uuid, flag: TransportFlag },
}

/// Work another session hands to a browser session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BrowserEvent {
    WeatherStatus(WeatherStatusNotification),
}

/// Handle through which other sessions reach one device session.
#[derive(Debug)]
pub struct DeviceLink {
    commands: mpsc::Sender<DeviceCommand>,
}

impl DeviceLink {
    /// Creates a link and the receiving end its session task drains.
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<DeviceCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self { commands: tx }), rx)
    }

    /// Queues a reading request.  Returns `false` if the device session is
    /// gone or its queue is full.
    pub fn request_weather_status(&self, session: Uuid, flag: TransportFlag) -> bool {
        post(
            &self.commands,
            DeviceCommand::RequestWeatherStatus { session, flag },
            "device",
        )
    }
}

/// Handle through which device sessions reach one browser session.
#[derive(Debug)]
pub struct BrowserLink {
    session: Uuid,
    events: mpsc::Sender<BrowserEvent>,
}

impl BrowserLink {
    /// Creates a link and the receiving end its session task drains.
    pub fn channel(session: Uuid, capacity: usize) -> (Arc<Self>, mpsc::Receiver<BrowserEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self { session, events: tx }), rx)
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Queues a reading for this browser session.
    pub fn deliver(&self, notification: WeatherStatusNotification) -> bool {
        post(&self.events, BrowserEvent::WeatherStatus(notification), "browser")
    }

    /// Builds the callback stored in the registry.
    ///
    /// The closure holds only a `Weak` reference: once the session drops its
    /// link, invoking the notifier does nothing.
    pub fn notifier(self: &Arc<Self>) -> Notifier {
        let weak = Arc::downgrade(self);
        Arc::new(move |notification| {
            if let Some(link) = weak.upgrade() {
                link.deliver(notification);
            }
        })
    }
}

fn post<T>(queue: &mpsc::Sender<T>, item: T, target: &str) -> bool {
    match queue.try_send(item) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("{target} session queue full; dropping item");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("{target} session already closed; dropping item");
            false
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

struct BrowserEntry {
    link: Weak<BrowserLink>,
    notify: Notifier,
}

#[derive(Default)]
struct Inner {
    devices: HashMap<StationId, Weak<DeviceLink>>,
    browsers: HashMap<Uuid, BrowserEntry>,
}

/// Concurrent directory of live device and browser sessions.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Critical sections never panic midway through a mutation, so a
        // poisoned lock still guards consistent maps.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Devices ──────────────────────────────────────────────────────────────

    /// Claims `id` for `link`.  Returns `false` if a live session already
    /// holds it.  An entry whose session has ended counts as free.
    pub fn join_device(&self, id: StationId, link: &Arc<DeviceLink>) -> bool {
        let mut inner = self.lock();
        if let Some(existing) = inner.devices.get(&id) {
            if existing.strong_count() > 0 {
                return false;
            }
        }
        inner.devices.insert(id, Arc::downgrade(link));
        true
    }

    /// Releases `id`.  Safe to call when `id` was never claimed.
    pub fn leave_device(&self, id: StationId) {
        let removed = self.lock().devices.remove(&id);
        drop(removed);
    }

    /// Returns the live session holding `id`, if any.
    pub fn find_device(&self, id: StationId) -> Option<Arc<DeviceLink>> {
        let inner = self.lock();
        inner.devices.get(&id).and_then(Weak::upgrade)
    }

    /// Snapshot of the stations whose sessions are alive, in ascending order.
    pub fn list_device_ids(&self) -> Vec<StationId> {
        let mut ids: Vec<StationId> = {
            let inner = self.lock();
            inner
                .devices
                .iter()
                .filter(|(_, link)| link.strong_count() > 0)
                .map(|(id, _)| *id)
                .collect()
        };
        ids.sort_unstable();
        ids
    }

    // ── Browsers ─────────────────────────────────────────────────────────────

    /// Registers a browser session and the notifier device sessions should
    /// call for it.  Returns `false` if `uuid` is already taken by a live
    /// session.
    pub fn join_browser(&self, uuid: Uuid, link: &Arc<BrowserLink>, notify: Notifier) -> bool {
        let mut inner = self.lock();
        if let Some(existing) = inner.browsers.get(&uuid) {
            if existing.link.strong_count() > 0 {
                return false;
            }
        }
        let entry = BrowserEntry {
            link: Arc::downgrade(link),
            notify,
        };
        let replaced = inner.browsers.insert(uuid, entry);
        drop(inner);
        drop(replaced);
        true
    }

    /// Removes a browser session.  Safe to call more than once.
    pub fn leave_browser(&self, uuid: Uuid) {
        let removed = self.lock().browsers.remove(&uuid);
        drop(removed);
    }

    /// Returns the notifier of a live browser session, if any.
    pub fn find_browser_notifier(&self, uuid: Uuid) -> Option<Notifier> {
        let inner = self.lock();
        inner
            .browsers
            .get(&uuid)
            .filter(|entry| entry.link.strong_count() > 0)
            .map(|entry| Arc::clone(&entry.notify))
    }

    /// Number of live browser sessions.
    pub fn browser_count(&self) -> usize {
        self.lock()
            .browsers
            .values()
            .filter(|entry| entry.link.strong_count() > 0)
            .count()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
