//! # External Collaborator Ports
//!
//! The coordinator reaches the outside world only through these traits:
//! the radio transport, durable storage, an event sink, and a clock. Each
//! is injected at construction so tests can substitute fakes.
//!
//! | Port | Provided implementations |
//! |------|--------------------------|
//! | [`PodTransport`] | none; the host supplies the radio stack |
//! | [`StatePersistence`] | [`InMemoryPersistence`], [`FilePersistence`] |
//! | [`EventPublisher`] | [`EventBus`](crate::EventBus) |
//! | [`Clock`] | [`SystemClock`], [`ManualClock`] |

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use pod_core::Timestamp;
use pod_state::{AlertDescriptionResolver, DefaultAlertDescriptions};

use crate::command::{CommandRequest, PodResponse, TransportError};
use crate::events::{EventBus, PodEvent};

// ─── Transport ──────────────────────────────────────────────────────

/// Sends one command to the pod and returns its decoded response.
///
/// Implementations need not enforce a deadline; the coordinator wraps
/// every call in the configured command timeout.
#[async_trait::async_trait]
pub trait PodTransport: Send + Sync {
    async fn send(&self, request: &CommandRequest) -> Result<PodResponse, TransportError>;
}

// ─── Persistence ────────────────────────────────────────────────────

/// Durable storage for the serialized session blob.
pub trait StatePersistence: Send + Sync {
    /// Replace the stored blob.
    fn save(&self, blob: &[u8]) -> io::Result<()>;

    /// The stored blob, or `None` if nothing was ever saved.
    fn load(&self) -> io::Result<Option<Vec<u8>>>;
}

/// Keeps the blob in memory. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPersistence {
    blob: Arc<Mutex<Option<Vec<u8>>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatePersistence for InMemoryPersistence {
    fn save(&self, blob: &[u8]) -> io::Result<()> {
        *self.blob.lock() = Some(blob.to_vec());
        Ok(())
    }

    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.blob.lock().clone())
    }
}

/// Stores the blob in a single file. Writes go to a sibling temp file
/// that is renamed over the target, so a reader never sees a partial blob.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "pod-session".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StatePersistence for FilePersistence {
    fn save(&self, blob: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.temp_path();
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &self.path)
    }

    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ─── Events ─────────────────────────────────────────────────────────

/// Receives session events. Must not block and cannot fail from the
/// coordinator's point of view.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: PodEvent);
}

// ─── Clock ──────────────────────────────────────────────────────────

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: Timestamp) {
        *self.now.lock() = now;
    }

    pub fn advance_minutes(&self, minutes: u32) {
        let mut now = self.now.lock();
        *now = now.plus_minutes(minutes);
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock();
        *now = now.plus_secs(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

// ─── Bundle ─────────────────────────────────────────────────────────

/// Everything a coordinator needs from the outside world.
#[derive(Clone)]
pub struct SessionPorts {
    pub transport: Arc<dyn PodTransport>,
    pub persistence: Arc<dyn StatePersistence>,
    pub events: Arc<dyn EventPublisher>,
    pub clock: Arc<dyn Clock>,
    pub alert_descriptions: Arc<dyn AlertDescriptionResolver>,
}

impl SessionPorts {
    /// Ports with in-memory persistence, a fresh [`EventBus`], the system
    /// clock, and English alert descriptions.
    pub fn new(transport: Arc<dyn PodTransport>) -> Self {
        Self {
            transport,
            persistence: Arc::new(InMemoryPersistence::new()),
            events: Arc::new(EventBus::new()),
            clock: Arc::new(SystemClock),
            alert_descriptions: Arc::new(DefaultAlertDescriptions),
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn StatePersistence>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_alert_descriptions(mut self, resolver: Arc<dyn AlertDescriptionResolver>) -> Self {
        self.alert_descriptions = resolver;
        self
    }
}

impl std::fmt::Debug for SessionPorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPorts").finish_non_exhaustive()
    }
}
