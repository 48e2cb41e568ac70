//! Version store.
//!
//! Every generated revision becomes an immutable [`Version`]. The store
//! tracks which one is live in the sandbox, writes sources into the sandbox
//! in the order they were requested, and attaches a snapshot to each new
//! version once the preview has settled. Each mutation raises exactly one
//! [`Event::VersionsChanged`].
//!
//! The collection lives in memory only.

use crate::error::SessionError;
use crate::events::{Event, EventBus, Subscription, Topic};
use crate::fence::strip_code_fences;
use crate::session::SessionManager;
use crate::snapshot::{Snapshot, SnapshotCapturer};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Unique identifier for a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VersionId(Uuid);

impl VersionId {
    /// Create a new random version ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for VersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One generated source revision.
#[derive(Debug, Clone, Serialize)]
pub struct Version {
    id: VersionId,
    display_name: String,
    source_code: String,
    created_at: DateTime<Utc>,
    origin_prompt: String,
    snapshot: Option<Snapshot>,
}

impl Version {
    /// Version ID.
    pub fn id(&self) -> VersionId {
        self.id
    }

    /// Name shown to the user.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Application source, with code fences already stripped.
    pub fn source_code(&self) -> &str {
        &self.source_code
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Prompt that produced this version.
    pub fn origin_prompt(&self) -> &str {
        &self.origin_prompt
    }

    /// Preview image, once captured.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }
}

/// Versions in creation order plus the current pointer.
#[derive(Debug, Default)]
struct VersionCollection {
    entries: Vec<Version>,
    current: Option<VersionId>,
}

impl VersionCollection {
    fn position(&self, id: VersionId) -> Option<usize> {
        self.entries.iter().position(|v| v.id == id)
    }

    fn get(&self, id: VersionId) -> Option<&Version> {
        self.entries.iter().find(|v| v.id == id)
    }

    fn insert(&mut self, version: Version) {
        self.current = Some(version.id);
        self.entries.push(version);
    }

    /// Set the snapshot if the version still exists and has none yet.
    fn attach_snapshot(&mut self, id: VersionId, snapshot: Snapshot) -> bool {
        match self.entries.iter_mut().find(|v| v.id == id) {
            Some(version) if version.snapshot.is_none() => {
                version.snapshot = Some(snapshot);
                true
            }
            _ => false,
        }
    }

    fn remove(&mut self, id: VersionId) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        self.entries.remove(index);
        if self.current == Some(id) {
            self.current = self.entries.last().map(|v| v.id);
        }
        true
    }
}

struct EntryWrite {
    version_id: VersionId,
    source: String,
    done: oneshot::Sender<Result<(), SessionError>>,
}

struct StoreInner {
    collection: Mutex<VersionCollection>,
    session: SessionManager,
    capturer: SnapshotCapturer,
    bus: EventBus,
    writes: mpsc::UnboundedSender<EntryWrite>,
}

impl StoreInner {
    fn collection(&self) -> MutexGuard<'_, VersionCollection> {
        self.collection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheaply cloneable handle to the version store.
#[derive(Clone)]
pub struct VersionStore {
    inner: Arc<StoreInner>,
}

impl VersionStore {
    /// Create a store that writes into `session` and publishes on its bus.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(session: SessionManager, capturer: SnapshotCapturer) -> Self {
        let (writes, queue) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(session.clone(), queue));

        Self {
            inner: Arc::new(StoreInner {
                collection: Mutex::new(VersionCollection::default()),
                bus: session.events().clone(),
                session,
                capturer,
                writes,
            }),
        }
    }

    /// The session this store writes into.
    pub fn session(&self) -> &SessionManager {
        &self.inner.session
    }

    /// Record a new version and make it current.
    ///
    /// Returns immediately. Writing the source into the sandbox and
    /// capturing the snapshot happen in the background; their failures are
    /// logged, never returned.
    pub fn create_version(
        &self,
        source_code: &str,
        origin_prompt: &str,
        display_name: Option<&str>,
    ) -> VersionId {
        let source = strip_code_fences(source_code).into_owned();
        let id = VersionId::new();

        let display_name = {
            let mut collection = self.inner.collection();
            let display_name = match display_name {
                Some(name) => name.to_string(),
                None => format!("App {}", collection.entries.len() + 1),
            };
            collection.insert(Version {
                id,
                display_name: display_name.clone(),
                source_code: source.clone(),
                created_at: Utc::now(),
                origin_prompt: origin_prompt.to_string(),
                snapshot: None,
            });
            display_name
        };
        tracing::info!(version_id = %id, name = %display_name, "Version created");
        self.notify();

        let written = self.enqueue_write(id, source);
        let store = self.clone();
        tokio::spawn(async move {
            store.settle_and_capture(id, &display_name, written).await;
        });
        id
    }

    fn enqueue_write(
        &self,
        version_id: VersionId,
        source: String,
    ) -> oneshot::Receiver<Result<(), SessionError>> {
        let (done, written) = oneshot::channel();
        let job = EntryWrite {
            version_id,
            source,
            done,
        };
        if self.inner.writes.send(job).is_err() {
            tracing::warn!(version_id = %version_id, "Sandbox writer has stopped");
        }
        written
    }

    async fn settle_and_capture(
        &self,
        id: VersionId,
        label: &str,
        written: oneshot::Receiver<Result<(), SessionError>>,
    ) {
        match written.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(version_id = %id, error = %e, "Sandbox write failed; capturing anyway")
            }
            Err(_) => tracing::warn!(version_id = %id, "Sandbox write was dropped"),
        }

        let snapshot = self.inner.capturer.capture(label).await;
        let placeholder = snapshot.is_placeholder();
        let stored = self.inner.collection().attach_snapshot(id, snapshot);
        if stored {
            tracing::info!(version_id = %id, placeholder, "Snapshot stored");
            self.notify();
        } else {
            tracing::debug!(version_id = %id, "Version gone or already has a snapshot");
        }
    }

    /// All versions, most recent first.
    pub fn list_versions(&self) -> Vec<Version> {
        self.inner
            .collection()
            .entries
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    /// Look up one version.
    pub fn get(&self, id: VersionId) -> Option<Version> {
        self.inner.collection().get(id).cloned()
    }

    /// ID of the version currently live in the sandbox.
    pub fn current_id(&self) -> Option<VersionId> {
        self.inner.collection().current
    }

    /// Number of versions.
    pub fn len(&self) -> usize {
        self.inner.collection().entries.len()
    }

    /// True if no version has been created.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make `id` current and write its source into the sandbox.
    ///
    /// Returns `Ok(false)` for an unknown id. A sandbox write failure is
    /// returned after the pointer has moved.
    pub async fn switch_to(&self, id: VersionId) -> Result<bool, SessionError> {
        let (source, changed) = {
            let mut collection = self.inner.collection();
            let Some(version) = collection.get(id) else {
                tracing::debug!(version_id = %id, "Switch to unknown version");
                return Ok(false);
            };
            let source = version.source_code.clone();
            let changed = collection.current.replace(id) != Some(id);
            (source, changed)
        };
        tracing::info!(version_id = %id, "Switching version");
        if changed {
            self.notify();
        }

        match self.enqueue_write(id, source).await {
            Ok(result) => result.map(|()| true),
            Err(_) => Err(SessionError::Write {
                path: self.inner.session.config().entry_path.clone(),
                reason: "sandbox writer stopped".into(),
            }),
        }
    }

    /// Delete a version. Returns false for an unknown id.
    pub fn remove(&self, id: VersionId) -> bool {
        let removed = self.inner.collection().remove(id);
        if removed {
            tracing::info!(version_id = %id, "Version removed");
            self.notify();
        }
        removed
    }

    /// Invoke `callback` after every mutation.
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .bus
            .subscribe(Topic::VersionsChanged, move |_| callback())
    }

    fn notify(&self) {
        self.inner.bus.dispatch(&Event::VersionsChanged);
    }
}

impl fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let collection = self.inner.collection();
        f.debug_struct("VersionStore")
            .field("versions", &collection.entries.len())
            .field("current", &collection.current)
            .finish()
    }
}

/// Apply entry-file writes one at a time, in the order they were queued.
async fn run_writer(session: SessionManager, mut queue: mpsc::UnboundedReceiver<EntryWrite>) {
    while let Some(job) = queue.recv().await {
        let result = session.update_application_entry(&job.source).await;
        if let Err(e) = &result {
            tracing::warn!(version_id = %job.version_id, error = %e, "Failed to write version source");
        }
        let _ = job.done.send(result);
    }
    tracing::debug!("Version writer stopped");
}
