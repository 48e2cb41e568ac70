//! Sandbox session manager.
//!
//! The [`SessionManager`] owns at most one sandbox for its whole lifetime.
//! The first call to [`SessionManager::ensure_session`] boots the sandbox,
//! mounts the project template, installs dependencies and starts the dev
//! server; concurrent and later calls share that one outcome.

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{Event, EventBus, Subscription, Topic};
use crate::fence::strip_code_fences;
use chrono::{DateTime, Utc};
use forge_runtime::{Sandbox, SandboxRuntime};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use uuid::Uuid;

/// Unique identifier for a booted sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SandboxId(Uuid);

impl SandboxId {
    /// Create a new random sandbox ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SandboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to the booted sandbox.
#[derive(Clone)]
pub struct SandboxHandle {
    id: SandboxId,
    sandbox: Arc<dyn Sandbox>,
    booted_at: DateTime<Utc>,
}

impl SandboxHandle {
    fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            id: SandboxId::new(),
            sandbox,
            booted_at: Utc::now(),
        }
    }

    /// Get the sandbox ID.
    pub fn id(&self) -> SandboxId {
        self.id
    }

    /// When the sandbox finished booting.
    pub fn booted_at(&self) -> DateTime<Utc> {
        self.booted_at
    }

    /// The underlying sandbox.
    pub fn sandbox(&self) -> &Arc<dyn Sandbox> {
        &self.sandbox
    }

    /// Write a file inside the sandbox.
    pub async fn write_file(&self, path: &str, contents: &str) -> Result<(), SessionError> {
        tracing::debug!(
            sandbox_id = %self.id,
            path = %path,
            content_len = contents.len(),
            "Writing sandbox file"
        );
        self.sandbox
            .write_file(path, contents)
            .await
            .map_err(|e| SessionError::Write {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }
}

impl fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxHandle")
            .field("id", &self.id)
            .field("booted_at", &self.booted_at)
            .finish_non_exhaustive()
    }
}

/// Address at which the sandbox dev server can be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PreviewAddress(String);

impl PreviewAddress {
    /// Build an address from a server-ready signal.
    ///
    /// Runtimes report either a bare host or a full URL. A value that already
    /// carries a scheme is used as is; a bare host becomes
    /// `http://{host}:{port}`.
    pub fn from_server_ready(port: u16, host_or_url: &str) -> Self {
        if host_or_url.contains("://") {
            Self(host_or_url.to_string())
        } else {
            Self(format!("http://{host_or_url}:{port}"))
        }
    }

    /// The address as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PreviewAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of the session, in the order phases are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Nothing has been booted.
    Uninitialized,
    /// Booting the sandbox and mounting the template.
    Booting,
    /// Running the dependency install command.
    InstallingDependencies,
    /// Dev server started, waiting for it to listen.
    Running,
    /// Dev server is reachable.
    Ready,
    /// The session failed permanently.
    Failed,
}

impl SessionPhase {
    /// Human-readable description, suitable for a loading indicator.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Uninitialized => "Waiting to start",
            Self::Booting => "Booting sandbox",
            Self::InstallingDependencies => "Installing dependencies",
            Self::Running => "Starting dev server",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

type SharedBoot = Shared<BoxFuture<'static, Result<SandboxHandle, SessionError>>>;

enum BootState {
    Uninitialized,
    Booting(SharedBoot),
    Ready(SandboxHandle),
    Failed(SessionError),
}

struct Inner {
    runtime: Arc<dyn SandboxRuntime>,
    config: SessionConfig,
    bus: EventBus,
    state: Mutex<BootState>,
    address: Mutex<Option<PreviewAddress>>,
    phase: watch::Sender<SessionPhase>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, BootState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn address(&self) -> MutexGuard<'_, Option<PreviewAddress>> {
        self.address.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the phase forward; never backwards, and never out of `Failed`.
    fn advance(&self, next: SessionPhase) {
        self.phase.send_if_modified(|phase| {
            if *phase == SessionPhase::Failed || next <= *phase {
                return false;
            }
            tracing::debug!(from = ?*phase, to = ?next, "Session phase changed");
            *phase = next;
            true
        });
    }

    fn handle_server_ready(&self, port: u16, host_or_url: &str) {
        let address = PreviewAddress::from_server_ready(port, host_or_url);
        tracing::info!(port, address = %address, "Preview address available");
        *self.address() = Some(address.clone());
        self.advance(SessionPhase::Ready);
        self.bus.dispatch(&Event::PreviewUrlChanged(address));
    }

    /// The stored permanent failure, if the session has one.
    fn failure(&self) -> Option<SessionError> {
        match &*self.state() {
            BootState::Failed(e) => Some(e.clone()),
            _ => None,
        }
    }

    /// Record a permanent failure and publish the `Failed` phase.
    fn fail(&self, state: &mut BootState, error: SessionError) {
        tracing::error!(error = %error, "Sandbox session failed permanently");
        *state = BootState::Failed(error);
        self.phase.send_replace(SessionPhase::Failed);
    }

    /// The dev server exited; permanent unless it had already listened.
    fn handle_dev_exit(&self, error: SessionError) {
        if self.address().is_some() {
            tracing::warn!(error = %error, "Dev server exited after listening");
            return;
        }
        let mut state = self.state();
        if !matches!(*state, BootState::Failed(_)) {
            self.fail(&mut state, error);
        }
    }

    /// The boot task died without reporting; allow the next call to retry.
    fn handle_boot_aborted(&self, error: &tokio::task::JoinError) -> SessionError {
        tracing::error!(error = %error, "Sandbox boot task aborted; next call will retry");
        let mut state = self.state();
        if matches!(*state, BootState::Booting(_)) {
            *state = BootState::Uninitialized;
            self.phase.send_replace(SessionPhase::Uninitialized);
        }
        SessionError::Boot(format!("boot task aborted: {error}"))
    }
}

/// Owner of the single sandbox session.
///
/// Cheap to clone; every clone refers to the same session. Construct one per
/// process and pass it to whatever needs the sandbox.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager with its own event bus.
    pub fn new(runtime: Arc<dyn SandboxRuntime>, config: SessionConfig) -> Self {
        Self::with_events(runtime, config, EventBus::new())
    }

    /// Create a manager that publishes on an existing event bus.
    pub fn with_events(
        runtime: Arc<dyn SandboxRuntime>,
        config: SessionConfig,
        bus: EventBus,
    ) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Uninitialized);
        Self {
            inner: Arc::new(Inner {
                runtime,
                config,
                bus,
                state: Mutex::new(BootState::Uninitialized),
                address: Mutex::new(None),
                phase,
            }),
        }
    }

    /// The event bus this manager publishes on.
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Whether the host can run a sandbox at all.
    pub fn is_supported(&self) -> bool {
        self.inner.runtime.is_supported()
    }

    /// Return the booted sandbox, booting it on first use.
    ///
    /// Concurrent callers share a single boot. A failed boot is reported to
    /// every waiter and a later call retries from scratch; a failed
    /// dependency install is permanent. The boot runs to completion even if
    /// every caller stops waiting.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn ensure_session(&self) -> Result<SandboxHandle, SessionError> {
        if !self.is_supported() {
            return Err(SessionError::Unavailable);
        }

        let boot = {
            let mut state = self.inner.state();
            match &*state {
                BootState::Ready(handle) => return Ok(handle.clone()),
                BootState::Failed(e) => return Err(e.clone()),
                BootState::Booting(boot) => boot.clone(),
                BootState::Uninitialized => {
                    let task = tokio::spawn(self.clone().run_boot());
                    let inner = Arc::clone(&self.inner);
                    let boot = async move {
                        task.await
                            .unwrap_or_else(|e| Err(inner.handle_boot_aborted(&e)))
                    }
                    .boxed()
                    .shared();
                    *state = BootState::Booting(boot.clone());
                    boot
                }
            }
        };

        boot.await
    }

    async fn run_boot(self) -> Result<SandboxHandle, SessionError> {
        let start = std::time::Instant::now();
        self.inner.advance(SessionPhase::Booting);
        tracing::info!("Starting sandbox session");

        let result = self.boot_sequence().await;

        let mut state = self.inner.state();
        match result {
            Ok(handle) => {
                // The dev server may already have exited.
                if let BootState::Failed(e) = &*state {
                    return Err(e.clone());
                }
                tracing::info!(
                    sandbox_id = %handle.id(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Sandbox session ready"
                );
                *state = BootState::Ready(handle.clone());
                Ok(handle)
            }
            Err(e) if e.is_permanent() => {
                self.inner.fail(&mut state, e.clone());
                Err(e)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Sandbox boot failed; next call will retry");
                self.inner.phase.send_replace(SessionPhase::Uninitialized);
                *state = BootState::Uninitialized;
                Err(e)
            }
        }
    }

    async fn boot_sequence(&self) -> Result<SandboxHandle, SessionError> {
        let sandbox = self
            .inner
            .runtime
            .boot()
            .await
            .map_err(|e| SessionError::Boot(e.to_string()))?;
        let handle = SandboxHandle::new(sandbox);
        tracing::debug!(sandbox_id = %handle.id(), "Sandbox booted, mounting template");

        handle
            .sandbox()
            .mount(&self.inner.config.initial_files)
            .await
            .map_err(|e| SessionError::Boot(e.to_string()))?;

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        handle
            .sandbox()
            .on_server_ready(Arc::new(move |port, host_or_url| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_server_ready(port, host_or_url);
                }
            }));

        self.install_dependencies(&handle).await?;
        self.start_dev_server(&handle).await?;
        Ok(handle)
    }

    async fn install_dependencies(&self, handle: &SandboxHandle) -> Result<(), SessionError> {
        let install = &self.inner.config.install_command;
        self.inner.advance(SessionPhase::InstallingDependencies);
        tracing::info!(sandbox_id = %handle.id(), command = %install, "Installing dependencies");

        let process = handle
            .sandbox()
            .spawn(&install.program, &install.arg_refs())
            .await
            .map_err(|e| SessionError::Install(e.to_string()))?;
        let code = process
            .wait()
            .await
            .map_err(|e| SessionError::Install(e.to_string()))?;

        if code != 0 {
            return Err(SessionError::Install(format!(
                "`{install}` exited with code {code}"
            )));
        }
        tracing::debug!(sandbox_id = %handle.id(), "Dependencies installed");
        Ok(())
    }

    async fn start_dev_server(&self, handle: &SandboxHandle) -> Result<(), SessionError> {
        let dev = &self.inner.config.dev_command;
        tracing::info!(sandbox_id = %handle.id(), command = %dev, "Starting dev server");

        let process = handle
            .sandbox()
            .spawn(&dev.program, &dev.arg_refs())
            .await
            .map_err(|e| SessionError::DevServer(e.to_string()))?;
        self.inner.advance(SessionPhase::Running);

        let sandbox_id = handle.id();
        let command = dev.to_string();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let reason = match process.wait().await {
                Ok(code) => format!("`{command}` exited with code {code}"),
                Err(e) => format!("`{command}` was lost: {e}"),
            };
            tracing::warn!(sandbox_id = %sandbox_id, reason = %reason, "Dev server stopped");
            if let Some(inner) = weak.upgrade() {
                inner.handle_dev_exit(SessionError::DevServer(reason));
            }
        });
        Ok(())
    }

    /// The most recent preview address, if the dev server has reported one.
    pub fn last_preview_address(&self) -> Option<PreviewAddress> {
        self.inner.address().clone()
    }

    /// Invoke `callback` on the next preview address only.
    pub fn on_preview_ready_once<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PreviewAddress) + Send + Sync + 'static,
    {
        self.inner
            .bus
            .subscribe_once(Topic::PreviewUrlChanged, preview_callback(callback))
    }

    /// Invoke `callback` on every preview address.
    pub fn on_preview_ready<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PreviewAddress) + Send + Sync + 'static,
    {
        self.inner
            .bus
            .subscribe(Topic::PreviewUrlChanged, preview_callback(callback))
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        *self.inner.phase.borrow()
    }

    /// Subscribe to lifecycle phase changes.
    pub fn phases(&self) -> watch::Receiver<SessionPhase> {
        self.inner.phase.subscribe()
    }

    /// Ensure the session and wait until the dev server is reachable.
    ///
    /// Fails if the session fails permanently first, including a dev server
    /// that exits before it ever listens.
    pub async fn wait_until_ready(&self) -> Result<PreviewAddress, SessionError> {
        self.ensure_session().await?;
        let mut phases = self.phases();
        loop {
            let phase = *phases.borrow_and_update();
            if let Some(address) = self.last_preview_address() {
                return Ok(address);
            }
            if phase == SessionPhase::Failed {
                return Err(self.inner.failure().unwrap_or_else(|| {
                    SessionError::DevServer("session failed".into())
                }));
            }
            if phases.changed().await.is_err() {
                return Err(SessionError::Boot("session dropped".into()));
            }
        }
    }

    /// Write a file into the sandbox, booting it if needed.
    ///
    /// On a host without sandbox support this is a no-op.
    pub async fn write_source(&self, path: &str, contents: &str) -> Result<(), SessionError> {
        let handle = match self.ensure_session().await {
            Ok(handle) => handle,
            Err(SessionError::Unavailable) => {
                tracing::debug!(path = %path, "Sandbox unavailable, skipping write");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        handle.write_file(path, contents).await
    }

    /// Write generated application source to the entry file.
    ///
    /// Markdown code fences around the source are stripped first.
    pub async fn update_application_entry(&self, source: &str) -> Result<(), SessionError> {
        let cleaned = strip_code_fences(source);
        self.write_source(&self.inner.config.entry_path, &cleaned)
            .await
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("phase", &self.phase())
            .field("address", &self.last_preview_address())
            .finish_non_exhaustive()
    }
}

fn preview_callback<F>(callback: F) -> impl Fn(&Event) + Send + Sync + 'static
where
    F: Fn(&PreviewAddress) + Send + Sync + 'static,
{
    move |event: &Event| {
        if let Event::PreviewUrlChanged(address) = event {
            callback(address);
        }
    }
}
