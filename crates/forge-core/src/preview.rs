//! Preview surfaces.
//!
//! A [`PreviewSurface`] is one place the running sandbox is shown. It drives
//! a host-provided [`PreviewFrame`] (an embedded page, a webview, a headless
//! browser tab): navigating it to the preview address, pushing the host
//! theme into it, and capturing its pixels for snapshots.

use crate::error::{FrameError, SessionError};
use crate::events::Subscription;
use crate::session::{PreviewAddress, SessionManager};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Colour theme of the sandboxed page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Light theme
    Light,
    /// Dark theme
    Dark,
}

/// Host theme setting, possibly deferring to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThemePreference {
    /// Always light
    Light,
    /// Always dark
    Dark,
    /// Follow the platform's dark-mode setting
    #[default]
    System,
}

impl ThemePreference {
    /// Resolve to a concrete theme given whether the platform is in dark mode.
    pub fn resolve(self, platform_dark: bool) -> Theme {
        match self {
            Self::Light => Theme::Light,
            Self::Dark => Theme::Dark,
            Self::System if platform_dark => Theme::Dark,
            Self::System => Theme::Light,
        }
    }
}

impl std::str::FromStr for ThemePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            "system" => Ok(Self::System),
            other => Err(format!("unknown theme preference: {other}")),
        }
    }
}

/// Message posted into the sandboxed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FrameMessage {
    /// `{"type":"THEME","theme":"light"|"dark"}`
    #[serde(rename = "THEME")]
    Theme {
        /// Theme to apply
        theme: Theme,
    },
}

/// Pixel capture parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    /// Width in CSS pixels
    pub width: u32,
    /// Height in CSS pixels
    pub height: u32,
    /// Scale factor
    pub scale: f32,
    /// Background colour for transparent regions
    pub background: String,
}

/// Host-side display of the sandboxed page.
#[async_trait]
pub trait PreviewFrame: Send + Sync {
    /// Load `address` in the frame.
    fn navigate(&self, address: &PreviewAddress);

    /// Post a message to the page inside the frame.
    fn post_message(&self, message: &FrameMessage) -> Result<(), FrameError>;

    /// Capture the frame's current pixels as an encoded image.
    async fn capture(&self, options: &CaptureOptions) -> Result<Vec<u8>, FrameError>;
}

/// Display status of a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceStatus {
    /// Waiting for the sandbox.
    Starting,
    /// Showing the sandbox.
    Running,
    /// Session acquisition failed.
    Error(String),
}

impl fmt::Display for SurfaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => f.write_str("Starting…"),
            Self::Running => f.write_str("Running"),
            Self::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

struct SurfaceState {
    status: SurfaceStatus,
    address: Option<PreviewAddress>,
    preference: ThemePreference,
    platform_dark: bool,
    mounted: bool,
}

struct SurfaceShared {
    id: u64,
    frame: Arc<dyn PreviewFrame>,
    state: Mutex<SurfaceState>,
}

impl SurfaceShared {
    fn state(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn show(&self, address: &PreviewAddress) {
        {
            let mut state = self.state();
            if !state.mounted {
                return;
            }
            state.address = Some(address.clone());
            state.status = SurfaceStatus::Running;
        }
        tracing::debug!(surface = self.id, address = %address, "Navigating preview");
        self.frame.navigate(address);
        self.send_theme();
    }

    fn theme(&self) -> Theme {
        let state = self.state();
        state.preference.resolve(state.platform_dark)
    }

    fn send_theme(&self) {
        let message = FrameMessage::Theme {
            theme: self.theme(),
        };
        if let Err(e) = self.frame.post_message(&message) {
            tracing::debug!(surface = self.id, error = %e, "Theme message not delivered");
        }
    }

    fn is_running(&self) -> bool {
        let state = self.state();
        state.mounted && state.status == SurfaceStatus::Running
    }
}

/// Registry of mounted surfaces, used to find the one to capture.
#[derive(Clone, Default)]
pub struct SurfaceRegistry {
    surfaces: Arc<Mutex<Vec<Weak<SurfaceShared>>>>,
}

impl SurfaceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn surfaces(&self) -> MutexGuard<'_, Vec<Weak<SurfaceShared>>> {
        self.surfaces.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, surface: &Arc<SurfaceShared>) {
        let mut surfaces = self.surfaces();
        surfaces.retain(|s| s.strong_count() > 0);
        surfaces.push(Arc::downgrade(surface));
    }

    fn deregister(&self, id: u64) {
        self.surfaces()
            .retain(|s| s.upgrade().is_some_and(|s| s.id != id));
    }

    /// Frame of the most recently mounted surface that is showing the sandbox.
    pub fn active(&self) -> Option<Arc<dyn PreviewFrame>> {
        let candidates: Vec<Arc<SurfaceShared>> =
            self.surfaces().iter().rev().filter_map(Weak::upgrade).collect();
        candidates
            .into_iter()
            .find(|s| s.is_running())
            .map(|s| Arc::clone(&s.frame))
    }

    /// Number of mounted surfaces.
    pub fn len(&self) -> usize {
        self.surfaces().iter().filter(|s| s.strong_count() > 0).count()
    }

    /// True if no surface is mounted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SurfaceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceRegistry")
            .field("mounted", &self.len())
            .finish()
    }
}

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// One view of the running sandbox.
///
/// Any number of surfaces may be mounted at once; all of them are
/// navigated to the same preview address.
pub struct PreviewSurface {
    shared: Arc<SurfaceShared>,
    registry: SurfaceRegistry,
    subscription: Mutex<Option<Subscription>>,
}

impl PreviewSurface {
    /// Create an unmounted surface around `frame`.
    pub fn new(frame: Arc<dyn PreviewFrame>, registry: SurfaceRegistry) -> Self {
        Self {
            shared: Arc::new(SurfaceShared {
                id: NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed),
                frame,
                state: Mutex::new(SurfaceState {
                    status: SurfaceStatus::Starting,
                    address: None,
                    preference: ThemePreference::default(),
                    platform_dark: false,
                    mounted: false,
                }),
            }),
            registry,
            subscription: Mutex::new(None),
        }
    }

    /// Set the initial theme inputs.
    pub fn with_theme(self, preference: ThemePreference, platform_dark: bool) -> Self {
        {
            let mut state = self.shared.state();
            state.preference = preference;
            state.platform_dark = platform_dark;
        }
        self
    }

    /// Attach to the session and start showing the sandbox.
    ///
    /// Boots the session if needed. If the session cannot be acquired the
    /// surface moves to [`SurfaceStatus::Error`] and stays there.
    pub async fn mount(&self, session: &SessionManager) {
        {
            let mut state = self.shared.state();
            if state.mounted || state.status != SurfaceStatus::Starting {
                tracing::debug!(surface = self.shared.id, "Surface already mounted");
                return;
            }
            state.mounted = true;
        }
        self.registry.register(&self.shared);
        tracing::debug!(surface = self.shared.id, "Mounting preview surface");

        if let Err(e) = session.ensure_session().await {
            self.fail(&e);
            return;
        }

        let weak = Arc::downgrade(&self.shared);
        let subscription = session.on_preview_ready_once(move |address| {
            if let Some(shared) = weak.upgrade() {
                shared.show(address);
            }
        });
        {
            // `mounted` only flips to false while the slot lock is held.
            let mut slot = self.subscriptions();
            if !self.is_mounted() {
                drop(slot);
                subscription.unsubscribe();
                return;
            }
            *slot = Some(subscription);
        }

        if let Some(address) = session.last_preview_address() {
            self.shared.show(&address);
        }
    }

    fn fail(&self, error: &SessionError) {
        tracing::warn!(surface = self.shared.id, error = %error, "Preview surface failed");
        self.shared.state().status = SurfaceStatus::Error(error.to_string());
    }

    fn subscriptions(&self) -> MutexGuard<'_, Option<Subscription>> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Detach from the session. Safe to call more than once.
    pub fn unmount(&self) {
        let subscription = {
            let mut slot = self.subscriptions();
            let was_mounted = std::mem::replace(&mut self.shared.state().mounted, false);
            if was_mounted {
                tracing::debug!(surface = self.shared.id, "Unmounting preview surface");
            }
            slot.take()
        };
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        self.registry.deregister(self.shared.id);
    }

    /// Whether the surface is currently mounted.
    pub fn is_mounted(&self) -> bool {
        self.shared.state().mounted
    }

    /// Current status.
    pub fn status(&self) -> SurfaceStatus {
        self.shared.state().status.clone()
    }

    /// Address currently shown, if any.
    pub fn address(&self) -> Option<PreviewAddress> {
        self.shared.state().address.clone()
    }

    /// Theme the page should be showing.
    pub fn theme(&self) -> Theme {
        self.shared.theme()
    }

    /// Change the host theme preference.
    pub fn set_preference(&self, preference: ThemePreference) {
        self.update_theme(|state| state.preference = preference);
    }

    /// Report a change in the platform's dark-mode setting.
    pub fn set_platform_dark(&self, platform_dark: bool) {
        self.update_theme(|state| state.platform_dark = platform_dark);
    }

    fn update_theme(&self, apply: impl FnOnce(&mut SurfaceState)) {
        let changed = {
            let mut state = self.shared.state();
            let before = state.preference.resolve(state.platform_dark);
            apply(&mut state);
            let after = state.preference.resolve(state.platform_dark);
            before != after && state.mounted && state.address.is_some()
        };
        if changed {
            self.shared.send_theme();
        }
    }
}

impl Drop for PreviewSurface {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl fmt::Debug for PreviewSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state();
        f.debug_struct("PreviewSurface")
            .field("id", &self.shared.id)
            .field("status", &state.status)
            .field("address", &state.address)
            .field("mounted", &state.mounted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::events::Topic;
    use crate::testing::{FakeFrame, FakeRuntime};
    use std::time::Duration;

    fn session(runtime: &Arc<FakeRuntime>) -> SessionManager {
        SessionManager::new(runtime.clone(), SessionConfig::default())
    }

    #[test]
    fn test_theme_message_shape() {
        let message = FrameMessage::Theme { theme: Theme::Dark };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            serde_json::json!({ "type": "THEME", "theme": "dark" })
        );
    }

    #[test]
    fn test_preference_resolution() {
        assert_eq!(ThemePreference::System.resolve(true), Theme::Dark);
        assert_eq!(ThemePreference::System.resolve(false), Theme::Light);
        assert_eq!(ThemePreference::Light.resolve(true), Theme::Light);
        assert_eq!("Dark".parse::<ThemePreference>().unwrap(), ThemePreference::Dark);
        assert!("blue".parse::<ThemePreference>().is_err());
    }

    #[test]
    fn test_status_text() {
        assert_eq!(SurfaceStatus::Starting.to_string(), "Starting…");
        assert_eq!(SurfaceStatus::Running.to_string(), "Running");
        assert_eq!(
            SurfaceStatus::Error("boot failed".into()).to_string(),
            "Error: boot failed"
        );
    }

    #[tokio::test]
    async fn test_mount_then_ready_navigates() {
        let runtime = Arc::new(FakeRuntime::new());
        let session = session(&runtime);
        let frame = Arc::new(FakeFrame::new());
        let surface = PreviewSurface::new(frame.clone(), SurfaceRegistry::new())
            .with_theme(ThemePreference::Dark, false);

        surface.mount(&session).await;
        assert_eq!(surface.status(), SurfaceStatus::Starting);

        runtime.last_sandbox().unwrap().emit_server_ready(5173, "localhost");

        assert_eq!(surface.status(), SurfaceStatus::Running);
        assert_eq!(frame.navigations(), vec!["http://localhost:5173"]);
        assert_eq!(
            frame.messages(),
            vec![FrameMessage::Theme { theme: Theme::Dark }]
        );
    }

    #[tokio::test]
    async fn test_mount_after_ready_uses_last_address() {
        let runtime = Arc::new(FakeRuntime::new().with_ready_signal(5173, "localhost"));
        let session = session(&runtime);
        session.wait_until_ready().await.unwrap();

        let frame = Arc::new(FakeFrame::new());
        let surface = PreviewSurface::new(frame.clone(), SurfaceRegistry::new());
        surface.mount(&session).await;

        assert_eq!(surface.status(), SurfaceStatus::Running);
        assert_eq!(
            surface.address().unwrap().as_str(),
            "http://localhost:5173"
        );
        assert_eq!(frame.navigations().len(), 1);
    }

    #[tokio::test]
    async fn test_mount_error_status() {
        let runtime = Arc::new(FakeRuntime::new().with_install_exit_code(2));
        let session = session(&runtime);
        let surface = PreviewSurface::new(Arc::new(FakeFrame::new()), SurfaceRegistry::new());

        surface.mount(&session).await;
        assert!(matches!(surface.status(), SurfaceStatus::Error(_)));
        assert!(surface.status().to_string().starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_unmount_stops_updates() {
        let runtime = Arc::new(FakeRuntime::new());
        let session = session(&runtime);
        let frame = Arc::new(FakeFrame::new());
        let registry = SurfaceRegistry::new();
        let surface = PreviewSurface::new(frame.clone(), registry.clone());

        surface.mount(&session).await;
        assert_eq!(registry.len(), 1);
        surface.unmount();
        surface.unmount();
        assert!(registry.is_empty());

        runtime.last_sandbox().unwrap().emit_server_ready(5173, "localhost");
        assert!(frame.navigations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_during_boot_leaves_no_listener() {
        let runtime = Arc::new(FakeRuntime::new().with_boot_delay(Duration::from_millis(50)));
        let session = session(&runtime);
        let registry = SurfaceRegistry::new();
        let surface = Arc::new(PreviewSurface::new(
            Arc::new(FakeFrame::new()),
            registry.clone(),
        ));

        let mounting = {
            let surface = Arc::clone(&surface);
            let session = session.clone();
            tokio::spawn(async move { surface.mount(&session).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        surface.unmount();
        mounting.await.unwrap();

        assert!(!surface.is_mounted());
        assert!(registry.is_empty());
        assert_eq!(
            session.events().listener_count(Topic::PreviewUrlChanged),
            0
        );
    }

    #[tokio::test]
    async fn test_theme_change_is_resent() {
        let runtime = Arc::new(FakeRuntime::new().with_ready_signal(5173, "localhost"));
        let session = session(&runtime);
        let frame = Arc::new(FakeFrame::new());
        let surface = PreviewSurface::new(frame.clone(), SurfaceRegistry::new())
            .with_theme(ThemePreference::System, false);
        surface.mount(&session).await;

        surface.set_platform_dark(true);
        surface.set_platform_dark(true);
        surface.set_preference(ThemePreference::Dark);

        assert_eq!(
            frame.messages(),
            vec![
                FrameMessage::Theme { theme: Theme::Light },
                FrameMessage::Theme { theme: Theme::Dark },
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_theme_delivery_is_ignored() {
        let runtime = Arc::new(FakeRuntime::new().with_ready_signal(5173, "localhost"));
        let session = session(&runtime);
        let frame = Arc::new(FakeFrame::new().failing_messages());
        let surface = PreviewSurface::new(frame.clone(), SurfaceRegistry::new());

        surface.mount(&session).await;
        assert_eq!(surface.status(), SurfaceStatus::Running);
        assert!(frame.messages().is_empty());
    }

    #[tokio::test]
    async fn test_registry_prefers_running_surface() {
        let runtime = Arc::new(FakeRuntime::new().with_ready_signal(5173, "localhost"));
        let session = session(&runtime);
        let registry = SurfaceRegistry::new();
        assert!(registry.active().is_none());

        let running = PreviewSurface::new(Arc::new(FakeFrame::new()), registry.clone());
        running.mount(&session).await;
        assert!(registry.active().is_some());
        drop(running);
        assert!(registry.active().is_none());
    }
}
