//! # forge-core
//!
//! Sandbox session and version management for Forge.
//!
//! Generated application source flows through this crate on its way to the
//! running sandbox. It boots one shared sandbox, streams each generated
//! revision into it, keeps every revision as an addressable version, fans
//! lifecycle events out to any number of preview surfaces, and captures a
//! snapshot of each version with a deterministic fallback image.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       forge-core                         │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐  writes  ┌───────────────────────┐  │
//! │  │  VersionStore   │─────────▶│    SessionManager     │  │
//! │  │ - create()      │          │ - ensure_session()    │  │
//! │  │ - switch_to()   │          │ - write_source()      │  │
//! │  │ - remove()      │          └───────────┬───────────┘  │
//! │  └────────┬────────┘                      │ server-ready │
//! │           │ capture                       ▼              │
//! │  ┌────────▼────────┐          ┌───────────────────────┐  │
//! │  │SnapshotCapturer │          │       EventBus        │  │
//! │  └────────┬────────┘          └───────────┬───────────┘  │
//! │           │ active()                      │ preview url  │
//! │  ┌────────▼────────┐          ┌───────────▼───────────┐  │
//! │  │ SurfaceRegistry │◀─────────│    PreviewSurface     │  │
//! │  └─────────────────┘ register └───────────────────────┘  │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │              forge-runtime (SandboxRuntime)              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use forge_core::{
//!     PreviewSurface, SessionConfig, SessionManager, SnapshotCapturer, SnapshotConfig,
//!     SurfaceRegistry, VersionStore,
//! };
//! use forge_runtime::{LocalRuntime, LocalRuntimeConfig};
//! use std::sync::Arc;
//!
//! # async fn example(frame: Arc<dyn forge_core::PreviewFrame>) -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = Arc::new(LocalRuntime::new(LocalRuntimeConfig::default())?);
//! let session = SessionManager::new(runtime, SessionConfig::default());
//! let surfaces = SurfaceRegistry::new();
//!
//! let surface = PreviewSurface::new(frame, surfaces.clone());
//! surface.mount(&session).await;
//!
//! let store = VersionStore::new(
//!     session.clone(),
//!     SnapshotCapturer::new(surfaces, SnapshotConfig::default()),
//! );
//! let id = store.create_version("```jsx\nexport default () => <p>hi</p>;\n```", "say hi", None);
//! assert_eq!(store.current_id(), Some(id));
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod events;
mod fence;
mod preview;
mod session;
mod snapshot;
mod template;
mod versions;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{
    CommandSpec, SessionConfig, SessionConfigBuilder, SnapshotConfig, DEFAULT_ENTRY_PATH,
};
pub use error::{CoreError, FrameError, Result, SessionError};
pub use events::{Callback, Event, EventBus, Subscription, Topic};
pub use fence::strip_code_fences;
pub use preview::{
    CaptureOptions, FrameMessage, PreviewFrame, PreviewSurface, SurfaceRegistry, SurfaceStatus,
    Theme, ThemePreference,
};
pub use session::{PreviewAddress, SandboxHandle, SandboxId, SessionManager, SessionPhase};
pub use snapshot::{
    Snapshot, SnapshotCapturer, SnapshotSource, CAPTURE_MEDIA_TYPE, PLACEHOLDER_MEDIA_TYPE,
};
pub use template::default_project;
pub use versions::{Version, VersionId, VersionStore};
