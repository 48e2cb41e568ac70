//! Version snapshots.
//!
//! After a version's source reaches the sandbox, the [`SnapshotCapturer`]
//! waits for the dev server to reload, then captures the active preview
//! surface. Capture never fails from the caller's point of view: any problem
//! yields a deterministic placeholder image instead.

use crate::config::SnapshotConfig;
use crate::error::FrameError;
use crate::preview::{CaptureOptions, SurfaceRegistry};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::FutureExt;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Media type of captured frames.
pub const CAPTURE_MEDIA_TYPE: &str = "image/png";
/// Media type of placeholder images.
pub const PLACEHOLDER_MEDIA_TYPE: &str = "image/svg+xml";

/// Where a snapshot's pixels came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    /// Captured from a live preview surface.
    Captured,
    /// Generated placeholder.
    Placeholder,
}

/// An encoded preview image.
#[derive(Clone, PartialEq, Eq)]
pub struct Snapshot {
    media_type: &'static str,
    bytes: Arc<[u8]>,
    source: SnapshotSource,
}

impl Snapshot {
    /// Wrap PNG bytes captured from a preview surface.
    pub fn captured(bytes: Vec<u8>) -> Self {
        Self {
            media_type: CAPTURE_MEDIA_TYPE,
            bytes: bytes.into(),
            source: SnapshotSource::Captured,
        }
    }

    /// Render the placeholder shown when capture is impossible.
    ///
    /// The output depends only on the arguments.
    pub fn placeholder(label: &str, width: u32, height: u32) -> Self {
        let label = if label.trim().is_empty() {
            "App Preview"
        } else {
            label
        };
        let (cx, title_y, status_y) = (width / 2, height * 8 / 15, height * 3 / 5);
        let svg = format!(
            concat!(
                r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"##,
                r##"<rect width="{w}" height="{h}" fill="#f8fafc"/>"##,
                r##"<text x="{cx}" y="{ty}" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="#334155">{label}</text>"##,
                r##"<text x="{cx}" y="{sy}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="#64748b">Screenshot unavailable</text>"##,
                "</svg>"
            ),
            w = width,
            h = height,
            cx = cx,
            ty = title_y,
            sy = status_y,
            label = escape_xml(label),
        );
        Self {
            media_type: PLACEHOLDER_MEDIA_TYPE,
            bytes: svg.into_bytes().into(),
            source: SnapshotSource::Placeholder,
        }
    }

    /// Media type of the encoded image.
    pub fn media_type(&self) -> &str {
        self.media_type
    }

    /// Encoded image bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Where the image came from.
    pub fn source(&self) -> SnapshotSource {
        self.source
    }

    /// True if this is a generated placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.source == SnapshotSource::Placeholder
    }

    /// The image as a `data:` URL.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.media_type,
            STANDARD.encode(&self.bytes)
        )
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .field("source", &self.source)
            .finish()
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Snapshot", 3)?;
        state.serialize_field("media_type", self.media_type)?;
        state.serialize_field("source", &self.source)?;
        state.serialize_field("data_url", &self.data_url())?;
        state.end()
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Captures snapshots of the active preview surface.
#[derive(Debug, Clone)]
pub struct SnapshotCapturer {
    surfaces: SurfaceRegistry,
    config: SnapshotConfig,
}

impl SnapshotCapturer {
    /// Create a capturer over `surfaces`.
    pub fn new(surfaces: SurfaceRegistry, config: SnapshotConfig) -> Self {
        Self { surfaces, config }
    }

    /// The capture configuration.
    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Wait for the preview to settle, then capture it.
    ///
    /// `label` is rendered into the placeholder if capture fails.
    pub async fn capture(&self, label: &str) -> Snapshot {
        tokio::time::sleep(self.config.settle_delay).await;

        match self.try_capture().await {
            Ok(bytes) => {
                tracing::debug!(size = bytes.len(), "Captured preview snapshot");
                Snapshot::captured(bytes)
            }
            Err(e) => {
                tracing::warn!(error = %e, label = %label, "Snapshot capture failed, using placeholder");
                self.placeholder(label)
            }
        }
    }

    /// Placeholder sized to this capturer's configuration.
    pub fn placeholder(&self, label: &str) -> Snapshot {
        Snapshot::placeholder(label, self.config.width, self.config.height)
    }

    async fn try_capture(&self) -> Result<Vec<u8>, FrameError> {
        let frame = match self.surfaces.active() {
            Some(frame) => frame,
            None => {
                tracing::debug!(
                    grace_ms = self.config.grace_delay.as_millis() as u64,
                    "No preview surface showing yet, waiting"
                );
                tokio::time::sleep(self.config.grace_delay).await;
                self.surfaces.active().ok_or(FrameError::SurfaceNotFound)?
            }
        };

        let options = CaptureOptions {
            width: self.config.width,
            height: self.config.height,
            scale: self.config.scale,
            background: self.config.background.clone(),
        };
        let bytes = AssertUnwindSafe(frame.capture(&options))
            .catch_unwind()
            .await
            .map_err(|_| FrameError::Capture("capture panicked".into()))??;

        if bytes.is_empty() {
            return Err(FrameError::Capture("empty image".into()));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::preview::PreviewSurface;
    use crate::session::SessionManager;
    use crate::testing::{FakeFrame, FakeRuntime};
    use std::time::Duration;

    #[test]
    fn test_placeholder_is_deterministic() {
        let a = Snapshot::placeholder("App 1", 400, 300);
        let b = Snapshot::placeholder("App 1", 400, 300);
        assert_eq!(a, b);
        assert!(a.is_placeholder());
        assert_eq!(a.media_type(), "image/svg+xml");

        let svg = std::str::from_utf8(a.bytes()).unwrap();
        assert!(svg.contains(r#"width="400" height="300""#));
        assert!(svg.contains("App 1"));
        assert!(svg.contains("Screenshot unavailable"));
    }

    #[test]
    fn test_placeholder_escapes_label() {
        let snapshot = Snapshot::placeholder("<Counter & co>", 400, 300);
        let svg = std::str::from_utf8(snapshot.bytes()).unwrap();
        assert!(svg.contains("&lt;Counter &amp; co&gt;"));
    }

    #[test]
    fn test_data_url() {
        let snapshot = Snapshot::captured(vec![1, 2, 3]);
        assert_eq!(snapshot.data_url(), "data:image/png;base64,AQID");
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["source"], "captured");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_surface_falls_back_after_grace() {
        let capturer = SnapshotCapturer::new(SurfaceRegistry::new(), SnapshotConfig::default());
        let start = tokio::time::Instant::now();

        let snapshot = capturer.capture("App 1").await;

        assert!(snapshot.is_placeholder());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(11));
        assert!(elapsed < Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_captures_running_surface() {
        let runtime = Arc::new(FakeRuntime::new().with_ready_signal(5173, "localhost"));
        let session = SessionManager::new(runtime, SessionConfig::default());
        let registry = SurfaceRegistry::new();
        let frame = Arc::new(FakeFrame::new().with_capture(vec![0x89, b'P', b'N', b'G']));
        let surface = PreviewSurface::new(frame.clone(), registry.clone());
        surface.mount(&session).await;

        let capturer = SnapshotCapturer::new(registry, SnapshotConfig::default());
        let snapshot = capturer.capture("App 1").await;

        assert_eq!(snapshot.source(), SnapshotSource::Captured);
        assert_eq!(snapshot.bytes(), &[0x89, b'P', b'N', b'G']);
        let options = frame.capture_options().pop().unwrap();
        assert_eq!((options.width, options.height), (400, 300));
        assert_eq!(options.background, "#ffffff");
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_error_falls_back() {
        let runtime = Arc::new(FakeRuntime::new().with_ready_signal(5173, "localhost"));
        let session = SessionManager::new(runtime, SessionConfig::default());
        let registry = SurfaceRegistry::new();
        let surface = PreviewSurface::new(Arc::new(FakeFrame::new()), registry.clone());
        surface.mount(&session).await;

        let capturer = SnapshotCapturer::new(registry, SnapshotConfig::default());
        let snapshot = capturer.capture("App 2").await;

        assert_eq!(snapshot, Snapshot::placeholder("App 2", 400, 300));
    }
}
