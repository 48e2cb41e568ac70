//! Prompt-to-version orchestration.
//!
//! A [`Studio`] takes a user prompt, asks a [`Generator`] for application
//! source and records the result as a new version. A version is only created
//! for a successful generation. Prompts that fail with a retryable error are
//! kept so the caller can offer a retry.

use crate::client::{Generator, HttpGenerator};
use crate::config::StudioConfig;
use crate::error::{Result, StudioError};
use forge_core::{
    SessionManager, SnapshotCapturer, SurfaceRegistry, Version, VersionId, VersionStore,
};
use forge_runtime::SandboxRuntime;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// The new version.
    pub version_id: VersionId,
    /// Components the generated source uses.
    pub used_components: Vec<String>,
    /// Backend status message.
    pub message: String,
}

/// Front door for turning prompts into live versions.
#[derive(Clone)]
pub struct Studio {
    generator: Arc<dyn Generator>,
    store: VersionStore,
    pending_retry: Arc<Mutex<Option<String>>>,
}

impl Studio {
    /// Create a studio over an existing generator and store.
    pub fn new(generator: Arc<dyn Generator>, store: VersionStore) -> Self {
        Self {
            generator,
            store,
            pending_retry: Arc::new(Mutex::new(None)),
        }
    }

    /// Wire a studio from configuration: HTTP generator, session, snapshot
    /// capturer and version store.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_config(
        config: &StudioConfig,
        runtime: Arc<dyn SandboxRuntime>,
        surfaces: SurfaceRegistry,
    ) -> Result<Self> {
        config.validate()?;
        tracing::info!(api_url = %config.api_url, entry_path = %config.entry_path, "Creating studio");

        let generator = HttpGenerator::new(config.clone())?;
        let session = SessionManager::new(runtime, config.session_config());
        let capturer = SnapshotCapturer::new(surfaces, config.snapshot_config());
        let store = VersionStore::new(session, capturer);
        Ok(Self::new(Arc::new(generator), store))
    }

    /// The version store.
    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// The sandbox session.
    pub fn session(&self) -> &SessionManager {
        self.store.session()
    }

    fn pending(&self) -> MutexGuard<'_, Option<String>> {
        self.pending_retry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Generate an app for `prompt` and make it the current version.
    pub async fn submit(&self, prompt: &str) -> Result<Submission> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(StudioError::EmptyPrompt);
        }

        match self.generator.generate(prompt).await {
            Ok(generation) => {
                self.pending().take();
                let version_id = self.store.create_version(&generation.code, prompt, None);
                tracing::info!(
                    version_id = %version_id,
                    components = ?generation.used_components,
                    "Prompt produced a new version"
                );
                Ok(Submission {
                    version_id,
                    used_components: generation.used_components,
                    message: generation.message,
                })
            }
            Err(e) => {
                let err = StudioError::from(e);
                if err.is_retryable() {
                    *self.pending() = Some(prompt.to_string());
                }
                tracing::warn!(error = %err, retryable = err.is_retryable(), "Generation failed");
                Err(err)
            }
        }
    }

    /// Resubmit the last prompt that failed with a retryable error.
    pub async fn retry(&self) -> Result<Submission> {
        let prompt = self.pending().take().ok_or(StudioError::NothingToRetry)?;
        tracing::info!("Retrying last prompt");
        self.submit(&prompt).await
    }

    /// The prompt waiting for a retry, if any.
    pub fn pending_retry(&self) -> Option<String> {
        self.pending().clone()
    }

    /// Make an existing version current.
    pub async fn switch_to(&self, id: VersionId) -> Result<()> {
        if self.store.switch_to(id).await? {
            Ok(())
        } else {
            Err(StudioError::UnknownVersion(id))
        }
    }

    /// Delete a version. Returns false for an unknown id.
    pub fn remove(&self, id: VersionId) -> bool {
        self.store.remove(id)
    }

    /// All versions, most recent first.
    pub fn versions(&self) -> Vec<Version> {
        self.store.list_versions()
    }

    /// ID of the current version.
    pub fn current_id(&self) -> Option<VersionId> {
        self.store.current_id()
    }
}

impl std::fmt::Debug for Studio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Studio")
            .field("store", &self.store)
            .field("pending_retry", &self.pending_retry())
            .finish_non_exhaustive()
    }
}
