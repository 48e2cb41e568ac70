//! Sandbox capability traits.
//!
//! A [`SandboxRuntime`] boots sandboxes; a [`Sandbox`] is one booted process
//! tree that can mount files, run processes, accept file writes and report
//! when its dev server starts listening.

use crate::error::Result;
use crate::file_tree::FileTree;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Callback invoked with `(port, host_or_url)` whenever the sandbox reports
/// that a server is accepting connections.
pub type ServerReadyListener = Arc<dyn Fn(u16, &str) + Send + Sync>;

/// Boots sandboxes on a particular host.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Whether this host can run sandboxes at all.
    ///
    /// Hosts that return `false` are treated as "sandbox unavailable" by
    /// callers rather than as a failure.
    fn is_supported(&self) -> bool {
        true
    }

    /// Boot a fresh sandbox.
    async fn boot(&self) -> Result<Arc<dyn Sandbox>>;
}

/// One booted sandbox.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Mount a file tree at the sandbox root.
    async fn mount(&self, tree: &FileTree) -> Result<()>;

    /// Start a process inside the sandbox.
    async fn spawn(&self, command: &str, args: &[&str]) -> Result<SandboxProcess>;

    /// Write a file inside the sandbox filesystem.
    async fn write_file(&self, path: &str, contents: &str) -> Result<()>;

    /// Register a listener for the sandbox's own server-ready signal.
    fn on_server_ready(&self, listener: ServerReadyListener);
}

/// Handle to a process started with [`Sandbox::spawn`].
pub struct SandboxProcess {
    command: String,
    exit: BoxFuture<'static, Result<i32>>,
}

impl SandboxProcess {
    /// Wrap a future that resolves to the process exit code.
    pub fn new<F>(command: impl Into<String>, exit: F) -> Self
    where
        F: Future<Output = Result<i32>> + Send + 'static,
    {
        Self {
            command: command.into(),
            exit: Box::pin(exit),
        }
    }

    /// The command line this process was started with.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Wait for the process to exit and return its exit code.
    pub async fn wait(self) -> Result<i32> {
        self.exit.await
    }
}

impl fmt::Debug for SandboxProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxProcess")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}
