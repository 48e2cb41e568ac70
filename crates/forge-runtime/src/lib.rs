//! # forge-runtime
//!
//! Sandbox capability layer for Forge.
//!
//! The rest of the workspace treats a sandbox as an opaque capability that
//! can mount a file tree, run processes, accept file writes and announce
//! when its dev server is reachable. This crate defines that capability
//! ([`SandboxRuntime`], [`Sandbox`]) and ships one host implementation,
//! [`LocalRuntime`], which runs the sandbox as a local process tree.
//!
//! ## Quick Start
//!
//! ```no_run
//! use forge_runtime::{FileTree, LocalRuntime, LocalRuntimeConfig, SandboxRuntime};
//! use std::sync::Arc;
//!
//! # async fn example() -> forge_runtime::Result<()> {
//! let runtime = LocalRuntime::new(LocalRuntimeConfig::default())?;
//! let sandbox = runtime.boot().await?;
//!
//! sandbox.on_server_ready(Arc::new(|port, url| {
//!     println!("dev server on {url} (port {port})");
//! }));
//!
//! sandbox
//!     .mount(&FileTree::new().with_file("package.json", "{}"))
//!     .await?;
//! let install = sandbox.spawn("npm", &["install"]).await?;
//! assert_eq!(install.wait().await?, 0);
//! sandbox.spawn("npm", &["run", "dev"]).await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod file_tree;
mod local;
mod sandbox;

pub use error::{Result, RuntimeError};
pub use file_tree::{resolve_in_root, FileNode, FileTree};
pub use local::{detect_server_ready, LocalRuntime, LocalRuntimeConfig, DEFAULT_READY_PATTERN};
pub use sandbox::{Sandbox, SandboxProcess, SandboxRuntime, ServerReadyListener};
