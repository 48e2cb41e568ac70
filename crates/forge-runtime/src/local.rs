//! Local process runtime.
//!
//! Runs each sandbox as a process tree rooted in its own workspace directory
//! on the host. Mounting writes the tree to disk, processes are started with
//! `tokio::process`, and the server-ready signal is derived from the first
//! URL a process advertises on its output (e.g. Vite's `Local: http://...`).

use crate::error::{Result, RuntimeError};
use crate::file_tree::{resolve_in_root, FileTree};
use crate::sandbox::{Sandbox, SandboxProcess, SandboxRuntime, ServerReadyListener};
use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use uuid::Uuid;

/// Default pattern for a dev server announcing its address.
pub const DEFAULT_READY_PATTERN: &str = r"https?://[A-Za-z0-9.\-\[\]]+:(\d+)";

/// Configuration for [`LocalRuntime`].
#[derive(Debug, Clone)]
pub struct LocalRuntimeConfig {
    /// Directory under which each sandbox gets its own workspace.
    pub root: PathBuf,
    /// Regex matched against process output; capture group 1 is the port.
    pub ready_pattern: String,
}

impl Default for LocalRuntimeConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("forge"),
            ready_pattern: DEFAULT_READY_PATTERN.to_string(),
        }
    }
}

/// Runtime that boots sandboxes as local process trees.
#[derive(Debug, Clone)]
pub struct LocalRuntime {
    config: LocalRuntimeConfig,
    ready: Regex,
}

impl LocalRuntime {
    /// Create a runtime, compiling the ready pattern.
    pub fn new(config: LocalRuntimeConfig) -> Result<Self> {
        let ready = Regex::new(&config.ready_pattern)
            .map_err(|e| RuntimeError::Config(format!("invalid ready pattern: {e}")))?;
        Ok(Self { config, ready })
    }

    /// Get the runtime configuration.
    pub fn config(&self) -> &LocalRuntimeConfig {
        &self.config
    }
}

#[async_trait]
impl SandboxRuntime for LocalRuntime {
    async fn boot(&self) -> Result<Arc<dyn Sandbox>> {
        let id = Uuid::new_v4();
        let root = self.config.root.join(id.to_string());
        tracing::info!(sandbox_id = %id, root = %root.display(), "Booting local sandbox");

        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            tracing::error!(sandbox_id = %id, error = %e, "Failed to create sandbox workspace");
            RuntimeError::Boot(format!("failed to create workspace {}: {e}", root.display()))
        })?;

        Ok(Arc::new(LocalSandbox {
            id,
            root,
            ready: self.ready.clone(),
            listeners: Arc::new(Mutex::new(Vec::new())),
        }))
    }
}

type Listeners = Arc<Mutex<Vec<ServerReadyListener>>>;

/// A sandbox backed by a host directory.
struct LocalSandbox {
    id: Uuid,
    root: PathBuf,
    ready: Regex,
    listeners: Listeners,
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn mount(&self, tree: &FileTree) -> Result<()> {
        tracing::debug!(sandbox_id = %self.id, files = tree.len(), "Mounting file tree");
        tree.write_to(&self.root)
            .await
            .map_err(|e| RuntimeError::Mount(e.to_string()))
    }

    async fn spawn(&self, command: &str, args: &[&str]) -> Result<SandboxProcess> {
        let line = std::iter::once(command)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        tracing::debug!(sandbox_id = %self.id, command = %line, "Spawning process");

        let mut child = Command::new(command)
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RuntimeError::Spawn {
                command: line.clone(),
                reason: e.to_string(),
            })?;

        let announcer = Arc::new(ReadyAnnouncer::new(
            self.ready.clone(),
            Arc::clone(&self.listeners),
            line.clone(),
        ));
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(scan_output(stdout, Arc::clone(&announcer)));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(scan_output(stderr, announcer));
        }

        Ok(SandboxProcess::new(line, async move {
            let status = child.wait().await?;
            Ok(status.code().unwrap_or(-1))
        }))
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        let target = resolve_in_root(&self.root, path)?;
        tracing::debug!(
            sandbox_id = %self.id,
            path = %path,
            content_len = contents.len(),
            "Writing file"
        );
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, contents).await?;
        Ok(())
    }

    fn on_server_ready(&self, listener: ServerReadyListener) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(listener);
        }
    }
}

/// Server-ready detection shared by both output streams of one process.
///
/// Fires whenever the advertised URL differs from the last one announced,
/// so a dev server restarting on a new port is reported again.
struct ReadyAnnouncer {
    ready: Regex,
    listeners: Listeners,
    command: String,
    last: Mutex<Option<String>>,
}

impl ReadyAnnouncer {
    fn new(ready: Regex, listeners: Listeners, command: String) -> Self {
        Self {
            ready,
            listeners,
            command,
            last: Mutex::new(None),
        }
    }

    /// Inspect one output line; returns true if listeners were notified.
    fn observe(&self, line: &str) -> bool {
        let Some((port, url)) = detect_server_ready(&self.ready, line) else {
            return false;
        };
        {
            let Ok(mut last) = self.last.lock() else {
                return false;
            };
            if last.as_deref() == Some(url.as_str()) {
                return false;
            }
            *last = Some(url.clone());
        }

        tracing::info!(command = %self.command, port, url = %url, "Dev server is listening");
        let snapshot: Vec<ServerReadyListener> = match self.listeners.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => return false,
        };
        for listener in snapshot {
            listener(port, &url);
        }
        true
    }
}

/// Read process output line by line, announcing advertised addresses.
async fn scan_output<R>(stream: R, announcer: Arc<ReadyAnnouncer>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(command = %announcer.command, error = %e, "Output stream closed with error");
                break;
            }
        };
        tracing::trace!(command = %announcer.command, line = %line, "process output");
        announcer.observe(&line);
    }
}

/// Extract `(port, url)` from a line of process output.
pub fn detect_server_ready(ready: &Regex, line: &str) -> Option<(u16, String)> {
    let clean = strip_ansi(line);
    let captures = ready.captures(&clean)?;
    let port = captures.get(1)?.as_str().parse().ok()?;
    let url = captures.get(0)?.as_str().trim_end_matches('/').to_string();
    Some((port, url))
}

fn strip_ansi(line: &str) -> std::borrow::Cow<'_, str> {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let ansi =
        ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid ANSI escape regex"));
    ansi.replace_all(line, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready() -> Regex {
        Regex::new(DEFAULT_READY_PATTERN).unwrap()
    }

    #[test]
    fn test_detect_vite_banner() {
        let line = "  \u{1b}[32m➜\u{1b}[39m  \u{1b}[1mLocal\u{1b}[22m:   \u{1b}[36mhttp://localhost:\u{1b}[1m5173\u{1b}[22m/\u{1b}[39m";
        let (port, url) = detect_server_ready(&ready(), line).unwrap();
        assert_eq!(port, 5173);
        assert_eq!(url, "http://localhost:5173");
    }

    #[test]
    fn test_detect_ignores_plain_output() {
        assert!(detect_server_ready(&ready(), "added 212 packages in 4s").is_none());
        assert!(detect_server_ready(&ready(), "see https://docs.npmjs.com for help").is_none());
    }

    #[test]
    fn test_announcer_reports_each_new_address_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listeners: Listeners = {
            let seen = Arc::clone(&seen);
            Arc::new(Mutex::new(vec![Arc::new(move |port: u16, url: &str| {
                seen.lock().unwrap().push((port, url.to_string()));
            }) as ServerReadyListener]))
        };
        let announcer = ReadyAnnouncer::new(ready(), listeners, "npm run dev".into());

        assert!(announcer.observe("  Local:   http://localhost:5173/"));
        assert!(!announcer.observe("  Local:   http://localhost:5173/"));
        assert!(!announcer.observe("hmr update /src/App.tsx"));
        assert!(announcer.observe("  Local:   http://localhost:5174/"));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (5173, "http://localhost:5173".to_string()),
                (5174, "http://localhost:5174".to_string()),
            ]
        );
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let config = LocalRuntimeConfig {
            ready_pattern: "(".into(),
            ..Default::default()
        };
        assert!(matches!(
            LocalRuntime::new(config),
            Err(RuntimeError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_boot_mount_and_write() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalRuntime::new(LocalRuntimeConfig {
            root: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();

        let sandbox = runtime.boot().await.unwrap();
        sandbox
            .mount(&FileTree::new().with_file("src/App.tsx", "old"))
            .await
            .unwrap();
        sandbox.write_file("/src/App.tsx", "new\n").await.unwrap();

        let mut workspaces = std::fs::read_dir(dir.path()).unwrap();
        let workspace = workspaces.next().unwrap().unwrap().path();
        let contents = std::fs::read_to_string(workspace.join("src/App.tsx")).unwrap();
        assert_eq!(contents, "new\n");
    }

    #[tokio::test]
    async fn test_write_outside_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalRuntime::new(LocalRuntimeConfig {
            root: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        let sandbox = runtime.boot().await.unwrap();

        let err = sandbox.write_file("../escape.txt", "x").await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidPath(_)));
    }
}
