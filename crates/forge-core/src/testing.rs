//! In-memory fakes for tests.
//!
//! [`FakeRuntime`] boots [`FakeSandbox`]es that record every mount, write and
//! spawn, and emit server-ready only when told to. [`FakeFrame`] records
//! navigation and messages and returns a configured capture result.

use crate::error::FrameError;
use crate::preview::{CaptureOptions, FrameMessage, PreviewFrame};
use crate::session::PreviewAddress;
use async_trait::async_trait;
use forge_runtime::{
    FileTree, Result, RuntimeError, Sandbox, SandboxProcess, SandboxRuntime, ServerReadyListener,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sandbox runtime that never leaves the process.
#[derive(Debug)]
pub struct FakeRuntime {
    supported: bool,
    boot_delay: Duration,
    failing_boots: AtomicUsize,
    panicking_boots: AtomicUsize,
    install_exit_code: i32,
    dev_exit_code: Option<i32>,
    ready_signal: Option<(u16, String)>,
    boots: AtomicUsize,
    sandboxes: Mutex<Vec<Arc<FakeSandbox>>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    /// A supported runtime whose boots and installs succeed.
    pub fn new() -> Self {
        Self {
            supported: true,
            boot_delay: Duration::ZERO,
            failing_boots: AtomicUsize::new(0),
            panicking_boots: AtomicUsize::new(0),
            install_exit_code: 0,
            dev_exit_code: None,
            ready_signal: None,
            boots: AtomicUsize::new(0),
            sandboxes: Mutex::new(Vec::new()),
        }
    }

    /// A runtime reporting that the host cannot run sandboxes.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Sleep this long inside every boot.
    pub fn with_boot_delay(mut self, delay: Duration) -> Self {
        self.boot_delay = delay;
        self
    }

    /// Fail the first `count` boots.
    pub fn fail_boots(self, count: usize) -> Self {
        self.failing_boots.store(count, Ordering::SeqCst);
        self
    }

    /// Panic inside the first `count` boots.
    pub fn panic_boots(self, count: usize) -> Self {
        self.panicking_boots.store(count, Ordering::SeqCst);
        self
    }

    /// Exit code of the dependency install.
    pub fn with_install_exit_code(mut self, code: i32) -> Self {
        self.install_exit_code = code;
        self
    }

    /// Make the dev server exit immediately with `code`, without listening.
    pub fn with_dev_exit_code(mut self, code: i32) -> Self {
        self.dev_exit_code = Some(code);
        self
    }

    /// Emit server-ready as soon as a dev server is spawned.
    pub fn with_ready_signal(mut self, port: u16, host_or_url: &str) -> Self {
        self.ready_signal = Some((port, host_or_url.to_string()));
        self
    }

    /// Number of boot attempts.
    pub fn boot_count(&self) -> usize {
        self.boots.load(Ordering::SeqCst)
    }

    /// The most recently booted sandbox.
    pub fn last_sandbox(&self) -> Option<Arc<FakeSandbox>> {
        self.sandboxes.lock().ok()?.last().cloned()
    }
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn boot(&self) -> Result<Arc<dyn Sandbox>> {
        self.boots.fetch_add(1, Ordering::SeqCst);
        if !self.boot_delay.is_zero() {
            tokio::time::sleep(self.boot_delay).await;
        }

        let panic = self
            .panicking_boots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if panic {
            panic!("injected boot panic");
        }

        let fail = self
            .failing_boots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(RuntimeError::Boot("injected boot failure".into()));
        }

        let sandbox = Arc::new(FakeSandbox {
            install_exit_code: self.install_exit_code,
            dev_exit_code: self.dev_exit_code,
            ready_signal: self.ready_signal.clone(),
            ..FakeSandbox::default()
        });
        if let Ok(mut sandboxes) = self.sandboxes.lock() {
            sandboxes.push(Arc::clone(&sandbox));
        }
        Ok(sandbox)
    }
}

/// Sandbox that keeps its filesystem in memory.
#[derive(Default)]
pub struct FakeSandbox {
    install_exit_code: i32,
    dev_exit_code: Option<i32>,
    ready_signal: Option<(u16, String)>,
    files: Mutex<BTreeMap<String, String>>,
    writes: Mutex<Vec<(String, String)>>,
    spawned: Mutex<Vec<String>>,
    listeners: Mutex<Vec<ServerReadyListener>>,
}

impl FakeSandbox {
    /// Fire server-ready on every registered listener.
    pub fn emit_server_ready(&self, port: u16, host_or_url: &str) {
        let listeners = self
            .listeners
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default();
        for listener in listeners {
            listener(port, host_or_url);
        }
    }

    /// Current contents of a file.
    pub fn file(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .ok()?
            .get(path.trim_start_matches('/'))
            .cloned()
    }

    /// Every `write_file` call, in order, as `(path, contents)`.
    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Every spawned command line, in order.
    pub fn spawned(&self) -> Vec<String> {
        self.spawned.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl std::fmt::Debug for FakeSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeSandbox")
            .field("spawned", &self.spawned())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    async fn mount(&self, tree: &FileTree) -> Result<()> {
        if let Ok(mut files) = self.files.lock() {
            for (path, contents) in tree.files() {
                files.insert(path, contents.to_string());
            }
        }
        Ok(())
    }

    async fn spawn(&self, command: &str, args: &[&str]) -> Result<SandboxProcess> {
        let line = std::iter::once(command)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        if let Ok(mut spawned) = self.spawned.lock() {
            spawned.push(line.clone());
        }

        if args.contains(&"install") {
            let code = self.install_exit_code;
            return Ok(SandboxProcess::new(line, async move { Ok(code) }));
        }

        if let Some(code) = self.dev_exit_code {
            return Ok(SandboxProcess::new(line, async move { Ok(code) }));
        }
        if let Some((port, host)) = &self.ready_signal {
            self.emit_server_ready(*port, host);
        }
        Ok(SandboxProcess::new(line, futures::future::pending()))
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        if let Ok(mut writes) = self.writes.lock() {
            writes.push((path.to_string(), contents.to_string()));
        }
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.trim_start_matches('/').to_string(), contents.to_string());
        }
        Ok(())
    }

    fn on_server_ready(&self, listener: ServerReadyListener) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(listener);
        }
    }
}

/// Preview frame that records what it is asked to do.
#[derive(Debug, Default)]
pub struct FakeFrame {
    capture_result: Option<Vec<u8>>,
    fail_messages: bool,
    navigations: Mutex<Vec<String>>,
    messages: Mutex<Vec<FrameMessage>>,
    capture_options: Mutex<Vec<CaptureOptions>>,
}

impl FakeFrame {
    /// A frame whose captures fail.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `bytes` from every capture.
    pub fn with_capture(mut self, bytes: Vec<u8>) -> Self {
        self.capture_result = Some(bytes);
        self
    }

    /// Reject every posted message.
    pub fn failing_messages(mut self) -> Self {
        self.fail_messages = true;
        self
    }

    /// Addresses navigated to, in order.
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().map(|n| n.clone()).unwrap_or_default()
    }

    /// Messages delivered, in order.
    pub fn messages(&self) -> Vec<FrameMessage> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Options of every capture attempt.
    pub fn capture_options(&self) -> Vec<CaptureOptions> {
        self.capture_options
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PreviewFrame for FakeFrame {
    fn navigate(&self, address: &PreviewAddress) {
        if let Ok(mut navigations) = self.navigations.lock() {
            navigations.push(address.to_string());
        }
    }

    fn post_message(&self, message: &FrameMessage) -> std::result::Result<(), FrameError> {
        if self.fail_messages {
            return Err(FrameError::Message("frame not loaded".into()));
        }
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.clone());
        }
        Ok(())
    }

    async fn capture(&self, options: &CaptureOptions) -> std::result::Result<Vec<u8>, FrameError> {
        if let Ok(mut captures) = self.capture_options.lock() {
            captures.push(options.clone());
        }
        self.capture_result
            .clone()
            .ok_or_else(|| FrameError::Capture("capture unsupported by fake frame".into()))
    }
}
