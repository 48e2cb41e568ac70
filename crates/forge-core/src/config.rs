//! Session and snapshot configuration types.

use crate::error::CoreError;
use crate::template;
use forge_runtime::FileTree;
use std::fmt;
use std::time::Duration;

/// Sandbox path of the application entry file.
pub const DEFAULT_ENTRY_PATH: &str = "/src/App.tsx";

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create a command from a program and its arguments.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a whitespace-separated command line.
    ///
    /// Returns `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts))
    }

    /// Arguments as string slices, for [`forge_runtime::Sandbox::spawn`].
    pub fn arg_refs(&self) -> Vec<&str> {
        self.args.iter().map(String::as_str).collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Configuration for a [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sandbox path that application source is written to.
    pub entry_path: String,
    /// Dependency install command (default: `npm install`).
    pub install_command: CommandSpec,
    /// Dev server command (default: `npm run dev`).
    pub dev_command: CommandSpec,
    /// Files mounted into the sandbox right after boot.
    pub initial_files: FileTree,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            entry_path: DEFAULT_ENTRY_PATH.to_string(),
            install_command: CommandSpec::new("npm", ["install"]),
            dev_command: CommandSpec::new("npm", ["run", "dev"]),
            initial_files: template::default_project(),
        }
    }
}

impl SessionConfig {
    /// Create a new config builder.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.entry_path.trim_start_matches('/').is_empty() {
            return Err(CoreError::Config("entry_path is required".into()));
        }
        if self.install_command.program.is_empty() {
            return Err(CoreError::Config("install_command is required".into()));
        }
        if self.dev_command.program.is_empty() {
            return Err(CoreError::Config("dev_command is required".into()));
        }
        Ok(())
    }
}

/// Builder for SessionConfig.
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Set the entry file path.
    pub fn entry_path(mut self, path: impl Into<String>) -> Self {
        self.config.entry_path = path.into();
        self
    }

    /// Set the dependency install command.
    pub fn install_command(mut self, command: CommandSpec) -> Self {
        self.config.install_command = command;
        self
    }

    /// Set the dev server command.
    pub fn dev_command(mut self, command: CommandSpec) -> Self {
        self.config.dev_command = command;
        self
    }

    /// Set the files mounted on boot.
    pub fn initial_files(mut self, files: FileTree) -> Self {
        self.config.initial_files = files;
        self
    }

    /// Build the configuration, validating all required fields.
    pub fn build(self) -> Result<SessionConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration for snapshot capture.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotConfig {
    /// Wait after the sandbox write before capturing (default: 6s).
    pub settle_delay: Duration,
    /// Extra wait when no preview surface is showing yet (default: 5s).
    pub grace_delay: Duration,
    /// Capture width in pixels (default: 400).
    pub width: u32,
    /// Capture height in pixels (default: 300).
    pub height: u32,
    /// Scale factor applied to the capture (default: 0.7).
    pub scale: f32,
    /// Background colour behind transparent regions (default: `#ffffff`).
    pub background: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(6),
            grace_delay: Duration::from_secs(5),
            width: 400,
            height: 300,
            scale: 0.7,
            background: "#ffffff".to_string(),
        }
    }
}

impl SnapshotConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.width == 0 || self.height == 0 {
            return Err(CoreError::Config(
                "snapshot width and height must be > 0".into(),
            ));
        }
        if !(self.scale > 0.0 && self.scale <= 4.0) {
            return Err(CoreError::Config(
                "snapshot scale must be in (0, 4]".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.entry_path, "/src/App.tsx");
        assert_eq!(config.install_command.to_string(), "npm install");
        assert_eq!(config.dev_command.to_string(), "npm run dev");
        assert!(config.initial_files.get("src/App.tsx").is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_empty_entry() {
        let result = SessionConfig::builder().entry_path("/").build();
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn test_builder_success() {
        let config = SessionConfig::builder()
            .entry_path("/src/Main.tsx")
            .install_command(CommandSpec::new("pnpm", ["install"]))
            .dev_command(CommandSpec::parse("pnpm dev --host").unwrap())
            .build()
            .expect("should build successfully");

        assert_eq!(config.entry_path, "/src/Main.tsx");
        assert_eq!(config.dev_command.program, "pnpm");
        assert_eq!(config.dev_command.arg_refs(), vec!["dev", "--host"]);
    }

    #[test]
    fn test_parse_blank_command() {
        assert!(CommandSpec::parse("   ").is_none());
    }

    #[test]
    fn test_snapshot_defaults() {
        let config = SnapshotConfig::default();
        assert_eq!(config.settle_delay, Duration::from_secs(6));
        assert_eq!(config.grace_delay, Duration::from_secs(5));
        assert_eq!((config.width, config.height), (400, 300));
        assert!(config.validate().is_ok());

        let bad = SnapshotConfig {
            scale: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
