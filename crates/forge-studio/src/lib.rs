//! # forge-studio
//!
//! Prompt-to-app orchestration for Forge.
//!
//! This crate connects the generation backend to the version layer in
//! `forge-core`: a prompt goes to the backend, and a successful response
//! becomes a new version that is written into the live sandbox.
//!
//! ## Quick Start
//!
//! ```ignore
//! use forge_core::SurfaceRegistry;
//! use forge_runtime::{LocalRuntime, LocalRuntimeConfig};
//! use forge_studio::{init_tracing, Studio, StudioConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! init_tracing("forge_core=info,forge_studio=info");
//!
//! let config = StudioConfig::from_env()?;
//! let runtime = Arc::new(LocalRuntime::new(LocalRuntimeConfig::default())?);
//! let studio = Studio::from_config(&config, runtime, SurfaceRegistry::new())?;
//!
//! match studio.submit("build a counter").await {
//!     Ok(submission) => println!("created {}", submission.version_id),
//!     Err(e) if e.is_retryable() => eprintln!("{} (retry available)", e.user_message()),
//!     Err(e) => eprintln!("{}", e.user_message()),
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod studio;
mod telemetry;

pub use client::{ComponentInfo, Generation, Generator, HealthStatus, HttpGenerator};
pub use config::{ConfigError, StudioConfig, DEFAULT_API_URL};
pub use error::{GenerateError, Result, StudioError};
pub use studio::{Studio, Submission};
pub use telemetry::init_tracing;
