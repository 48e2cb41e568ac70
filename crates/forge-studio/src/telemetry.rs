//! Tracing subscriber setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a stderr `fmt` subscriber filtered by `RUST_LOG`, with
/// `default_directive` (e.g. `forge_core=info`) added on top.
///
/// Returns false if a global subscriber was already installed; the existing
/// one is left in place.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter = match default_directive.parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(e) => {
            eprintln!("ignoring invalid log directive {default_directive:?}: {e}");
            EnvFilter::from_default_env()
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}
