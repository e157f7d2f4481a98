//! Structured logging shared by every xrd-core component.
//!
//! Components never configure `tracing` themselves; they emit events through
//! the ordinary `tracing` macros and leave subscriber setup to the process
//! entry point, which calls [`install`].

pub mod log;

pub use log::{Log, LogLevel};

/// Installs a global `tracing` subscriber that writes newline-delimited JSON
/// [`Log`] records to stderr, filtered by `RUST_LOG` (falling back to `info`).
///
/// Safe to call more than once; only the first call takes effect.
pub fn install() {
    static INSTALL: std::sync::Once = std::sync::Once::new();

    INSTALL.call_once(|| {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("no global subscriber has been installed yet");
    });
}
