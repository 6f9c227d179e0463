//! Auth State Visualizer
//!
//! Client-side coordination of sign-in flows as explicit state machines.
//!
//! This library provides functionality for:
//! - Driving one state machine per auth provider (email link or password, Facebook, Google, GitHub)
//! - Persisting machine states so flows survive a reload or a redirect
//! - Relaying the identity backend's auth-state notifications to the machines
//! - Highlighting the current state and last transition on a per-provider diagram

pub mod backend;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod diagram;
pub mod error;
pub mod fsm;
pub mod log_sink;
pub mod store;

pub use config::Config;
pub use coordinator::Coordinator;
pub use error::{Error, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging with the given log level
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
