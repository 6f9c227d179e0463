//! This module defines all error types used throughout the application.

use std::io;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    /// IO errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors, including missing diagram elements
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing configuration
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    /// Persistence store errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// An event reached a state that has no response for it
    #[error("Invalid action '{action}' for state {state} of the {provider} machine")]
    InvalidTransition {
        provider: String,
        state: String,
        action: String,
    },

    /// Unknown provider tag
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create an invalid transition error
    pub fn invalid_transition(
        provider: impl ToString,
        state: impl ToString,
        action: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            provider: provider.to_string(),
            state: state.to_string(),
            action: action.into(),
        }
    }
}
