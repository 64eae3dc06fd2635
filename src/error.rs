//! Error types for the ingress guard
//!
//! This module provides error types for the ingress guard server.

use std::io;
use thiserror::Error;

/// Result type for the guard
pub type Result<T> = std::result::Result<T, GuardError>;

/// Error type for the guard
#[derive(Debug, Error)]
pub enum GuardError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server error
    #[error("Server error: {0}")]
    Server(String),

    /// Forwarding error talking to the backend
    #[error("Forwarding error: {0}")]
    Forward(String),

    /// Backend did not answer within the configured write timeout
    #[error("Backend request timed out")]
    ForwardTimeout,

    /// Heartbeat transport error
    #[error("Heartbeat error: {0}")]
    Http(#[from] reqwest::Error),

    /// Heartbeat endpoint answered with a non-success status
    #[error("Heartbeat rejected: {0}")]
    Heartbeat(String),
}
