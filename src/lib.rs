//! Rate-limiting HTTP ingress guard
//!
//! This crate provides a reverse proxy that fronts a single backend host and
//! permanently blacklists sources that exceed a per-minute request ceiling.

// Error types and result
pub mod error;
pub use error::{GuardError, Result};

// Configuration
pub mod config;
pub use config::GuardConfig;

// Admission control
pub mod admission;
pub use admission::AdmissionController;

// Backend forwarding
pub mod forward;
pub use forward::ForwardingGateway;

// Request dispatch
pub mod dispatch;
pub use dispatch::Dispatcher;

// Heartbeat task
pub mod heartbeat;
pub use heartbeat::Heartbeat;

// Server implementation
pub mod server;
pub use server::GuardServer;
