//! Admission control for inbound requests
//!
//! This module decides whether a source IP may reach the backend. It tracks
//! per-IP request counts in absolute one-minute windows and permanently
//! blacklists, for the lifetime of the process, any source that exceeds the
//! configured ceiling within a single window.

/// Admission decisions over shared rate and blacklist state
pub mod controller;

// Re-export important types
pub use controller::AdmissionController;
