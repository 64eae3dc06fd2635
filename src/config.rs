//! Configuration for the ingress guard
//!
//! The guard reads a single JSON file at startup. Environment references of
//! the form `$VAR` or `${VAR}` in the raw file text are expanded before the
//! JSON is parsed, so deployment-specific values (ports, backend hosts,
//! heartbeat endpoints) can live in the process environment. Unset variables
//! expand to the empty string and `$$` yields a literal `$`.

use crate::error::{GuardError, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

/// Guard configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Address the guard listens on
    pub listen_addr: SocketAddr,

    /// Origin (scheme + host) of the single backend, e.g. `http://10.0.0.5:9000`.
    /// Deliberately kept as a string and parsed per request so a bad value
    /// surfaces as a client error instead of taking the listener down.
    pub backend: String,

    /// Requests allowed per source IP per 60-second window before the source
    /// is blacklisted for the rest of the run
    pub frequency: u32,

    /// Maximum bytes of request head the listener will buffer
    pub max_header_bytes: usize,

    /// Seconds allowed for reading a request head
    pub read_timeout_secs: u64,

    /// Seconds allowed for the backend round trip
    pub write_timeout_secs: u64,

    /// Endpoint to notify that the process is alive; heartbeat is disabled
    /// when absent
    pub heartbeat_url: Option<String>,

    /// Payload sent with each heartbeat
    pub heartbeat_payload: String,

    /// Seconds between heartbeats
    pub heartbeat_interval_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".parse().unwrap(),
            backend: "http://127.0.0.1:9000".to_string(),
            frequency: 180,
            max_header_bytes: 8192,
            read_timeout_secs: 3,
            write_timeout_secs: 3,
            heartbeat_url: None,
            heartbeat_payload: String::new(),
            heartbeat_interval_secs: 60,
        }
    }
}

impl GuardConfig {
    /// Load configuration from a JSON file, expanding environment references
    /// in the raw text before parsing
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        let expanded = expand_env(&raw);
        let config: Self = serde_json::from_str(&expanded)
            .map_err(|e| GuardError::Config(format!("failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.frequency == 0 {
            return Err(GuardError::Config(
                "frequency must be at least 1 request per window".to_string(),
            ));
        }
        if self.read_timeout_secs == 0 || self.write_timeout_secs == 0 {
            return Err(GuardError::Config(
                "read and write timeouts must be non-zero".to_string(),
            ));
        }
        if self.heartbeat_url.is_some() && self.heartbeat_interval_secs == 0 {
            return Err(GuardError::Config(
                "heartbeat_interval_secs must be non-zero when heartbeat_url is set".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a configuration for testing
    pub fn for_testing() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            frequency: 3,
            ..Default::default()
        }
    }
}

/// Expand `$VAR` and `${VAR}` references against the process environment.
///
/// Unset variables expand to the empty string; `$$` produces a literal `$`.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    name.push(c);
                }
                out.push_str(&env::var(&name).unwrap_or_default());
            }
            Some(c) if c.is_ascii_alphanumeric() || *c == '_' => {
                let mut name = String::new();
                while let Some(c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&env::var(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }
    out
}
