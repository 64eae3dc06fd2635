//! Background heartbeat task
//!
//! When a heartbeat URL is configured, a background task posts the configured
//! payload to it on a fixed interval so an external monitor can observe that
//! the process is alive. The task is best-effort: failures are logged and
//! never reach the request path. Shutdown is signalled through a cancellation
//! token.

use crate::config::GuardConfig;
use crate::error::{GuardError, Result};
use log::{debug, warn};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Periodic liveness ping to an external endpoint
pub struct Heartbeat {
    /// Target endpoint
    url: String,

    /// Payload posted on each beat
    payload: String,

    /// Time between beats
    interval: Duration,

    /// HTTP client reused across beats
    client: reqwest::Client,
}

impl Heartbeat {
    /// Build a heartbeat from configuration; `None` when no URL is set
    pub fn from_config(config: &GuardConfig) -> Option<Self> {
        let url = config.heartbeat_url.clone()?;
        Some(Self {
            url,
            payload: config.heartbeat_payload.clone(),
            interval: Duration::from_secs(config.heartbeat_interval_secs),
            client: reqwest::Client::new(),
        })
    }

    /// Run the heartbeat until the token is cancelled
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match self.beat().await {
                            Ok(()) => debug!("heartbeat delivered to {}", self.url),
                            Err(e) => warn!("heartbeat to {} failed: {}", self.url, e),
                        }
                    }
                }
            }
            debug!("heartbeat task stopped");
        })
    }

    /// Post one beat
    async fn beat(&self) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .body(self.payload.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GuardError::Heartbeat(format!(
                "endpoint answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}
