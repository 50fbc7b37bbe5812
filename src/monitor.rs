use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Checking,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionStatus::Checking => "সংযোগ যাচাই হচ্ছে / Checking",
            ConnectionStatus::Connected => "অনলাইন / Connected",
            ConnectionStatus::Disconnected => "অফলাইন / Disconnected",
        }
    }
}

/// Run one health probe bounded by `timeout`. Expiry counts as unreachable.
pub async fn probe(backend: &dyn Backend, timeout: Duration) -> Result<(), BackendError> {
    match tokio::time::timeout(timeout, backend.health()).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Unreachable(format!(
            "health check timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub probe_timeout: Duration,
    pub interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        MonitorSettings {
            probe_timeout: Duration::from_secs(5),
            interval: Duration::from_secs(30),
        }
    }
}

/// Periodic liveness prober. Status changes are handed to `on_status`;
/// the monitor never touches any other state.
pub struct ConnectionMonitor;

impl ConnectionMonitor {
    /// Probe immediately, then every `settings.interval` until stopped.
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(
        backend: Arc<dyn Backend>,
        settings: MonitorSettings,
        cancel: CancellationToken,
        on_status: F,
    ) -> MonitorHandle
    where
        F: Fn(ConnectionStatus) + Send + 'static,
    {
        let token = cancel.clone();
        // `interval_at` panics on a zero period
        let period = settings.interval.max(MIN_INTERVAL);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let outcome = tokio::select! {
                    _ = token.cancelled() => break,
                    outcome = probe(backend.as_ref(), settings.probe_timeout) => outcome,
                };
                if token.is_cancelled() {
                    break;
                }

                let status = match outcome {
                    Ok(()) => ConnectionStatus::Connected,
                    Err(e) => {
                        tracing::debug!("Health probe failed: {}", e);
                        ConnectionStatus::Disconnected
                    }
                };
                on_status(status);

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
            }
            tracing::debug!("Connection monitor stopped");
        });

        MonitorHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Cancellation handle for a running monitor. Dropping it stops the monitor.
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    #[cfg(test)]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop and wait for the background task to exit.
    #[cfg(test)]
    pub async fn join(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
