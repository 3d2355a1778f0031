//! Process-wide stop signal.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Owns the one cancellation token every long-running task observes.
///
/// Triggering is idempotent: the first call cancels the token, later calls
/// only report that shutdown is already underway.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    triggered: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle for a task to select on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Broadcasts the stop signal. Returns true only for the call that
    /// actually performed the broadcast.
    pub fn trigger(&self, reason: &str) -> bool {
        if self.triggered.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!(reason, "Shutdown triggered");
        self.token.cancel();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits for SIGTERM or SIGINT, then triggers shutdown. Returns early
    /// without triggering if shutdown happens for another reason.
    pub async fn listen_for_signals(self) -> Result<()> {
        let received = tokio::select! {
            _ = self.token.cancelled() => return Ok(()),
            signal = wait_for_signal() => signal?,
        };
        self.trigger(received);
        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str> {
    use tokio::signal::unix::signal;
    use tokio::signal::unix::SignalKind;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    info!("Received {name}, initiating graceful shutdown");
    Ok(name)
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, initiating graceful shutdown");
    Ok("ctrl-c")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn trigger_is_idempotent() {
        let shutdown = Shutdown::new();
        let token = shutdown.token();
        assert!(!token.is_cancelled());

        assert!(shutdown.trigger("test"));
        assert!(token.is_cancelled());
        assert!(!shutdown.trigger("again"));
        assert!(shutdown.clone().is_triggered());
    }

    #[tokio::test]
    async fn every_observer_sees_the_signal() {
        let shutdown = Shutdown::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let token = shutdown.token();
                tokio::spawn(async move { token.cancelled().await })
            })
            .collect();

        shutdown.trigger("test");
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("observer should exit promptly")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn signal_listener_exits_on_external_shutdown() {
        let shutdown = Shutdown::new();
        let listener = tokio::spawn(shutdown.clone().listen_for_signals());
        shutdown.trigger("test");
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener should exit")
            .unwrap()
            .unwrap();
    }
}
