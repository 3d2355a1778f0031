use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use futures::future::select_all;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::AbortHandle;
use tokio::task::JoinError;
use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;

/// Join bound when no task needs longer to wind down
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

type NamedTask = BoxFuture<'static, (&'static str, Result<(), JoinError>)>;

/// Owned background tasks that share one stop signal.
pub struct Tasks {
    tasks: Vec<NamedTask>,
    abort_handles: Vec<(&'static str, AbortHandle)>,
    shutdown: Shutdown,
    shutdown_timeout: Duration,
}

impl Tasks {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            tasks: Vec::new(),
            abort_handles: Vec::new(),
            shutdown,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// How long the remaining tasks get to finish once shutdown starts.
    /// Must cover the longest in-flight scaling action.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn push(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.abort_handles.push((name, handle.abort_handle()));
        self.tasks
            .push(async move { (name, handle.await) }.boxed());
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits until any task exits, then stops and joins the rest.
    ///
    /// Every task is expected to run until the stop signal fires, so the
    /// first exit is either the signal listener or an unexpected stop that
    /// shuts the process down.
    pub async fn wait_for_completion(self) -> Result<()> {
        let Self {
            tasks,
            abort_handles,
            shutdown,
            shutdown_timeout,
        } = self;
        if tasks.is_empty() {
            return Ok(());
        }

        let ((name, result), _index, remaining) = select_all(tasks).await;
        let mut failed = match result {
            Ok(()) if shutdown.is_triggered() => {
                tracing::info!("Task {name} completed after shutdown signal");
                false
            }
            Ok(()) => {
                tracing::warn!("Task {name} completed unexpectedly");
                false
            }
            Err(e) => {
                tracing::error!("Task {name} failed: {e}");
                true
            }
        };
        shutdown.trigger(name);

        match tokio::time::timeout(shutdown_timeout, join_all(remaining)).await {
            Ok(results) => {
                for (name, result) in results {
                    if let Err(e) = result {
                        tracing::error!("Task {name} failed during shutdown: {e}");
                        failed = true;
                    }
                }
            }
            Err(_) => {
                for (name, handle) in abort_handles.iter().filter(|(_, h)| !h.is_finished()) {
                    tracing::warn!(
                        "Task {name} still running after {shutdown_timeout:?}, aborting"
                    );
                    handle.abort();
                }
                failed = true;
            }
        }

        if failed {
            anyhow::bail!("one or more tasks failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn one_task_exit_stops_the_rest() {
        let shutdown = Shutdown::new();
        let mut tasks = Tasks::new(shutdown.clone());

        let token = shutdown.token();
        tasks.push(
            "waiter",
            tokio::spawn(async move { token.cancelled().await }),
        );
        tasks.push("quitter", tokio::spawn(async {}));

        tasks.wait_for_completion().await.unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn panicking_task_is_reported() {
        let shutdown = Shutdown::new();
        let mut tasks = Tasks::new(shutdown.clone());
        tasks.push("broken", tokio::spawn(async { panic!("boom") }));

        assert!(tasks.wait_for_completion().await.is_err());
        assert!(shutdown.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_work_finishes_within_the_timeout() {
        let shutdown = Shutdown::new();
        let mut tasks =
            Tasks::new(shutdown.clone()).with_shutdown_timeout(Duration::from_secs(150));

        let finished = Arc::new(AtomicBool::new(false));
        let done = finished.clone();
        tasks.push(
            "drain",
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(90)).await;
                done.store(true, Ordering::SeqCst);
            }),
        );
        tasks.push("quitter", tokio::spawn(async {}));

        tasks.wait_for_completion().await.unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn stragglers_are_aborted_after_the_timeout() {
        let shutdown = Shutdown::new();
        let mut tasks =
            Tasks::new(shutdown.clone()).with_shutdown_timeout(Duration::from_secs(5));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tasks.push(
            "stuck",
            tokio::spawn(async move {
                let _tx = tx;
                std::future::pending::<()>().await;
            }),
        );
        tasks.push("quitter", tokio::spawn(async {}));

        assert!(tasks.wait_for_completion().await.is_err());
        // the sender is dropped once the aborted task is torn down
        assert!(rx.await.is_err());
    }
}
