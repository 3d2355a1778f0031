use anyhow::Result;
use tracing::info;

use crate::app::tasks::Tasks;
use crate::controller::Controller;
use crate::lifecycle::Shutdown;

/// A fully assembled autoscaler, ready to run.
pub struct Application {
    controller: Controller,
    tasks: Tasks,
}

impl Application {
    /// `tasks` already holds the cache synchronization tasks started by the
    /// builder.
    pub fn new(controller: Controller, tasks: Tasks) -> Self {
        Self { controller, tasks }
    }

    pub fn shutdown(&self) -> Shutdown {
        self.tasks.shutdown().clone()
    }

    /// Runs the scan loop and the signal listener next to the cache tasks,
    /// returning once all of them have stopped.
    pub async fn run(self) -> Result<()> {
        let Self {
            controller,
            mut tasks,
        } = self;
        let shutdown = tasks.shutdown().clone();

        info!("Starting all application tasks...");
        let token = shutdown.token();
        tasks.push(
            "scan-loop",
            tokio::spawn(async move { controller.run(token).await }),
        );

        let listener = shutdown.clone();
        tasks.push(
            "signal-listener",
            tokio::spawn(async move {
                if let Err(e) = listener.listen_for_signals().await {
                    tracing::error!("Failed to listen for termination signals: {e}");
                }
            }),
        );

        let result = tasks.wait_for_completion().await;
        info!("Application run completed");
        result
    }
}
