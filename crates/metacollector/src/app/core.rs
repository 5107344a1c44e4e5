use anyhow::Result;

use crate::app::services::ApplicationServices;
use crate::app::tasks::Tasks;
use crate::config::DaemonArgs;

/// Application core structure with explicit dependencies
pub struct Application {
    services: ApplicationServices,
    daemon_args: DaemonArgs,
}

impl Application {
    pub fn new(services: ApplicationServices, daemon_args: DaemonArgs) -> Self {
        Self {
            services,
            daemon_args,
        }
    }

    pub fn services(&self) -> &ApplicationServices {
        &self.services
    }

    pub fn daemon_args(&self) -> &DaemonArgs {
        &self.daemon_args
    }

    /// Run application, start all tasks and wait for completion
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let mut tasks = Tasks::new();

        if let Err(e) = tasks.spawn_all_tasks(self) {
            tracing::error!("Failed to spawn application tasks: {}", e);
            return Err(e);
        }

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {}", e);
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down application...");

        for service in &self.services.collectors {
            let events = service.collector.metrics().snapshot();
            tracing::info!(
                kind = %service.kind,
                tracked = service.collector.cache().len(),
                added = events.added,
                modified = events.modified,
                deleted = events.deleted,
                "Collector stopped"
            );
        }
        let stats = self.services.hub.hub_stats();
        tracing::info!(
            subscribers = stats.subscribers,
            dropped_not_connected = stats.dropped_not_connected,
            dropped_queue_full = stats.dropped_queue_full,
            "Subscriber hub stopped"
        );

        tracing::info!("Application shutdown completed");
        Ok(())
    }
}
