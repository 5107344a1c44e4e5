use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use api_types::ResourceKind;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::ReplicationController;
use k8s_openapi::api::core::v1::Service;
use kube::Api;
use kube::Resource;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::server::ApiServer;
use crate::app::core::Application;
use crate::app::services::CollectorService;
use crate::infrastructure::k8s::watch::KindTriggers;
use crate::infrastructure::k8s::watch::PodTriggers;
use crate::infrastructure::k8s::watch::ReplicaSetTriggers;
use crate::infrastructure::k8s::watch::ServiceTriggers;
use crate::infrastructure::k8s::watch::WatchHandler;
use crate::infrastructure::k8s::Watcher;
use crate::infrastructure::metrics;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start all background tasks
    pub fn spawn_all_tasks(&mut self, app: &Application) -> Result<()> {
        let services = app.services();
        let workers = usize::from(app.daemon_args().workers);

        for service in &services.collectors {
            let join_loop = self.spawn_join_loop_task(service);
            self.tasks.push(join_loop);
            let queue = self.spawn_queue_task(service, workers);
            self.tasks.push(queue);
        }

        // The pod index backs every resolver, so these run whatever is enabled
        let client = services.client.clone();
        let pods = Watcher::new(
            "pods",
            Api::<Pod>::all(client.clone()),
            PodTriggers::new(Arc::clone(&services.pod_index), Arc::clone(&services.router)),
        );
        self.tasks.push(self.spawn_watcher_task(pods));
        let replica_sets = Watcher::new(
            "replicasets",
            Api::<ReplicaSet>::all(client.clone()),
            ReplicaSetTriggers::new(Arc::clone(&services.pod_index), Arc::clone(&services.router)),
        );
        self.tasks.push(self.spawn_watcher_task(replica_sets));

        if services.is_enabled(ResourceKind::Namespace) {
            let namespaces = Watcher::new(
                "namespaces",
                Api::<Namespace>::all(client.clone()),
                KindTriggers::new(ResourceKind::Namespace, Arc::clone(&services.router)),
            );
            self.tasks.push(self.spawn_watcher_task(namespaces));
        }
        if services.is_enabled(ResourceKind::Deployment) {
            let deployments = Watcher::new(
                "deployments",
                Api::<Deployment>::all(client.clone()),
                KindTriggers::new(ResourceKind::Deployment, Arc::clone(&services.router)),
            );
            self.tasks.push(self.spawn_watcher_task(deployments));
        }
        if services.is_enabled(ResourceKind::ReplicationController) {
            let controllers = Watcher::new(
                "replicationcontrollers",
                Api::<ReplicationController>::all(client.clone()),
                KindTriggers::new(
                    ResourceKind::ReplicationController,
                    Arc::clone(&services.router),
                ),
            );
            self.tasks.push(self.spawn_watcher_task(controllers));
        }
        if services.is_enabled(ResourceKind::Service) {
            let services_watch = Watcher::new(
                "services",
                Api::<Service>::all(client),
                ServiceTriggers::new(Arc::clone(&services.router)),
            );
            self.tasks.push(self.spawn_watcher_task(services_watch));
        }

        let api_server_task = self.spawn_api_server_task(app);
        self.tasks.push(api_server_task);

        let metrics_task = self.spawn_metrics_task(app);
        self.tasks.push(metrics_task);

        Ok(())
    }

    /// wait for tasks to complete or receive shutdown signal
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl+C: {e}");
                    }
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                })
            }
        };

        tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                self.cancellation_token.cancel();
                self.wait_for_tasks_with_timeout(SHUTDOWN_TIMEOUT).await;
            }
            // Wait for any task to complete unexpectedly
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, _index, _remaining) = result;
                self.cancellation_token.cancel();
                if let Err(e) = result {
                    tracing::error!("Task completed with error: {e}");
                    return Err(e.into());
                }
                tracing::warn!("Task completed unexpectedly");
            }
        }

        Ok(())
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }

    fn spawn_join_loop_task(&self, service: &CollectorService) -> JoinHandle<()> {
        let collector = Arc::clone(&service.collector);
        let kind = service.kind;
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!(kind = %kind, "Starting subscriber join loop task");
            if let Err(e) = collector.start(token).await {
                tracing::error!(kind = %kind, "Subscriber join loop failed: {e:?}");
            } else {
                tracing::info!(kind = %kind, "Subscriber join loop completed");
            }
        })
    }

    fn spawn_queue_task(&self, service: &CollectorService, workers: usize) -> JoinHandle<()> {
        let collector = Arc::clone(&service.collector);
        let queue = Arc::clone(&service.queue);
        let kind = service.kind;
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!(kind = %kind, workers, "Starting reconcile workers");
            let handler_token = token.clone();
            queue
                .run(workers, token, |key| {
                    let collector = Arc::clone(&collector);
                    let token = handler_token.clone();
                    async move { collector.reconcile(&key, &token).await.map(|_| ()) }
                })
                .await;
            tracing::info!(kind = %kind, "Reconcile workers completed");
        })
    }

    fn spawn_watcher_task<K, H>(&self, watcher: Watcher<K, H>) -> JoinHandle<()>
    where
        K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
        H: WatchHandler<K> + 'static,
    {
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            if let Err(e) = watcher.run(token).await {
                tracing::error!("Kubernetes watcher failed: {e:?}");
            }
        })
    }

    fn spawn_api_server_task(&self, app: &Application) -> JoinHandle<()> {
        let cli = app.daemon_args();
        let api_server = ApiServer::new(
            Arc::clone(&app.services().hub),
            Arc::clone(&app.services().pod_index),
            cli.listen_addr,
            cli.base_path.clone(),
        );
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            if let Err(e) = api_server.run(token).await {
                tracing::error!("API server failed: {e:?}");
            } else {
                tracing::info!("API server completed");
            }
        })
    }

    fn spawn_metrics_task(&self, app: &Application) -> JoinHandle<()> {
        let collectors = app
            .services()
            .collectors
            .iter()
            .map(CollectorService::gauges)
            .collect();
        let hub = Arc::clone(&app.services().hub);
        let interval = Duration::from_secs(app.daemon_args().metrics_interval_secs);
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting metrics reporting task");
            metrics::run_metrics(collectors, hub, interval, token).await;
            tracing::info!("Metrics reporting task completed");
        })
    }
}
