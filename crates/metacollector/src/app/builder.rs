use std::sync::Arc;

use anyhow::Result;
use node_stream::SubscriberHub;

use crate::app::core::Application;
use crate::app::services::ApplicationServices;
use crate::app::services::CollectorService;
use crate::config::DaemonArgs;
use crate::core::Dispatcher;
use crate::core::PodNodeResolver;
use crate::core::WorkQueue;
use crate::core::Collector;
use crate::infrastructure::k8s::KubeObjectSource;
use crate::infrastructure::k8s::PodIndex;
use crate::infrastructure::k8s::TriggerRouter;
use crate::infrastructure::kube_client::init_kube_client;

/// Application builder
pub struct ApplicationBuilder {
    daemon_args: DaemonArgs,
}

impl ApplicationBuilder {
    pub fn new(daemon_args: DaemonArgs) -> Self {
        Self { daemon_args }
    }

    /// Build complete application
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let hub_config = self.daemon_args.hub_config();
        hub_config
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid subscriber configuration: {e:?}"))?;

        let client = init_kube_client(self.daemon_args.kubeconfig.as_deref())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize Kubernetes client: {e:?}"))?;

        let hub = Arc::new(SubscriberHub::with_config(hub_config));
        let dispatcher = Dispatcher::new(Arc::clone(&hub));
        let pod_index = Arc::new(PodIndex::new());

        let backoff = self.daemon_args.backoff();
        let mut router = TriggerRouter::new();
        let mut collectors = Vec::new();

        for kind in self.daemon_args.enabled_kinds() {
            let collector = Arc::new(Collector::new(
                KubeObjectSource::new(kind, client.clone()),
                PodNodeResolver::new(kind, Arc::clone(&pod_index)),
                dispatcher.clone(),
            ));
            let queue = Arc::new(WorkQueue::new(kind, backoff));
            router = router.with_kind(Arc::clone(&queue), Arc::clone(collector.cache()));
            tracing::info!(kind = %kind, "Collector enabled");

            collectors.push(CollectorService {
                kind,
                collector,
                queue,
            });
        }

        let services = ApplicationServices {
            client,
            hub,
            pod_index,
            router: Arc::new(router),
            collectors,
        };

        Ok(Application::new(services, self.daemon_args))
    }
}
