use std::sync::Arc;

use api_types::MetadataEvent;
use api_types::ResourceKind;
use kube::Client;
use node_stream::SubscriberHub;

use crate::core::Collector;
use crate::core::PodNodeResolver;
use crate::core::WorkQueue;
use crate::infrastructure::k8s::KubeObjectSource;
use crate::infrastructure::k8s::PodIndex;
use crate::infrastructure::k8s::TriggerRouter;
use crate::infrastructure::metrics::CollectorGauges;

pub type KubeCollector = Collector<KubeObjectSource, PodNodeResolver<Arc<PodIndex>>>;

/// One enabled kind: its collector and the queue feeding it.
pub struct CollectorService {
    pub kind: ResourceKind,
    pub collector: Arc<KubeCollector>,
    pub queue: Arc<WorkQueue>,
}

impl CollectorService {
    pub fn gauges(&self) -> CollectorGauges {
        CollectorGauges {
            kind: self.kind,
            events: Arc::clone(self.collector.metrics()),
            cache: Arc::clone(self.collector.cache()),
            queue: Arc::clone(&self.queue),
        }
    }
}

/// Application dependencies - simple struct with Arc-wrapped services
pub struct ApplicationServices {
    pub client: Client,
    pub hub: Arc<SubscriberHub<MetadataEvent>>,
    pub pod_index: Arc<PodIndex>,
    pub router: Arc<TriggerRouter>,
    pub collectors: Vec<CollectorService>,
}

impl ApplicationServices {
    pub fn is_enabled(&self, kind: ResourceKind) -> bool {
        self.router.is_enabled(kind)
    }
}
