use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use api_types::ResourceKind;
use clap::Parser;
use node_stream::HubConfig;

use crate::core::workqueue::Backoff;

#[derive(Parser, Clone, Debug)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "METACOLLECTOR_LISTEN_ADDR",
        default_value = "0.0.0.0:45000",
        help = "Address the node event streams are served on"
    )]
    pub listen_addr: SocketAddr,

    #[arg(
        long,
        env = "METACOLLECTOR_BASE_PATH",
        default_value = "/api/v1",
        help = "Path prefix of the event stream routes"
    )]
    pub base_path: String,

    #[arg(
        long,
        env = "METACOLLECTOR_RESOURCES",
        value_delimiter = ',',
        default_values_t = ResourceKind::ALL.to_vec(),
        help = "Kinds of resources to collect, comma separated"
    )]
    pub resources: Vec<ResourceKind>,

    #[arg(
        long,
        env = "METACOLLECTOR_WORKERS",
        default_value = "4",
        value_parser = clap::value_parser!(u16).range(1..),
        help = "Concurrent reconciliations per resource kind"
    )]
    pub workers: u16,

    #[arg(
        long,
        env = "METACOLLECTOR_SUBSCRIBER_QUEUE_SIZE",
        default_value = "1000",
        help = "Events buffered per node before its stream is dropped"
    )]
    pub subscriber_queue_size: usize,

    #[arg(
        long,
        default_value = "15",
        help = "Seconds between keep-alive comments on idle event streams"
    )]
    pub keep_alive_secs: u64,

    #[arg(
        long,
        default_value = "5",
        help = "Delay before the first retry of a failed reconciliation, in milliseconds"
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long,
        default_value = "300",
        help = "Upper bound of the retry delay, in seconds"
    )]
    pub retry_max_delay_secs: u64,

    #[arg(
        long,
        env = "METACOLLECTOR_METRICS_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/logs/metrics.log",
        help = "Path for printing collector metrics, e.g. /logs/metrics.log"
    )]
    pub metrics_file: Option<PathBuf>,

    #[arg(
        long,
        default_value = "10",
        help = "Seconds between two metrics reports"
    )]
    pub metrics_interval_secs: u64,
}

impl DaemonArgs {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig::default()
            .with_queue_capacity(self.subscriber_queue_size)
            .with_keep_alive(Duration::from_secs(self.keep_alive_secs))
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_secs(self.retry_max_delay_secs),
        )
    }

    /// Enabled kinds without duplicates, in start-up order.
    pub fn enabled_kinds(&self) -> Vec<ResourceKind> {
        ResourceKind::ALL
            .into_iter()
            .filter(|kind| self.resources.contains(kind))
            .collect()
    }
}
