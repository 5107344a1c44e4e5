use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;
use tracing::info;

use crate::infrastructure::k8s::KubernetesError;

/// Build a client from `kubeconfig`, or from the in-cluster / `~/.kube/config`
/// defaults when no path is given.
pub async fn init_kube_client(kubeconfig: Option<&Path>) -> Result<Client, Report<KubernetesError>> {
    let config = match kubeconfig {
        Some(path) => {
            info!(kubeconfig = %path.display(), "Using explicit kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path)
                .change_context(KubernetesError::ConnectionFailed {
                    message: "cannot read kubeconfig".to_string(),
                })
                .attach_printable_lazy(|| format!("path: {}", path.display()))?;

            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .change_context(KubernetesError::ConnectionFailed {
                    message: "invalid kubeconfig".to_string(),
                })
                .attach_printable_lazy(|| format!("path: {}", path.display()))?
        }
        None => Config::infer()
            .await
            .change_context(KubernetesError::ConnectionFailed {
                message: "no in-cluster or local configuration found".to_string(),
            })?,
    };

    info!(cluster_url = %config.cluster_url, "Connecting to Kubernetes API");
    Client::try_from(config).change_context(KubernetesError::ConnectionFailed {
        message: "cannot build client".to_string(),
    })
}
