use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api_types::MetadataEvent;
use error_stack::Report;
use poem::get;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use node_stream::SubscriberHub;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::handlers::healthz;
use super::handlers::readyz;
use super::ApiError;
use crate::infrastructure::k8s::PodIndex;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Serves the node event streams and the probes.
pub struct ApiServer {
    hub: Arc<SubscriberHub<MetadataEvent>>,
    pod_index: Arc<PodIndex>,
    listen_addr: SocketAddr,
    base_path: String,
}

impl ApiServer {
    pub fn new(
        hub: Arc<SubscriberHub<MetadataEvent>>,
        pod_index: Arc<PodIndex>,
        listen_addr: SocketAddr,
        base_path: String,
    ) -> Self {
        Self {
            hub,
            pod_index,
            listen_addr,
            base_path,
        }
    }

    pub fn routes(&self) -> Route {
        node_stream::create_routes(Arc::clone(&self.hub), &self.base_path)
            .at("/healthz", get(healthz))
            .at("/readyz", get(readyz.data(Arc::clone(&self.pod_index))))
    }

    /// Serve until `cancellation_token` fires; open streams get a short grace
    /// period to drain.
    ///
    /// # Errors
    ///
    /// - [`ApiError::ServerError`] if the server fails to start or bind to the address
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<(), Report<ApiError>> {
        info!("Starting HTTP API server on {}", self.listen_addr);

        let app = self.routes().with(Tracing);
        Server::new(TcpListener::bind(self.listen_addr))
            .run_with_graceful_shutdown(
                app,
                cancellation_token.cancelled_owned(),
                Some(SHUTDOWN_GRACE),
            )
            .await
            .map_err(|e| {
                Report::new(ApiError::ServerError {
                    message: format!("Server failed: {e}"),
                })
            })?;

        info!("API server stopped");
        Ok(())
    }
}
