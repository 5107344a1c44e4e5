use std::sync::Arc;

use poem::handler;
use poem::http::StatusCode;
use poem::web::Data;
use poem::web::Json;
use poem::IntoResponse;
use poem::Response;
use serde::Serialize;

use crate::infrastructure::k8s::PodIndex;

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub indexed_pods: usize,
}

#[handler]
pub async fn healthz() -> &'static str {
    "ok"
}

/// 503 until the pod and ReplicaSet indexes have been listed once.
#[handler]
pub async fn readyz(pod_index: Data<&Arc<PodIndex>>) -> Response {
    let readiness = Readiness {
        ready: pod_index.is_synced(),
        indexed_pods: pod_index.pod_count(),
    };
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Json(readiness).with_status(status).into_response()
}
