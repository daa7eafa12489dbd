//! HTTP surface of the gateway.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{enroll, health, heartbeat, jobs};
use crate::state::AppState;

/// Compose the full router:
///   - `/health`                        liveness probe
///   - `/v1/enrollment/keys`            operator: issue an enrollment key
///   - `/v1/enrollment/auto-generate`   operator: issue + redeem in one call
///   - `/v1/enrollment/enroll`          agent: redeem a key for credentials
///   - `/v1/agents/name-availability`   operator: name pre-check
///   - `/v1/agents/heartbeat`           agent: liveness + system info
///   - `/v1/jobs`                       operator: create / list jobs
///   - `/v1/jobs/poll`                  agent: collect queued jobs
///   - `/v1/jobs/{id}/ack`              agent: report execution
#[must_use]
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/enrollment/keys", post(enroll::issue_key))
        .route("/v1/enrollment/auto-generate", post(enroll::auto_generate))
        .route("/v1/enrollment/enroll", post(enroll::enroll))
        .route(
            "/v1/agents/name-availability",
            get(enroll::name_availability),
        )
        .route("/v1/agents/heartbeat", post(heartbeat::heartbeat))
        .route("/v1/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/v1/jobs/poll", get(jobs::poll_jobs).post(jobs::poll_jobs))
        .route("/v1/jobs/{id}/ack", post(jobs::ack_job))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
