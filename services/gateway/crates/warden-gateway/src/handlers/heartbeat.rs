//! Agent heartbeat: liveness stamp plus optional system-info refresh.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use warden_common::{HeartbeatRequest, HeartbeatResponse};

use crate::auth::authenticate_agent;
use crate::config::EndpointClass;
use crate::error::ApiError;
use crate::state::AppState;

/// POST /v1/agents/heartbeat. Stamps `last_heartbeat`; liveness is
/// derived read-side from the stamp, never stored.
pub async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let mut agent =
        authenticate_agent(&state, &headers, &body, EndpointClass::Heartbeat).await?;

    let req: HeartbeatRequest = if body.is_empty() {
        HeartbeatRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|_| ApiError::Validation("malformed json body"))?
    };

    let now = Utc::now();
    agent.last_heartbeat = Some(now);
    if let Some(info) = req.system_info {
        // Merge, never clear: absent fields keep their last value.
        if info.os_type.is_some() {
            agent.os_type = info.os_type;
        }
        if info.os_version.is_some() {
            agent.os_version = info.os_version;
        }
        if info.hostname.is_some() {
            agent.hostname = info.hostname;
        }
    }
    state.save_agent(&agent).await?;

    tracing::debug!(agent_id = %agent.id, "heartbeat recorded");
    Ok(Json(HeartbeatResponse {
        success: true,
        agent: agent.agent_name,
        timestamp: now,
    }))
}
