//! Job lifecycle: operator creation and listing, agent poll and ack.
//!
//! The queued set is the delivery mechanism: a successful `SREM` is the
//! claim, so two concurrent polls can never both deliver one job. The
//! completion claim plays the same role for the single terminal
//! transition.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;
use warden_common::{
    agent_jobs_key, agent_name_key, agent_queue_key, job_completion_key, tenant_job_count_key,
    validate_agent_name, validate_job_id, validate_job_payload, validate_job_type_name,
    AckRequest, AckResponse, CreateJobRequest, CreateJobResponse, Job, JobEnvelope, JobStatus,
    JobType, JobView,
};

use crate::auth::{authenticate_agent, authenticate_operator};
use crate::config::EndpointClass;
use crate::error::ApiError;
use crate::state::AppState;

/// POST /v1/jobs: operator queues a job for one named agent.
pub async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateJobRequest>,
) -> Result<Json<CreateJobResponse>, ApiError> {
    let operator = authenticate_operator(&state, &headers)?;
    validate_agent_name(&req.agent_name).map_err(ApiError::Validation)?;
    if let JobType::Other(name) = &req.job_type {
        validate_job_type_name(name).map_err(ApiError::Validation)?;
    }
    let payload = req.payload.unwrap_or(serde_json::Value::Null);
    validate_job_payload(&payload, state.config().max_payload_bytes)
        .map_err(ApiError::Validation)?;

    let agent_id = state
        .store()
        .get(&agent_name_key(&operator.tenant_id, &req.agent_name))
        .await?
        .ok_or(ApiError::NotFound)?;

    // Atomic increment-and-check; roll back on overshoot so a denied
    // request does not shrink the remaining quota.
    let count_key = tenant_job_count_key(&operator.tenant_id);
    let total = state.store().incr(&count_key).await?;
    if total > state.config().max_jobs_per_tenant {
        state.store().decr(&count_key).await?;
        return Err(ApiError::QuotaExceeded);
    }

    let now = Utc::now();
    let job = Job {
        id: Uuid::new_v4().to_string(),
        tenant_id: operator.tenant_id,
        agent_name: req.agent_name,
        job_type: req.job_type,
        payload,
        status: JobStatus::Queued,
        approved: !req.requires_approval,
        created_at: now,
        delivered_at: None,
        completed_at: None,
        failure_message: None,
    };
    state.save_job(&job).await?;
    state
        .store()
        .set_add(&agent_queue_key(&agent_id), &job.id)
        .await?;
    state
        .store()
        .set_add(&agent_jobs_key(&agent_id), &job.id)
        .await?;

    tracing::info!(
        tenant_id = %job.tenant_id,
        job_id = %job.id,
        job_type = %job.job_type.as_str(),
        approved = job.approved,
        "job created"
    );
    Ok(Json(CreateJobResponse { job_id: job.id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobsQuery {
    pub agent_name: String,
}

/// GET /v1/jobs?agentName=...: operator reads the lifecycle of every
/// job addressed to one agent, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    let operator = authenticate_operator(&state, &headers)?;
    validate_agent_name(&query.agent_name).map_err(ApiError::Validation)?;
    let agent_id = state
        .store()
        .get(&agent_name_key(&operator.tenant_id, &query.agent_name))
        .await?
        .ok_or(ApiError::NotFound)?;

    let mut jobs = Vec::new();
    for job_id in state.store().set_members(&agent_jobs_key(&agent_id)).await? {
        if let Some(job) = state.load_job(&job_id).await? {
            jobs.push(job);
        }
    }
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(jobs.iter().map(JobView::from).collect()))
}

/// GET|POST /v1/jobs/poll: agent collects its queued, approved jobs.
///
/// Unapproved jobs are skipped without being claimed, so they surface
/// on a later poll once approved. Delivery order is creation order.
pub async fn poll_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Vec<JobEnvelope>>, ApiError> {
    let agent = authenticate_agent(&state, &headers, &body, EndpointClass::PollJobs).await?;

    let queue_key = agent_queue_key(&agent.id);
    let mut candidates = Vec::new();
    for job_id in state.store().set_members(&queue_key).await? {
        match state.load_job(&job_id).await? {
            Some(job) if job.status == JobStatus::Queued => candidates.push(job),
            // Stale queue entry: record gone or already moved on.
            _ => {
                state.store().set_remove(&queue_key, &job_id).await?;
            }
        }
    }
    candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    let now = Utc::now();
    let mut delivered = Vec::new();
    for mut job in candidates {
        if delivered.len() >= state.config().poll_batch {
            break;
        }
        if !job.approved {
            continue;
        }
        // The SREM is the claim. A concurrent poll that also saw this
        // id loses here and moves on.
        if !state.store().set_remove(&queue_key, &job.id).await? {
            continue;
        }
        job.status = JobStatus::Delivered;
        job.delivered_at = Some(now);
        state.save_job(&job).await?;
        delivered.push(JobEnvelope::from(&job));
    }

    if !delivered.is_empty() {
        tracing::debug!(agent_id = %agent.id, count = delivered.len(), "jobs delivered");
    }
    Ok(Json(delivered))
}

/// POST /v1/jobs/{id}/ack: agent reports execution of a delivered job.
///
/// Retries are idempotent: once a job is terminal, further acks return
/// success without touching the record. A job the caller does not own,
/// or one never delivered to it, reads as a generic 404.
pub async fn ack_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AckResponse>, ApiError> {
    let agent = authenticate_agent(&state, &headers, &body, EndpointClass::AckJob).await?;
    validate_job_id(&job_id).map_err(|_| ApiError::NotFound)?;

    let ack: AckRequest = if body.is_empty() {
        AckRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|_| ApiError::Validation("malformed json body"))?
    };

    let mut job = state.load_job(&job_id).await?.ok_or(ApiError::NotFound)?;
    if job.tenant_id != agent.tenant_id || job.agent_name != agent.agent_name {
        return Err(ApiError::NotFound);
    }
    if job.status.is_terminal() {
        return Ok(Json(AckResponse {
            success: true,
            message: "already acknowledged".to_string(),
        }));
    }
    if job.status == JobStatus::Queued {
        // Never delivered to anyone; an ack for it is indistinguishable
        // from a guess at the id.
        return Err(ApiError::NotFound);
    }

    // Single terminal transition, claimed atomically. The loser of a
    // concurrent duplicate reads back as idempotent success.
    if !state
        .store()
        .claim_once(&job_completion_key(&job_id), None)
        .await?
    {
        return Ok(Json(AckResponse {
            success: true,
            message: "already acknowledged".to_string(),
        }));
    }

    job.status = if ack.success {
        JobStatus::Done
    } else {
        JobStatus::Failed
    };
    job.completed_at = Some(Utc::now());
    job.failure_message = if ack.success { None } else { ack.message };
    state.save_job(&job).await?;

    tracing::info!(
        agent_id = %agent.id,
        job_id = %job.id,
        status = ?job.status,
        "job acknowledged"
    );
    Ok(Json(AckResponse {
        success: true,
        message: "acknowledged".to_string(),
    }))
}
