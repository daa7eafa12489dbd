//! Enrollment: key issuance (operator side) and redemption (agent side).
//!
//! Redemption is the security-critical path. The name reservation and
//! the use counter are both atomic store operations, ordered so a name
//! conflict never burns a key use: reserve the name first, count the
//! use second, and roll the reservation back if the counter overshoots.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde::Deserialize;
use uuid::Uuid;
use warden_common::{
    agent_name_key, enrollment_uses_key, tenant_agents_key, ttl, validate_agent_name,
    validate_enrollment_key_format, Agent, AgentStatus, AgentTokenRecord, AutoGenerateRequest,
    AutoGenerateResponse, EnrollRequest, EnrollResponse, EnrollmentKey, IssueKeyRequest,
    IssueKeyResponse, NameAvailabilityResponse, SystemInfo, ENROLLMENT_KEY_ALPHABET,
};

use crate::auth::{authenticate_operator, client_identity, enforce_rate_limit};
use crate::config::EndpointClass;
use crate::error::ApiError;
use crate::state::AppState;

const MAX_KEY_USES: u32 = 100;
const MAX_KEY_TTL_HOURS: u32 = 720;

/// Generate a `XXXX-XXXX-XXXX-XXXX` enrollment key from the OS RNG.
fn generate_key_string() -> String {
    let mut rng = OsRng;
    let mut out = String::with_capacity(19);
    for group in 0..4 {
        if group > 0 {
            out.push('-');
        }
        for _ in 0..4 {
            let idx = rng.gen_range(0..ENROLLMENT_KEY_ALPHABET.len());
            out.push(char::from(ENROLLMENT_KEY_ALPHABET[idx]));
        }
    }
    out
}

/// 32 bytes of OS entropy as lowercase hex. Used for both agent tokens
/// and HMAC secrets.
fn generate_secret() -> String {
    let mut buf = [0u8; 32];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

struct IssuedCredentials {
    agent: Agent,
    token: String,
    secret: String,
    token_expires_at: DateTime<Utc>,
}

/// Create the agent and its credentials. The caller must already hold
/// the tenant-scoped name reservation for `agent_name`.
async fn create_agent_with_credentials(
    state: &AppState,
    tenant_id: &str,
    agent_name: &str,
    agent_id: String,
    system_info: Option<&SystemInfo>,
    now: DateTime<Utc>,
) -> Result<IssuedCredentials, ApiError> {
    let agent = Agent {
        id: agent_id,
        tenant_id: tenant_id.to_string(),
        agent_name: agent_name.to_string(),
        status: AgentStatus::Active,
        enrolled_at: now,
        last_heartbeat: None,
        os_type: system_info.and_then(|s| s.os_type.clone()),
        os_version: system_info.and_then(|s| s.os_version.clone()),
        hostname: system_info.and_then(|s| s.hostname.clone()),
    };
    state.save_agent(&agent).await?;
    state
        .store()
        .set_add(&tenant_agents_key(tenant_id), &agent.id)
        .await?;

    let token = generate_secret();
    let secret = generate_secret();
    let token_ttl_secs = i64::from(state.config().agent_token_ttl_days) * 86_400;
    let token_expires_at = now + Duration::seconds(token_ttl_secs);
    let record = AgentTokenRecord {
        agent_id: agent.id.clone(),
        tenant_id: tenant_id.to_string(),
        hmac_secret: secret.clone(),
        is_active: true,
        created_at: now,
        expires_at: token_expires_at,
    };
    state
        .save_token(&token, &record, Some(token_ttl_secs))
        .await?;

    Ok(IssuedCredentials {
        agent,
        token,
        secret,
        token_expires_at,
    })
}

fn key_record_ttl(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    ((expires_at - now).num_seconds() + ttl::ENROLLMENT_GRACE_SECS).max(1)
}

async fn check_agent_quota(state: &AppState, tenant_id: &str) -> Result<(), ApiError> {
    let enrolled = state
        .store()
        .set_card(&tenant_agents_key(tenant_id))
        .await?;
    if enrolled >= state.config().max_agents_per_tenant {
        return Err(ApiError::QuotaExceeded);
    }
    Ok(())
}

/// POST /v1/enrollment/keys: operator issues an enrollment key.
pub async fn issue_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IssueKeyRequest>,
) -> Result<Json<IssueKeyResponse>, ApiError> {
    let operator = authenticate_operator(&state, &headers)?;
    validate_agent_name(&req.agent_name).map_err(ApiError::Validation)?;
    check_agent_quota(&state, &operator.tenant_id).await?;

    let now = Utc::now();
    let ttl_hours = req
        .expires_in_hours
        .unwrap_or(state.config().enrollment_key_ttl_hours)
        .clamp(1, MAX_KEY_TTL_HOURS);
    let max_uses = req.max_uses.unwrap_or(1).clamp(1, MAX_KEY_USES);
    let expires_at = now + Duration::hours(i64::from(ttl_hours));

    let record = EnrollmentKey {
        key: generate_key_string(),
        tenant_id: operator.tenant_id,
        agent_name_hint: Some(req.agent_name),
        created_at: now,
        expires_at,
        max_uses,
        current_uses: 0,
        is_active: true,
        used_by_agent: None,
    };
    state
        .save_enrollment_key(&record, Some(key_record_ttl(expires_at, now)))
        .await?;

    tracing::info!(tenant_id = %record.tenant_id, max_uses, "enrollment key issued");
    Ok(Json(IssueKeyResponse {
        enrollment_key: record.key,
        expires_at,
        max_uses,
    }))
}

/// POST /v1/enrollment/auto-generate: operator issues a key and redeems
/// it in the same call, receiving the agent's credentials directly. The
/// key is recorded already consumed.
pub async fn auto_generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AutoGenerateRequest>,
) -> Result<Json<AutoGenerateResponse>, ApiError> {
    let operator = authenticate_operator(&state, &headers)?;
    validate_agent_name(&req.agent_name).map_err(ApiError::Validation)?;
    check_agent_quota(&state, &operator.tenant_id).await?;

    let now = Utc::now();
    let agent_id = Uuid::new_v4().to_string();
    let name_key = agent_name_key(&operator.tenant_id, &req.agent_name);
    if !state.store().put_nx(&name_key, &agent_id, None).await? {
        return Err(ApiError::NameConflict);
    }

    let credentials = match create_agent_with_credentials(
        &state,
        &operator.tenant_id,
        &req.agent_name,
        agent_id,
        None,
        now,
    )
    .await
    {
        Ok(credentials) => credentials,
        Err(err) => {
            state.store().delete(&name_key).await?;
            return Err(err);
        }
    };

    let expires_at = now + Duration::hours(i64::from(state.config().enrollment_key_ttl_hours));
    let record = EnrollmentKey {
        key: generate_key_string(),
        tenant_id: operator.tenant_id,
        agent_name_hint: Some(req.agent_name),
        created_at: now,
        expires_at,
        max_uses: 1,
        current_uses: 1,
        is_active: false,
        used_by_agent: Some(credentials.agent.id.clone()),
    };
    state
        .save_enrollment_key(&record, Some(key_record_ttl(expires_at, now)))
        .await?;

    tracing::info!(
        tenant_id = %record.tenant_id,
        agent_id = %credentials.agent.id,
        "agent auto-generated"
    );
    Ok(Json(AutoGenerateResponse {
        enrollment_key: record.key,
        agent_token: credentials.token,
        hmac_secret: credentials.secret,
        agent_id: credentials.agent.id,
        expires_at: credentials.token_expires_at,
    }))
}

/// POST /v1/enrollment/enroll: an agent redeems an enrollment key for
/// its permanent credentials. Unauthenticated, so rate limited by
/// client address before anything else.
pub async fn enroll(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<EnrollResponse>, ApiError> {
    let identity = client_identity(&headers);
    enforce_rate_limit(&state, EndpointClass::Enrollment, &identity).await?;

    let req: EnrollRequest =
        serde_json::from_slice(&body).map_err(|_| ApiError::Validation("malformed json body"))?;
    validate_enrollment_key_format(&req.enrollment_key).map_err(|_| ApiError::InvalidKey)?;
    validate_agent_name(&req.agent_name).map_err(ApiError::Validation)?;

    let now = Utc::now();
    let key_record = state
        .load_enrollment_key(&req.enrollment_key)
        .await?
        .ok_or(ApiError::InvalidKey)?;
    if !key_record.is_redeemable(now) {
        return Err(ApiError::InvalidKey);
    }

    // Name first, use count second. Losing the name race must not
    // consume a key use.
    let agent_id = Uuid::new_v4().to_string();
    let name_key = agent_name_key(&key_record.tenant_id, &req.agent_name);
    if !state.store().put_nx(&name_key, &agent_id, None).await? {
        return Err(ApiError::NameConflict);
    }

    let uses_key = enrollment_uses_key(&req.enrollment_key);
    let uses = state
        .store()
        .incr_window(&uses_key, key_record_ttl(key_record.expires_at, now))
        .await?;
    if uses > u64::from(key_record.max_uses) {
        state.store().decr(&uses_key).await?;
        state.store().delete(&name_key).await?;
        return Err(ApiError::InvalidKey);
    }

    let credentials = match create_agent_with_credentials(
        &state,
        &key_record.tenant_id,
        &req.agent_name,
        agent_id,
        req.system_info.as_ref(),
        now,
    )
    .await
    {
        Ok(credentials) => credentials,
        Err(err) => {
            state.store().decr(&uses_key).await?;
            state.store().delete(&name_key).await?;
            return Err(err);
        }
    };

    // The record's counter mirrors the atomic one for reads; the
    // counter stays authoritative.
    let mut updated = key_record.clone();
    updated.current_uses = u32::try_from(uses.min(u64::from(key_record.max_uses)))
        .unwrap_or(key_record.max_uses);
    updated.is_active = updated.current_uses < updated.max_uses;
    updated.used_by_agent = Some(credentials.agent.id.clone());
    state
        .save_enrollment_key(&updated, Some(key_record_ttl(key_record.expires_at, now)))
        .await?;

    tracing::info!(
        tenant_id = %key_record.tenant_id,
        agent_id = %credentials.agent.id,
        "agent enrolled"
    );
    Ok(Json(EnrollResponse {
        agent_token: credentials.token,
        hmac_secret: credentials.secret,
        agent_id: credentials.agent.id,
        expires_at: credentials.token_expires_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    pub name: String,
}

/// GET /v1/agents/name-availability?name=...: operator pre-check before
/// issuing a key. Names failing the policy read as unavailable.
pub async fn name_availability(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<NameQuery>,
) -> Result<Json<NameAvailabilityResponse>, ApiError> {
    let operator = authenticate_operator(&state, &headers)?;
    if validate_agent_name(&query.name).is_err() {
        return Ok(Json(NameAvailabilityResponse { available: false }));
    }
    let taken = state
        .store()
        .get(&agent_name_key(&operator.tenant_id, &query.name))
        .await?
        .is_some();
    Ok(Json(NameAvailabilityResponse { available: !taken }))
}
