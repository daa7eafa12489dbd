//! Request authentication.
//!
//! Operators present a bearer token from the configured table. Agents
//! sign every request with their HMAC secret; verification runs the
//! full check chain (token, signature, freshness, rate limit, nonce)
//! before any business logic, and records the nonce as its only side
//! effect.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use warden_common::{
    headers, nonce_key, rate_limit_key, signing_string, ttl, validate_nonce,
    validate_token_format, Agent, AgentStatus,
};

use crate::config::EndpointClass;
use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Resolved operator identity.
#[derive(Debug, Clone)]
pub struct OperatorContext {
    pub tenant_id: String,
}

/// Authenticate an operator request from its `Authorization: Bearer`
/// header against the configured token table.
pub fn authenticate_operator(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<OperatorContext, ApiError> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError::unauthorized("missing operator bearer token"))?;

    match state.operator_tenant(bearer) {
        Some(tenant_id) => Ok(OperatorContext {
            tenant_id: tenant_id.to_string(),
        }),
        None => Err(ApiError::unauthorized("unknown operator token")),
    }
}

/// Compute the lowercase-hex HMAC-SHA256 signature for a request.
#[must_use]
pub fn compute_signature(secret: &str, timestamp_ms: i64, nonce: &str, body: &[u8]) -> String {
    let message = signing_string(timestamp_ms, nonce, body);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(&message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a client-provided hex signature.
fn verify_signature(
    secret: &str,
    timestamp_ms: i64,
    nonce: &str,
    body: &[u8],
    provided_hex: &str,
) -> bool {
    let Ok(provided) = hex::decode(provided_hex) else {
        return false;
    };
    let message = signing_string(timestamp_ms, nonce, body);
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(&message);
    // Mac::verify_slice compares in constant time.
    mac.verify_slice(&provided).is_ok()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Authenticate an agent request end to end.
///
/// Check order matters: signature and freshness are verified before the
/// rate limiter runs, and the nonce claim (the single persistence
/// write) comes last, so a 429 never consumes a nonce and a rejected
/// request never records one.
pub async fn authenticate_agent(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    class: EndpointClass,
) -> Result<Agent, ApiError> {
    let token = header_str(headers, headers::AGENT_TOKEN)
        .ok_or(ApiError::unauthorized("missing agent token"))?;
    validate_token_format(token).map_err(|_| ApiError::unauthorized("malformed agent token"))?;

    let record = state
        .load_token(token)
        .await?
        .ok_or(ApiError::unauthorized("unknown agent token"))?;
    let now = Utc::now();
    if !record.is_active {
        return Err(ApiError::unauthorized("inactive agent token"));
    }
    if record.expires_at <= now {
        return Err(ApiError::unauthorized("expired agent token"));
    }

    let agent = state
        .load_agent(&record.agent_id)
        .await?
        .ok_or(ApiError::unauthorized("token without agent"))?;
    if agent.status == AgentStatus::Disabled {
        return Err(ApiError::unauthorized("agent disabled"));
    }

    let signature = header_str(headers, headers::HMAC_SIGNATURE)
        .ok_or(ApiError::unauthorized("missing signature header"))?;
    let timestamp_ms: i64 = header_str(headers, headers::TIMESTAMP)
        .and_then(|raw| raw.parse().ok())
        .ok_or(ApiError::unauthorized("missing or malformed timestamp"))?;
    let nonce = header_str(headers, headers::NONCE)
        .ok_or(ApiError::unauthorized("missing nonce header"))?;

    if !verify_signature(&record.hmac_secret, timestamp_ms, nonce, body, signature) {
        return Err(ApiError::unauthorized("signature mismatch"));
    }

    let skew_ms = state.config().clock_skew_secs * 1000;
    if (now.timestamp_millis() - timestamp_ms).abs() > skew_ms {
        return Err(ApiError::unauthorized("timestamp outside clock skew"));
    }

    enforce_rate_limit(state, class, &agent.id).await?;

    validate_nonce(nonce).map_err(|_| ApiError::unauthorized("malformed nonce"))?;
    let nonce_ttl = state.config().clock_skew_secs * ttl::NONCE_SKEW_MULTIPLIER;
    let fresh = state
        .store()
        .claim_once(&nonce_key(&agent.id, nonce), Some(nonce_ttl))
        .await?;
    if !fresh {
        // Valid signature, already-seen nonce: a replay. The claim
        // itself is the check, so two concurrent duplicates cannot
        // both pass.
        return Err(ApiError::unauthorized("replayed nonce"));
    }

    Ok(agent)
}

/// Atomic fixed-window rate limiting for one identity and endpoint
/// class. Returns 429 with a Retry-After hint once the window fills;
/// the reset is time-driven via the counter's expiry.
pub async fn enforce_rate_limit(
    state: &AppState,
    class: EndpointClass,
    identity: &str,
) -> Result<(), ApiError> {
    let policy = state.config().rate_policy(class);
    if policy.max_requests == 0 || policy.window_secs <= 0 {
        return Ok(());
    }
    let now_secs = Utc::now().timestamp();
    let window_index = now_secs.div_euclid(policy.window_secs);
    let key = rate_limit_key(class.as_str(), identity, window_index);

    let count = state.store().incr_window(&key, policy.window_secs).await?;
    if count > policy.max_requests {
        let retry_after_secs = policy.window_secs - now_secs.rem_euclid(policy.window_secs);
        return Err(ApiError::RateLimited { retry_after_secs });
    }
    Ok(())
}

/// Pre-auth identity for enrollment rate limiting: the first
/// `X-Forwarded-For` hop, screened to address characters so it stays
/// key-safe.
#[must_use]
pub fn client_identity(headers: &HeaderMap) -> String {
    let forwarded = header_str(headers, "x-forwarded-for")
        .and_then(|raw| raw.split(',').next())
        .map(str::trim)
        .unwrap_or("");
    if !forwarded.is_empty()
        && forwarded.len() <= 64
        && forwarded
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == '.' || c == ':')
    {
        forwarded.to_ascii_lowercase()
    } else {
        "unknown".to_string()
    }
}
