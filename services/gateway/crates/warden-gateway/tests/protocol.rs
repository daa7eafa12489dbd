//! End-to-end protocol tests driving the router over the in-process
//! store: enrollment races, HMAC rejection paths, replay and rate
//! limiting, and the job lifecycle.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use warden_gateway::auth::compute_signature;
use warden_gateway::store::MemoryStore;
use warden_gateway::{build_router, AppState, Config};
use warden_common::headers;

const OPERATOR_TOKEN: &str = "op-tok";

fn base_config() -> Config {
    Config {
        operator_tokens: format!("{OPERATOR_TOKEN}=tenant-1"),
        // Wide windows and generous limits so ordinary traffic in a
        // test never trips a limiter; limiter tests tighten these.
        heartbeat_rate_max: 100,
        heartbeat_rate_window_secs: 3600,
        poll_rate_max: 100,
        poll_rate_window_secs: 3600,
        ack_rate_max: 100,
        ack_rate_window_secs: 3600,
        enroll_rate_max: 100,
        enroll_rate_window_secs: 3600,
        ..Config::default()
    }
}

fn app_with(config: Config) -> (Router, AppState) {
    let state = AppState::new(config, Arc::new(MemoryStore::new()));
    (build_router(state.clone()), state)
}

fn app() -> (Router, AppState) {
    app_with(base_config())
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn operator_request(method: Method, path: &str, body: Option<&Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(path)
        .header(header::AUTHORIZATION, format!("Bearer {OPERATOR_TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[derive(Clone)]
struct TestAgent {
    token: String,
    secret: String,
    agent_id: String,
}

struct SignedRequest<'a> {
    method: Method,
    path: &'a str,
    body: Vec<u8>,
    nonce: String,
    timestamp_ms: i64,
    signature_override: Option<String>,
}

impl<'a> SignedRequest<'a> {
    fn new(method: Method, path: &'a str, body: &[u8]) -> Self {
        Self {
            method,
            path,
            body: body.to_vec(),
            nonce: Uuid::new_v4().to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
            signature_override: None,
        }
    }

    fn build(self, agent: &TestAgent) -> Request<Body> {
        let signature = self.signature_override.unwrap_or_else(|| {
            compute_signature(&agent.secret, self.timestamp_ms, &self.nonce, &self.body)
        });
        Request::builder()
            .method(self.method)
            .uri(self.path)
            .header(header::CONTENT_TYPE, "application/json")
            .header(headers::AGENT_TOKEN, &agent.token)
            .header(headers::HMAC_SIGNATURE, signature)
            .header(headers::TIMESTAMP, self.timestamp_ms.to_string())
            .header(headers::NONCE, &self.nonce)
            .body(Body::from(self.body))
            .unwrap()
    }
}

fn signed(method: Method, path: &str, body: &[u8], agent: &TestAgent) -> Request<Body> {
    SignedRequest::new(method, path, body).build(agent)
}

async fn issue_key(router: &Router, agent_name: &str) -> String {
    let (status, body) = send(
        router,
        operator_request(
            Method::POST,
            "/v1/enrollment/keys",
            Some(&json!({ "agentName": agent_name })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["enrollmentKey"].as_str().unwrap().to_string()
}

async fn enroll(router: &Router, key: &str, agent_name: &str) -> (StatusCode, Value) {
    let body = json!({ "enrollmentKey": key, "agentName": agent_name });
    send(
        router,
        Request::builder()
            .method(Method::POST)
            .uri("/v1/enrollment/enroll")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

async fn enroll_agent(router: &Router, agent_name: &str) -> TestAgent {
    let key = issue_key(router, agent_name).await;
    let (status, body) = enroll(router, &key, agent_name).await;
    assert_eq!(status, StatusCode::OK);
    TestAgent {
        token: body["agentToken"].as_str().unwrap().to_string(),
        secret: body["hmacSecret"].as_str().unwrap().to_string(),
        agent_id: body["agentId"].as_str().unwrap().to_string(),
    }
}

async fn create_job(router: &Router, agent_name: &str, job: &Value) -> (StatusCode, Value) {
    let mut body = job.clone();
    body["agentName"] = json!(agent_name);
    send(router, operator_request(Method::POST, "/v1/jobs", Some(&body))).await
}

async fn list_jobs(router: &Router, agent_name: &str) -> Vec<Value> {
    let (status, body) = send(
        router,
        operator_request(
            Method::GET,
            &format!("/v1/jobs?agentName={agent_name}"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body.as_array().unwrap().clone()
}

async fn poll(router: &Router, agent: &TestAgent) -> Vec<Value> {
    let (status, body) = send(router, signed(Method::GET, "/v1/jobs/poll", b"", agent)).await;
    assert_eq!(status, StatusCode::OK);
    body.as_array().unwrap().clone()
}

// --- Enrollment ---

#[tokio::test]
async fn health_probe() {
    let (router, _) = app();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn enrollment_issues_usable_credentials() {
    let (router, _) = app();
    let key = issue_key(&router, "agent-01").await;
    assert_eq!(key.len(), 19);

    let (status, body) = enroll(&router, &key, "agent-01").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hmacSecret"].as_str().unwrap().len(), 64);
    assert_eq!(body["agentToken"].as_str().unwrap().len(), 64);
    assert!(body["expiresAt"].is_string());
}

#[tokio::test]
async fn single_use_key_redeems_exactly_once() {
    let (router, _) = app();
    let key = issue_key(&router, "agent-01").await;

    let (first, _) = enroll(&router, &key, "agent-01").await;
    assert_eq!(first, StatusCode::OK);
    let (second, body) = enroll(&router, &key, "agent-02").await;
    assert_eq!(second, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid or expired enrollment key");
}

#[tokio::test]
async fn concurrent_redemption_has_a_single_winner() {
    let (router, _) = app();
    let key = issue_key(&router, "agent-01").await;

    let (a, b) = tokio::join!(
        enroll(&router, &key, "agent-01"),
        enroll(&router, &key, "agent-02"),
    );
    let successes = [a.0, b.0]
        .iter()
        .filter(|status| **status == StatusCode::OK)
        .count();
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn unknown_and_expired_keys_read_the_same() {
    let (router, _) = app();
    let (status, body) = enroll(&router, "AAAA-AAAA-AAAA-AAAA", "agent-01").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid or expired enrollment key");

    let (status, _) = enroll(&router, "not-a-key", "agent-01").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_agent_name_is_a_conflict() {
    let (router, _) = app();
    let _first = enroll_agent(&router, "agent-01").await;

    let key = issue_key(&router, "agent-01").await;
    let (status, body) = enroll(&router, &key, "agent-01").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "agent name unavailable");
}

#[tokio::test]
async fn name_policy_is_enforced_at_both_ends() {
    let (router, _) = app();
    for bad in ["ab", "-agent", "admin", "aaaaaaaaa1", "a<script>b"] {
        let (status, _) = send(
            &router,
            operator_request(
                Method::POST,
                "/v1/enrollment/keys",
                Some(&json!({ "agentName": bad })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "issue accepted {bad:?}");
    }

    let key = issue_key(&router, "agent-01").await;
    let (status, _) = enroll(&router, &key, "admin").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    // The rejected redemption must not have burned the key.
    let (status, _) = enroll(&router, &key, "agent-01").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn name_availability_tracks_enrollment() {
    let (router, _) = app();
    let check = |name: &str| {
        operator_request(
            Method::GET,
            &format!("/v1/agents/name-availability?name={name}"),
            None,
        )
    };

    let (status, body) = send(&router, check("agent-01")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], true);

    enroll_agent(&router, "agent-01").await;
    let (_, body) = send(&router, check("agent-01")).await;
    assert_eq!(body["available"], false);

    let (_, body) = send(&router, check("admin")).await;
    assert_eq!(body["available"], false);
}

#[tokio::test]
async fn auto_generate_returns_consumed_key_and_working_credentials() {
    let (router, _) = app();
    let (status, body) = send(
        &router,
        operator_request(
            Method::POST,
            "/v1/enrollment/auto-generate",
            Some(&json!({ "agentName": "agent-01" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The returned key is already consumed.
    let key = body["enrollmentKey"].as_str().unwrap();
    let (status, _) = enroll(&router, key, "agent-02").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The credentials sign requests immediately.
    let agent = TestAgent {
        token: body["agentToken"].as_str().unwrap().to_string(),
        secret: body["hmacSecret"].as_str().unwrap().to_string(),
        agent_id: body["agentId"].as_str().unwrap().to_string(),
    };
    let (status, beat) = send(
        &router,
        signed(Method::POST, "/v1/agents/heartbeat", b"", &agent),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(beat["agent"], "agent-01");
}

#[tokio::test]
async fn agent_quota_blocks_key_issuance() {
    let mut config = base_config();
    config.max_agents_per_tenant = 1;
    let (router, _) = app_with(config);

    enroll_agent(&router, "agent-01").await;
    let (status, _) = send(
        &router,
        operator_request(
            Method::POST,
            "/v1/enrollment/keys",
            Some(&json!({ "agentName": "agent-02" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn enrollment_attempts_are_rate_limited_per_address() {
    let mut config = base_config();
    config.enroll_rate_max = 2;
    config.enroll_rate_window_secs = 3600;
    let (router, _) = app_with(config);

    let attempt = |addr: &'static str| {
        let body = json!({ "enrollmentKey": "AAAA-AAAA-AAAA-AAAA", "agentName": "agent-01" });
        Request::builder()
            .method(Method::POST)
            .uri("/v1/enrollment/enroll")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", addr)
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    for _ in 0..2 {
        let (status, _) = send(&router, attempt("203.0.113.9")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    let (status, _) = send(&router, attempt("203.0.113.9")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // A different address is a different budget.
    let (status, _) = send(&router, attempt("203.0.113.10")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// --- Request authentication ---

#[tokio::test]
async fn tampered_signature_is_unauthorized() {
    let (router, _) = app();
    let agent = enroll_agent(&router, "agent-01").await;

    let mut request = SignedRequest::new(Method::POST, "/v1/agents/heartbeat", b"");
    let good = compute_signature(&agent.secret, request.timestamp_ms, &request.nonce, b"");
    let flipped = if good.starts_with('0') { "1" } else { "0" };
    request.signature_override = Some(format!("{flipped}{}", &good[1..]));

    let (status, body) = send(&router, request.build(&agent)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "unauthorized" }));
}

#[tokio::test]
async fn signed_body_cannot_be_swapped() {
    let (router, _) = app();
    let agent = enroll_agent(&router, "agent-01").await;

    // Signature over one body, request carries another.
    let mut request = SignedRequest::new(Method::POST, "/v1/agents/heartbeat", b"{}");
    request.signature_override = Some(compute_signature(
        &agent.secret,
        request.timestamp_ms,
        &request.nonce,
        b"{\"other\":true}",
    ));
    let (status, _) = send(&router, request.build(&agent)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn replayed_nonce_is_unauthorized() {
    let (router, _) = app();
    let agent = enroll_agent(&router, "agent-01").await;

    let request = SignedRequest::new(Method::POST, "/v1/agents/heartbeat", b"");
    let nonce = request.nonce.clone();
    let timestamp_ms = request.timestamp_ms;
    let (status, _) = send(&router, request.build(&agent)).await;
    assert_eq!(status, StatusCode::OK);

    let mut replay = SignedRequest::new(Method::POST, "/v1/agents/heartbeat", b"");
    replay.nonce = nonce;
    replay.timestamp_ms = timestamp_ms;
    let (status, body) = send(&router, replay.build(&agent)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "unauthorized" }));
}

#[tokio::test]
async fn stale_timestamp_is_unauthorized() {
    let (router, _) = app();
    let agent = enroll_agent(&router, "agent-01").await;

    let mut request = SignedRequest::new(Method::POST, "/v1/agents/heartbeat", b"");
    request.timestamp_ms = Utc::now().timestamp_millis() - 600_000;
    let (status, _) = send(&router, request.build(&agent)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut request = SignedRequest::new(Method::POST, "/v1/agents/heartbeat", b"");
    request.timestamp_ms = Utc::now().timestamp_millis() + 600_000;
    let (status, _) = send(&router, request.build(&agent)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_token_reads_like_any_other_auth_failure() {
    let (router, _) = app();
    let stranger = TestAgent {
        token: "ab".repeat(32),
        secret: "cd".repeat(32),
        agent_id: String::new(),
    };
    let (status, body) = send(
        &router,
        signed(Method::POST, "/v1/agents/heartbeat", b"", &stranger),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "unauthorized" }));
}

#[tokio::test]
async fn operator_endpoints_require_a_known_bearer() {
    let (router, _) = app();
    let mut request = operator_request(
        Method::POST,
        "/v1/enrollment/keys",
        Some(&json!({ "agentName": "agent-01" })),
    );
    request.headers_mut().remove(header::AUTHORIZATION);
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut request = operator_request(
        Method::POST,
        "/v1/enrollment/keys",
        Some(&json!({ "agentName": "agent-01" })),
    );
    request.headers_mut().insert(
        header::AUTHORIZATION,
        "Bearer wrong-token".parse().unwrap(),
    );
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn heartbeat_burst_is_rate_limited_with_retry_after() {
    let mut config = base_config();
    config.heartbeat_rate_max = 3;
    config.heartbeat_rate_window_secs = 3600;
    let (router, _) = app_with(config);
    let agent = enroll_agent(&router, "agent-01").await;

    for _ in 0..3 {
        let (status, _) = send(
            &router,
            signed(Method::POST, "/v1/agents/heartbeat", b"", &agent),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = router
        .clone()
        .oneshot(signed(Method::POST, "/v1/agents/heartbeat", b"", &agent))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: i64 = response
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 3600);
}

// --- Heartbeat ---

#[tokio::test]
async fn heartbeat_merges_system_info() {
    let (router, state) = app();
    let agent = enroll_agent(&router, "agent-01").await;

    let body = json!({ "systemInfo": { "osType": "linux", "hostname": "edge-7" } });
    let (status, response) = send(
        &router,
        signed(
            Method::POST,
            "/v1/agents/heartbeat",
            body.to_string().as_bytes(),
            &agent,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["success"], true);
    assert_eq!(response["agent"], "agent-01");

    // A later beat without the field keeps the recorded value.
    let body = json!({ "systemInfo": { "osVersion": "6.8" } });
    let (status, _) = send(
        &router,
        signed(
            Method::POST,
            "/v1/agents/heartbeat",
            body.to_string().as_bytes(),
            &agent,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let stored = state.load_agent(&agent.agent_id).await.unwrap().unwrap();
    assert_eq!(stored.os_type.as_deref(), Some("linux"));
    assert_eq!(stored.os_version.as_deref(), Some("6.8"));
    assert_eq!(stored.hostname.as_deref(), Some("edge-7"));
    assert!(stored.last_heartbeat.is_some());
    assert!(stored.is_online(Utc::now()));
}

// --- Job lifecycle ---

#[tokio::test]
async fn job_lifecycle_end_to_end() {
    let (router, _) = app();
    let agent = enroll_agent(&router, "agent-01").await;

    let (status, created) = create_job(
        &router,
        "agent-01",
        &json!({ "type": "collect_info", "payload": { "depth": "full" } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let job_id = created["jobId"].as_str().unwrap().to_string();

    let listed = list_jobs(&router, "agent-01").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["status"], "queued");
    assert!(listed[0].get("completedAt").is_none());

    let delivered = poll(&router, &agent).await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["id"], job_id.as_str());
    assert_eq!(delivered[0]["type"], "collect_info");
    assert_eq!(delivered[0]["payload"]["depth"], "full");

    // Delivered exactly once.
    assert!(poll(&router, &agent).await.is_empty());
    let listed = list_jobs(&router, "agent-01").await;
    assert_eq!(listed[0]["status"], "delivered");
    assert!(listed[0]["deliveredAt"].is_string());

    let (status, ack) = send(
        &router,
        signed(
            Method::POST,
            &format!("/v1/jobs/{job_id}/ack"),
            b"",
            &agent,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["success"], true);

    let listed = list_jobs(&router, "agent-01").await;
    assert_eq!(listed[0]["status"], "done");
    assert!(listed[0]["completedAt"].is_string());
}

#[tokio::test]
async fn ack_is_idempotent_and_keeps_the_first_completion_time() {
    let (router, state) = app();
    let agent = enroll_agent(&router, "agent-01").await;

    let (_, created) = create_job(&router, "agent-01", &json!({ "type": "scan" })).await;
    let job_id = created["jobId"].as_str().unwrap().to_string();
    poll(&router, &agent).await;

    let ack = |agent: &TestAgent| {
        signed(
            Method::POST,
            &format!("/v1/jobs/{job_id}/ack"),
            b"",
            agent,
        )
    };
    let (status, _) = send(&router, ack(&agent)).await;
    assert_eq!(status, StatusCode::OK);
    let first = state.load_job(&job_id).await.unwrap().unwrap();
    let completed_at = first.completed_at.unwrap();

    let (status, body) = send(&router, ack(&agent)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let second = state.load_job(&job_id).await.unwrap().unwrap();
    assert_eq!(second.completed_at.unwrap(), completed_at);
}

#[tokio::test]
async fn failure_ack_marks_the_job_failed() {
    let (router, state) = app();
    let agent = enroll_agent(&router, "agent-01").await;

    let (_, created) = create_job(&router, "agent-01", &json!({ "type": "scan" })).await;
    let job_id = created["jobId"].as_str().unwrap().to_string();
    poll(&router, &agent).await;

    let body = json!({ "success": false, "message": "scan aborted" });
    let (status, _) = send(
        &router,
        signed(
            Method::POST,
            &format!("/v1/jobs/{job_id}/ack"),
            body.to_string().as_bytes(),
            &agent,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let listed = list_jobs(&router, "agent-01").await;
    assert_eq!(listed[0]["status"], "failed");
    let stored = state.load_job(&job_id).await.unwrap().unwrap();
    assert_eq!(stored.failure_message.as_deref(), Some("scan aborted"));

    // A failure ack retry is still idempotent success.
    let (status, body) = send(
        &router,
        signed(
            Method::POST,
            &format!("/v1/jobs/{job_id}/ack"),
            b"",
            &agent,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let stored = state.load_job(&job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, warden_common::JobStatus::Failed);
}

#[tokio::test]
async fn ack_before_delivery_is_not_found() {
    let (router, _) = app();
    let agent = enroll_agent(&router, "agent-01").await;
    let (_, created) = create_job(&router, "agent-01", &json!({ "type": "scan" })).await;
    let job_id = created["jobId"].as_str().unwrap().to_string();

    let (status, body) = send(
        &router,
        signed(
            Method::POST,
            &format!("/v1/jobs/{job_id}/ack"),
            b"",
            &agent,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not found");
}

#[tokio::test]
async fn ack_for_a_foreign_or_unknown_job_is_not_found() {
    let (router, _) = app();
    let owner = enroll_agent(&router, "agent-01").await;
    let other = enroll_agent(&router, "agent-02").await;

    let (_, created) = create_job(&router, "agent-01", &json!({ "type": "scan" })).await;
    let job_id = created["jobId"].as_str().unwrap().to_string();
    poll(&router, &owner).await;

    // Another tenant-member agent cannot ack it.
    let (status, _) = send(
        &router,
        signed(
            Method::POST,
            &format!("/v1/jobs/{job_id}/ack"),
            b"",
            &other,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Unknown and malformed ids look identical.
    let unknown = Uuid::new_v4().to_string();
    let (status, _) = send(
        &router,
        signed(
            Method::POST,
            &format!("/v1/jobs/{unknown}/ack"),
            b"",
            &owner,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(
        &router,
        signed(Method::POST, "/v1/jobs/not-a-uuid/ack", b"", &owner),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn concurrent_polls_deliver_each_job_once() {
    let (router, _) = app();
    let agent = enroll_agent(&router, "agent-01").await;
    create_job(&router, "agent-01", &json!({ "type": "scan" })).await;

    let (a, b) = tokio::join!(poll(&router, &agent), poll(&router, &agent));
    assert_eq!(a.len() + b.len(), 1);
}

#[tokio::test]
async fn poll_caps_the_batch_and_preserves_creation_order() {
    let (router, _) = app();
    let agent = enroll_agent(&router, "agent-01").await;
    let mut ids = Vec::new();
    for _ in 0..5 {
        let (_, created) = create_job(&router, "agent-01", &json!({ "type": "scan" })).await;
        ids.push(created["jobId"].as_str().unwrap().to_string());
    }

    let first = poll(&router, &agent).await;
    assert_eq!(first.len(), 3);
    let second = poll(&router, &agent).await;
    assert_eq!(second.len(), 2);
    assert!(poll(&router, &agent).await.is_empty());

    let delivered: Vec<String> = first
        .iter()
        .chain(second.iter())
        .map(|j| j["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(delivered, ids);
}

#[tokio::test]
async fn unapproved_jobs_wait_for_approval() {
    let (router, state) = app();
    let agent = enroll_agent(&router, "agent-01").await;

    let (_, created) = create_job(
        &router,
        "agent-01",
        &json!({ "type": "update", "requiresApproval": true }),
    )
    .await;
    let job_id = created["jobId"].as_str().unwrap().to_string();

    // Skipped, not claimed.
    assert!(poll(&router, &agent).await.is_empty());
    assert!(poll(&router, &agent).await.is_empty());

    let mut job = state.load_job(&job_id).await.unwrap().unwrap();
    job.approved = true;
    state.save_job(&job).await.unwrap();

    let delivered = poll(&router, &agent).await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["id"], job_id.as_str());
}

#[tokio::test]
async fn job_creation_validates_target_payload_and_type() {
    let (router, _) = app();
    enroll_agent(&router, "agent-01").await;

    // Unknown agent name.
    let (status, _) = create_job(&router, "agent-99", &json!({ "type": "scan" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Script fragment in the payload.
    let (status, _) = create_job(
        &router,
        "agent-01",
        &json!({ "type": "scan", "payload": { "cmd": "<script>alert(1)</script>" } }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Non-object payload.
    let (status, _) = create_job(
        &router,
        "agent-01",
        &json!({ "type": "scan", "payload": [1, 2, 3] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Malformed custom type name.
    let (status, _) = create_job(&router, "agent-01", &json!({ "type": "Not Valid!" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Open job-type enum accepts new snake_case kinds.
    let (status, _) = create_job(&router, "agent-01", &json!({ "type": "rotate_logs" })).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn job_quota_is_enforced_per_tenant() {
    let mut config = base_config();
    config.max_jobs_per_tenant = 2;
    let (router, _) = app_with(config);
    enroll_agent(&router, "agent-01").await;

    for _ in 0..2 {
        let (status, _) = create_job(&router, "agent-01", &json!({ "type": "scan" })).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = create_job(&router, "agent-01", &json!({ "type": "scan" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "quota exceeded");
}
