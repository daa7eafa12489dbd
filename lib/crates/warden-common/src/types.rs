use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Stored status of an agent. `online`/`offline` is derived read-side
/// from `last_heartbeat` and is never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Active,
    Disabled,
}

/// Heartbeats older than this make an agent read as offline.
pub const ONLINE_WINDOW_SECS: i64 = 120;

/// An enrolled agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub tenant_id: String,
    pub agent_name: String,
    pub status: AgentStatus,
    pub enrolled_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl Agent {
    /// Read-side liveness derivation: online iff a heartbeat arrived
    /// within the last two minutes.
    #[must_use]
    pub fn is_online(&self, now: DateTime<Utc>) -> bool {
        self.last_heartbeat
            .is_some_and(|hb| now - hb < Duration::seconds(ONLINE_WINDOW_SECS))
    }
}

/// A limited-use credential that bootstraps an agent's permanent
/// credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentKey {
    pub key: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name_hint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_uses: u32,
    pub current_uses: u32,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_by_agent: Option<String>,
}

impl EnrollmentKey {
    /// Static redeemability check. The authoritative use-count check is
    /// the atomic counter in the store, not this record field.
    #[must_use]
    pub fn is_redeemable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.current_uses < self.max_uses && self.expires_at > now
    }
}

/// Bearer credential + signing secret for one agent. One active record
/// per agent under normal operation.
#[derive(Clone, Serialize, Deserialize)]
pub struct AgentTokenRecord {
    pub agent_id: String,
    pub tenant_id: String,
    /// Never logged, never returned after issuance.
    pub hmac_secret: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for AgentTokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTokenRecord")
            .field("agent_id", &self.agent_id)
            .field("tenant_id", &self.tenant_id)
            .field("hmac_secret", &"<redacted>")
            .field("is_active", &self.is_active)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Forward-only job lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Delivered,
    Done,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// Kind of work addressed to an agent. Known kinds get variants; the
/// payload bag stays open for future kinds via `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobType {
    Scan,
    Update,
    Report,
    Config,
    CollectInfo,
    Other(String),
}

impl JobType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            JobType::Scan => "scan",
            JobType::Update => "update",
            JobType::Report => "report",
            JobType::Config => "config",
            JobType::CollectInfo => "collect_info",
            JobType::Other(s) => s,
        }
    }
}

impl From<&str> for JobType {
    fn from(s: &str) -> Self {
        match s {
            "scan" => JobType::Scan,
            "update" => JobType::Update,
            "report" => JobType::Report,
            "config" => JobType::Config,
            "collect_info" => JobType::CollectInfo,
            other => JobType::Other(other.to_string()),
        }
    }
}

impl Serialize for JobType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(JobType::from(s.as_str()))
    }
}

/// A unit of work issued by an operator for one named agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub tenant_id: String,
    pub agent_name: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

// ── Wire bodies ───────────────────────────────────────────────────────────────

/// Optional system description sent by agents at enrollment/heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueKeyRequest {
    pub agent_name: String,
    #[serde(default)]
    pub expires_in_hours: Option<u32>,
    #[serde(default)]
    pub max_uses: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueKeyResponse {
    pub enrollment_key: String,
    pub expires_at: DateTime<Utc>,
    pub max_uses: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoGenerateRequest {
    pub agent_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoGenerateResponse {
    pub enrollment_key: String,
    pub agent_token: String,
    pub hmac_secret: String,
    pub agent_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    pub enrollment_key: String,
    pub agent_name: String,
    #[serde(default)]
    pub system_info: Option<SystemInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollResponse {
    pub agent_token: String,
    pub hmac_secret: String,
    pub agent_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub system_info: Option<SystemInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub success: bool,
    pub agent: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub agent_name: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: String,
}

/// What `poll-jobs` hands to the agent: the job minus server-side
/// lifecycle bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub approved: bool,
}

impl From<&Job> for JobEnvelope {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            approved: job.approved,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    /// `false` reports a failed execution; the job transitions to
    /// `failed` instead of `done`.
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl Default for AckRequest {
    fn default() -> Self {
        Self {
            success: true,
            message: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameAvailabilityResponse {
    pub available: bool,
}

/// Operator read of a job's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    pub agent_name: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            agent_name: job.agent_name.clone(),
            job_type: job.job_type.clone(),
            status: job.status,
            approved: job.approved,
            created_at: job.created_at,
            delivered_at: job.delivered_at,
            completed_at: job.completed_at,
        }
    }
}

// ── HMAC request headers & signing string ─────────────────────────────────────

/// Header names for agent-authenticated requests.
pub mod headers {
    pub const AGENT_TOKEN: &str = "x-agent-token";
    pub const HMAC_SIGNATURE: &str = "x-hmac-signature";
    pub const TIMESTAMP: &str = "x-timestamp";
    pub const NONCE: &str = "x-nonce";
}

/// Canonical signing string: `"{timestamp}:{nonce}:{body}"` where
/// `timestamp` is milliseconds since epoch as a decimal string and
/// `body` is the exact raw request bytes ("" when absent). The body is
/// never re-serialized, so there is no canonicalization mismatch.
#[must_use]
pub fn signing_string(timestamp_ms: i64, nonce: &str, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(24 + nonce.len() + body.len());
    out.extend_from_slice(timestamp_ms.to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(nonce.as_bytes());
    out.push(b':');
    out.extend_from_slice(body);
    out
}
