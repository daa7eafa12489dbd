//! Gateway configuration loaded from environment variables via `envy`.
//!
//! Each field maps to `WARDEN_GW_<FIELD>`, e.g. `WARDEN_GW_LISTEN_ADDR`
//! or `WARDEN_GW_CLOCK_SKEW_SECS`. Every field has a default except
//! `operator_tokens`, which must be set for operator endpoints to work.

use std::collections::HashMap;

use serde::Deserialize;

/// Which `ProtocolStore` backend to run against.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Valkey/Redis, the only backend safe for multi-instance
    /// deployments.
    #[default]
    Redis,
    /// In-process store for local development and tests. Single
    /// instance only.
    Memory,
}

/// A `(max_requests, window_seconds)` policy for one endpoint class.
#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    pub max_requests: u64,
    pub window_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Socket address to bind the HTTP server to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Valkey (Redis-compatible) connection URL.
    #[serde(default = "default_valkey_url")]
    pub valkey_url: String,

    /// Store backend selector (`redis` or `memory`).
    #[serde(default)]
    pub store_backend: StoreBackend,

    /// Maximum tolerated |now - X-Timestamp| on signed requests.
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: i64,

    /// Default lifetime of an issued enrollment key.
    #[serde(default = "default_key_ttl_hours")]
    pub enrollment_key_ttl_hours: u32,

    /// Lifetime of an issued agent token.
    #[serde(default = "default_token_ttl_days")]
    pub agent_token_ttl_days: u32,

    /// Tenant quota: enrolled agents.
    #[serde(default = "default_max_agents")]
    pub max_agents_per_tenant: u64,

    /// Tenant quota: total created jobs.
    #[serde(default = "default_max_jobs")]
    pub max_jobs_per_tenant: u64,

    /// Serialized job payload size cap in bytes.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Jobs handed out per poll.
    #[serde(default = "default_poll_batch")]
    pub poll_batch: usize,

    // Per-class rate limits. Heartbeat default matches a 60s beat
    // interval plus retry margin.
    #[serde(default = "default_heartbeat_rate_max")]
    pub heartbeat_rate_max: u64,
    #[serde(default = "default_minute_window")]
    pub heartbeat_rate_window_secs: i64,

    #[serde(default = "default_poll_rate_max")]
    pub poll_rate_max: u64,
    #[serde(default = "default_minute_window")]
    pub poll_rate_window_secs: i64,

    #[serde(default = "default_ack_rate_max")]
    pub ack_rate_max: u64,
    #[serde(default = "default_minute_window")]
    pub ack_rate_window_secs: i64,

    #[serde(default = "default_enroll_rate_max")]
    pub enroll_rate_max: u64,
    #[serde(default = "default_enroll_rate_window_secs")]
    pub enroll_rate_window_secs: i64,

    /// Operator bearer tokens as `token=tenant_id` pairs, comma
    /// separated. Empty disables all operator endpoints.
    #[serde(default)]
    pub operator_tokens: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_valkey_url() -> String {
    "redis://valkey:6379".to_string()
}

fn default_clock_skew_secs() -> i64 {
    300
}

fn default_key_ttl_hours() -> u32 {
    24
}

fn default_token_ttl_days() -> u32 {
    365
}

fn default_max_agents() -> u64 {
    100
}

fn default_max_jobs() -> u64 {
    10_000
}

fn default_max_payload_bytes() -> usize {
    32 * 1024
}

fn default_poll_batch() -> usize {
    3
}

fn default_heartbeat_rate_max() -> u64 {
    3
}

fn default_poll_rate_max() -> u64 {
    12
}

fn default_ack_rate_max() -> u64 {
    30
}

fn default_enroll_rate_max() -> u64 {
    5
}

fn default_minute_window() -> i64 {
    60
}

fn default_enroll_rate_window_secs() -> i64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            valkey_url: default_valkey_url(),
            store_backend: StoreBackend::default(),
            clock_skew_secs: default_clock_skew_secs(),
            enrollment_key_ttl_hours: default_key_ttl_hours(),
            agent_token_ttl_days: default_token_ttl_days(),
            max_agents_per_tenant: default_max_agents(),
            max_jobs_per_tenant: default_max_jobs(),
            max_payload_bytes: default_max_payload_bytes(),
            poll_batch: default_poll_batch(),
            heartbeat_rate_max: default_heartbeat_rate_max(),
            heartbeat_rate_window_secs: default_minute_window(),
            poll_rate_max: default_poll_rate_max(),
            poll_rate_window_secs: default_minute_window(),
            ack_rate_max: default_ack_rate_max(),
            ack_rate_window_secs: default_minute_window(),
            enroll_rate_max: default_enroll_rate_max(),
            enroll_rate_window_secs: default_enroll_rate_window_secs(),
            operator_tokens: String::new(),
        }
    }
}

impl Config {
    /// Load from `WARDEN_GW_*` environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("WARDEN_GW_").from_env()
    }

    /// Parse the operator token table. Malformed pairs are skipped with
    /// a warning rather than refusing startup.
    #[must_use]
    pub fn operator_token_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for pair in self.operator_tokens.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            match pair.split_once('=') {
                Some((token, tenant)) if !token.is_empty() && !tenant.is_empty() => {
                    map.insert(token.to_string(), tenant.to_string());
                }
                _ => {
                    tracing::warn!("skipping malformed operator token entry");
                }
            }
        }
        map
    }

    #[must_use]
    pub fn rate_policy(&self, class: EndpointClass) -> RatePolicy {
        match class {
            EndpointClass::Heartbeat => RatePolicy {
                max_requests: self.heartbeat_rate_max,
                window_secs: self.heartbeat_rate_window_secs,
            },
            EndpointClass::PollJobs => RatePolicy {
                max_requests: self.poll_rate_max,
                window_secs: self.poll_rate_window_secs,
            },
            EndpointClass::AckJob => RatePolicy {
                max_requests: self.ack_rate_max,
                window_secs: self.ack_rate_window_secs,
            },
            EndpointClass::Enrollment => RatePolicy {
                max_requests: self.enroll_rate_max,
                window_secs: self.enroll_rate_window_secs,
            },
        }
    }
}

/// Endpoint classes with independent rate-limit policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    Heartbeat,
    PollJobs,
    AckJob,
    Enrollment,
}

impl EndpointClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointClass::Heartbeat => "heartbeat",
            EndpointClass::PollJobs => "poll-jobs",
            EndpointClass::AckJob => "ack-job",
            EndpointClass::Enrollment => "enrollment",
        }
    }
}
