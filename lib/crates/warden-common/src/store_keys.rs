/// Valkey key prefixes for warden protocol state
pub mod keys {
    /// Enrollment key records
    /// Format: warden:enroll:{key}
    /// Value: JSON-serialized EnrollmentKey
    /// TTL: key lifetime + grace
    pub const ENROLLMENT: &str = "warden:enroll";

    /// Atomic redemption counter for an enrollment key
    /// Format: warden:enroll:{key}:uses
    /// Value: integer, INCR-and-check against max_uses
    pub const ENROLLMENT_USES_SUFFIX: &str = "uses";

    /// Agent records
    /// Format: warden:agent:{agent_id}
    /// Value: JSON-serialized Agent
    pub const AGENT: &str = "warden:agent";

    /// Per-tenant agent-name uniqueness reservation
    /// Format: warden:agent-name:{tenant_id}:{agent_name}
    /// Value: agent_id, written with SET NX
    pub const AGENT_NAME: &str = "warden:agent-name";

    /// Per-tenant agent roster (set of agent ids, quota via SCARD)
    /// Format: warden:tenant:{tenant_id}:agents
    pub const TENANT_AGENTS: &str = "warden:tenant";

    /// Agent token records, addressed by the opaque bearer token
    /// Format: warden:token:{token}
    /// Value: JSON-serialized AgentTokenRecord
    pub const TOKEN: &str = "warden:token";

    /// Job records
    /// Format: warden:job:{job_id}
    /// Value: JSON-serialized Job
    pub const JOB: &str = "warden:job";

    /// Accepted-nonce claims within the replay window
    /// Format: warden:nonce:{agent_id}:{nonce}
    /// Value: timestamp, written with SET NX; TTL: 2x clock skew
    pub const NONCE: &str = "warden:nonce";

    /// Windowed rate-limit counters
    /// Format: warden:rl:{class}:{identity}:{window_index}
    /// Value: integer; TTL: window length
    pub const RATE_LIMIT: &str = "warden:rl";
}

/// TTL constants (seconds)
pub mod ttl {
    /// Grace kept on an enrollment key record past its expiry so that a
    /// late redeemer gets a deterministic "expired" instead of "unknown".
    pub const ENROLLMENT_GRACE_SECS: i64 = 3600;

    /// Nonce claims outlive the clock-skew window on both sides.
    pub const NONCE_SKEW_MULTIPLIER: i64 = 2;
}

/// Characters used in generated enrollment keys.
pub const ENROLLMENT_KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Enrollment keys are 4 dash-joined groups of 4: `XXXX-XXXX-XXXX-XXXX`.
pub const ENROLLMENT_KEY_LEN: usize = 19;

// ── Key constructors ──────────────────────────────────────────────────────────

#[must_use]
pub fn enrollment_key(key: &str) -> String {
    format!("{}:{}", keys::ENROLLMENT, key)
}

#[must_use]
pub fn enrollment_uses_key(key: &str) -> String {
    format!(
        "{}:{}:{}",
        keys::ENROLLMENT,
        key,
        keys::ENROLLMENT_USES_SUFFIX
    )
}

#[must_use]
pub fn agent_key(agent_id: &str) -> String {
    format!("{}:{}", keys::AGENT, agent_id)
}

#[must_use]
pub fn agent_name_key(tenant_id: &str, agent_name: &str) -> String {
    format!("{}:{}:{}", keys::AGENT_NAME, tenant_id, agent_name)
}

#[must_use]
pub fn tenant_agents_key(tenant_id: &str) -> String {
    format!("{}:{}:agents", keys::TENANT_AGENTS, tenant_id)
}

#[must_use]
pub fn tenant_job_count_key(tenant_id: &str) -> String {
    format!("{}:{}:job-count", keys::TENANT_AGENTS, tenant_id)
}

#[must_use]
pub fn token_key(token: &str) -> String {
    format!("{}:{}", keys::TOKEN, token)
}

#[must_use]
pub fn job_key(job_id: &str) -> String {
    format!("{}:{}", keys::JOB, job_id)
}

/// Completion claim for a job's single `Done`/`Failed` transition.
#[must_use]
pub fn job_completion_key(job_id: &str) -> String {
    format!("{}:{}:completed", keys::JOB, job_id)
}

/// Set of `Queued` job ids awaiting delivery to an agent.
#[must_use]
pub fn agent_queue_key(agent_id: &str) -> String {
    format!("{}:{}:queue", keys::AGENT, agent_id)
}

/// Set of all job ids ever addressed to an agent (operator listing).
#[must_use]
pub fn agent_jobs_key(agent_id: &str) -> String {
    format!("{}:{}:jobs", keys::AGENT, agent_id)
}

#[must_use]
pub fn nonce_key(agent_id: &str, nonce: &str) -> String {
    format!("{}:{}:{}", keys::NONCE, agent_id, nonce)
}

#[must_use]
pub fn rate_limit_key(class: &str, identity: &str, window_index: i64) -> String {
    format!("{}:{}:{}:{}", keys::RATE_LIMIT, class, identity, window_index)
}

// ── Format validators for untrusted identifiers ───────────────────────────────
//
// Always called before building a store key from caller-supplied input.
// Prevents oversized keys, namespace injection, and malformed ids.

/// Validate an enrollment key: `XXXX-XXXX-XXXX-XXXX` over `[A-Z0-9]`.
pub fn validate_enrollment_key_format(key: &str) -> Result<(), &'static str> {
    if key.len() != ENROLLMENT_KEY_LEN {
        return Err("enrollment key must be exactly 19 characters");
    }
    for (i, c) in key.chars().enumerate() {
        if i % 5 == 4 {
            if c != '-' {
                return Err("enrollment key groups must be dash-separated");
            }
        } else if !c.is_ascii_uppercase() && !c.is_ascii_digit() {
            return Err("enrollment key must use uppercase letters and digits");
        }
    }
    Ok(())
}

/// Validate a client-supplied nonce: 1..=128 chars of `[A-Za-z0-9_-]`.
/// UUIDs pass; anything that could distort a store key does not.
pub fn validate_nonce(nonce: &str) -> Result<(), &'static str> {
    if nonce.is_empty() || nonce.len() > 128 {
        return Err("nonce length must be in 1..=128");
    }
    if !nonce
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err("nonce must be alphanumeric with - or _");
    }
    Ok(())
}

/// Validate a job id: lowercase hyphenated UUID shape.
pub fn validate_job_id(job_id: &str) -> Result<(), &'static str> {
    if job_id.len() != 36 {
        return Err("job id must be a 36-character UUID");
    }
    for (i, c) in job_id.chars().enumerate() {
        if matches!(i, 8 | 13 | 18 | 23) {
            if c != '-' {
                return Err("job id must be hyphenated at UUID positions");
            }
        } else if !c.is_ascii_hexdigit() || c.is_ascii_uppercase() {
            return Err("job id must be lowercase hex");
        }
    }
    Ok(())
}

/// Validate an agent bearer token: 1..=128 chars of `[a-f0-9-]`.
pub fn validate_token_format(token: &str) -> Result<(), &'static str> {
    if token.is_empty() || token.len() > 128 {
        return Err("token length must be in 1..=128");
    }
    if !token
        .chars()
        .all(|c| (c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) || c == '-')
    {
        return Err("token must be lowercase hex");
    }
    Ok(())
}
