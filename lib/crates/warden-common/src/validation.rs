//! Input screening for operator- and agent-supplied fields.
//!
//! The agent-name policy is defense-in-depth, not merely cosmetic: names
//! end up in store keys, dashboards, and installer output, so anything
//! that could read as markup, a query fragment, or a path component is
//! rejected outright. Callers surface every rejection as a generic 400.

/// Names that must never be claimable by an agent.
pub const RESERVED_AGENT_NAMES: &[&str] = &["admin", "root", "system", "null", "undefined"];

/// Longest allowed run of one repeated character in an agent name.
pub const MAX_CHAR_RUN: usize = 8;

const AGENT_NAME_MIN: usize = 3;
const AGENT_NAME_MAX: usize = 64;

/// Substrings screened out of agent names even though the charset check
/// already excludes most of them. Kept as an independent layer.
const DANGEROUS_SUBSTRINGS: &[&str] = &[
    ";", "'", "\"", "\\", "/", "<", ">", "..", "--", "/*", "*/", "union", "select", "insert",
    "update", "delete", "drop", "script",
];

/// Validate an agent name against the full policy:
/// trimmed non-empty, length 3..=64, charset `[A-Za-z0-9_-]`, no leading
/// or trailing `-`/`_`, no reserved words, no run of more than
/// [`MAX_CHAR_RUN`] identical characters, no SQL/XSS/path metacharacter
/// substrings.
pub fn validate_agent_name(name: &str) -> Result<(), &'static str> {
    let name = name.trim();
    if name.is_empty() {
        return Err("agent name must not be empty");
    }
    if name.len() < AGENT_NAME_MIN || name.len() > AGENT_NAME_MAX {
        return Err("agent name length must be in 3..=64");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err("agent name must use letters, digits, - or _");
    }
    let first = name.chars().next().unwrap_or('-');
    let last = name.chars().last().unwrap_or('-');
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return Err("agent name must start and end with a letter or digit");
    }

    let lowered = name.to_ascii_lowercase();
    if RESERVED_AGENT_NAMES.contains(&lowered.as_str()) {
        return Err("agent name is reserved");
    }
    if max_run_length(name) > MAX_CHAR_RUN {
        return Err("agent name has too many repeated characters");
    }
    for pattern in DANGEROUS_SUBSTRINGS {
        if lowered.contains(pattern) {
            return Err("agent name contains disallowed characters");
        }
    }
    if name.chars().any(|c| c.is_ascii_control()) {
        return Err("agent name contains control characters");
    }
    Ok(())
}

fn max_run_length(s: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous: Option<char> = None;
    for c in s.chars() {
        if previous == Some(c) {
            current += 1;
        } else {
            current = 1;
            previous = Some(c);
        }
        longest = longest.max(current);
    }
    longest
}

/// Markup fragments rejected anywhere inside a serialized job payload.
const PAYLOAD_XSS_PATTERNS: &[&str] = &["<script", "javascript:", "onerror=", "onload="];

/// Screen a job payload: must be a JSON object (or absent/null), fit in
/// `max_bytes` once serialized, and carry no script-injection fragments.
/// The payload stays an open bag otherwise; unknown job types bring
/// unknown shapes by design.
pub fn validate_job_payload(
    payload: &serde_json::Value,
    max_bytes: usize,
) -> Result<(), &'static str> {
    if !payload.is_object() && !payload.is_null() {
        return Err("payload must be a JSON object");
    }
    let serialized = payload.to_string();
    if serialized.len() > max_bytes {
        return Err("payload too large");
    }
    let lowered = serialized.to_ascii_lowercase();
    for pattern in PAYLOAD_XSS_PATTERNS {
        if lowered.contains(pattern) {
            return Err("payload contains disallowed content");
        }
    }
    Ok(())
}

/// Validate a job type name: known kinds always pass; open kinds must be
/// `[a-z0-9_]{1,50}` so they stay display- and key-safe.
pub fn validate_job_type_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() || name.len() > 50 {
        return Err("job type length must be in 1..=50");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err("job type must be lowercase alphanumeric with _");
    }
    Ok(())
}
