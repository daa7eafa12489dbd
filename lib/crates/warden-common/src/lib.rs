pub mod store_keys;
pub mod types;
pub mod validation;

pub use store_keys::{
    agent_jobs_key, agent_key, agent_name_key, agent_queue_key, enrollment_key,
    ENROLLMENT_KEY_ALPHABET,
    enrollment_uses_key, job_completion_key, job_key, keys, nonce_key, rate_limit_key,
    tenant_agents_key, tenant_job_count_key, token_key, ttl, validate_enrollment_key_format,
    validate_job_id, validate_nonce, validate_token_format,
};
pub use types::*;
pub use validation::{validate_agent_name, validate_job_payload, validate_job_type_name};
