//! Application state shared by all handlers: configuration, the
//! operator token table, and typed record access over the store port.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use warden_common::{
    agent_key, enrollment_key, job_key, token_key, Agent, AgentTokenRecord, EnrollmentKey, Job,
};

use crate::config::{Config, StoreBackend};
use crate::store::{MemoryStore, ProtocolStore, RedisStore};

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    operator_tokens: Arc<HashMap<String, String>>,
    store: Arc<dyn ProtocolStore>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn ProtocolStore>) -> Self {
        let operator_tokens = Arc::new(config.operator_token_map());
        Self {
            config: Arc::new(config),
            operator_tokens,
            store,
        }
    }

    /// Build the state with the backend the config selects.
    pub async fn from_config(config: Config) -> Result<Self> {
        let store: Arc<dyn ProtocolStore> = match config.store_backend {
            StoreBackend::Redis => Arc::new(
                RedisStore::connect(&config.valkey_url)
                    .await
                    .context("failed to initialise Valkey connection")?,
            ),
            StoreBackend::Memory => {
                tracing::warn!("memory store selected: single instance only, state is volatile");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::new(config, store))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn ProtocolStore {
        self.store.as_ref()
    }

    /// Resolve an operator bearer token to its tenant.
    #[must_use]
    pub fn operator_tenant(&self, bearer: &str) -> Option<&str> {
        self.operator_tokens.get(bearer).map(String::as_str)
    }

    // Typed record access.

    pub async fn load_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        self.load_record(&agent_key(agent_id)).await
    }

    pub async fn save_agent(&self, agent: &Agent) -> Result<()> {
        self.save_record(&agent_key(&agent.id), agent, None).await
    }

    pub async fn load_token(&self, token: &str) -> Result<Option<AgentTokenRecord>> {
        self.load_record(&token_key(token)).await
    }

    pub async fn save_token(
        &self,
        token: &str,
        record: &AgentTokenRecord,
        ttl_secs: Option<i64>,
    ) -> Result<()> {
        self.save_record(&token_key(token), record, ttl_secs).await
    }

    pub async fn load_enrollment_key(&self, key: &str) -> Result<Option<EnrollmentKey>> {
        self.load_record(&enrollment_key(key)).await
    }

    pub async fn save_enrollment_key(
        &self,
        record: &EnrollmentKey,
        ttl_secs: Option<i64>,
    ) -> Result<()> {
        self.save_record(&enrollment_key(&record.key), record, ttl_secs)
            .await
    }

    pub async fn load_job(&self, job_id: &str) -> Result<Option<Job>> {
        self.load_record(&job_key(job_id)).await
    }

    pub async fn save_job(&self, job: &Job) -> Result<()> {
        self.save_record(&job_key(&job.id), job, None).await
    }

    async fn load_record<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(json) => {
                let record = serde_json::from_str(&json)
                    .with_context(|| format!("malformed record at {key}"))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn save_record<T: serde::Serialize>(
        &self,
        key: &str,
        record: &T,
        ttl_secs: Option<i64>,
    ) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.store.put(key, &json, ttl_secs).await
    }
}
