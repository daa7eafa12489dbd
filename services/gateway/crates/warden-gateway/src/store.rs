//! The shared-store port and its backends.
//!
//! Every piece of cross-request state (nonce uniqueness, rate-limit
//! counters, job claims, enrollment use counts) lives behind this
//! port as an atomic conditional write. Request handlers never hold
//! in-process state across requests, so the gateway stays correct when
//! many instances run against the same Valkey.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use fred::prelude::*;
use fred::types::Expiration;

/// Atomic store primitives the protocol is built on.
///
/// `claim_once` is SET-NX semantics: among any number of concurrent
/// callers for one key, exactly one receives `true`. `incr_window` is
/// INCR-and-report against a window-scoped counter. Both are the
/// "ClaimOnce / IncrementWindow" seams everything race-sensitive goes
/// through.
#[async_trait]
pub trait ProtocolStore: Send + Sync {
    /// Atomically claim `key`. Returns `true` for the single winner.
    async fn claim_once(&self, key: &str, ttl_secs: Option<i64>) -> Result<bool>;

    /// Atomically increment a windowed counter, setting its expiry on
    /// first touch. Returns the post-increment count.
    async fn incr_window(&self, key: &str, window_secs: i64) -> Result<u64>;

    /// Atomically increment an unbounded counter.
    async fn incr(&self, key: &str) -> Result<u64>;

    /// Atomically decrement a counter (compensation path).
    async fn decr(&self, key: &str) -> Result<u64>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: &str, ttl_secs: Option<i64>) -> Result<()>;

    /// Write only if absent. Returns `true` when this call created the
    /// entry.
    async fn put_nx(&self, key: &str, value: &str, ttl_secs: Option<i64>) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn set_add(&self, key: &str, member: &str) -> Result<()>;

    /// Remove one member. Returns `true` iff this call removed it.
    /// Concurrent removers race and exactly one wins, which makes this
    /// the job-claim primitive.
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    async fn set_card(&self, key: &str) -> Result<u64>;
}

// ===================================================================
// Valkey backend
// ===================================================================

/// Production backend over a Fred Valkey/Redis client.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
}

impl RedisStore {
    /// Connect with the reconnect policy and startup PING check.
    pub async fn connect(url: &str) -> Result<Self> {
        let config = fred::types::config::Config::from_url(url)
            .context("invalid Valkey URL")?;

        let client = Builder::from_config(config)
            .with_connection_config(|conn_config| {
                // Bounded timeouts so a dead Valkey cannot hang requests.
                conn_config.connection_timeout = Duration::from_secs(5);
                conn_config.internal_command_timeout = Duration::from_secs(10);
            })
            .set_policy(ReconnectPolicy::new_exponential(0, 100, 5000, 5))
            .build()?;

        client.init().await?;

        client
            .ping::<String>(None)
            .await
            .context("Valkey startup PING failed")?;

        tracing::info!("Valkey connection ready");
        Ok(Self { client })
    }
}

#[async_trait]
impl ProtocolStore for RedisStore {
    async fn claim_once(&self, key: &str, ttl_secs: Option<i64>) -> Result<bool> {
        // SET NX: a null reply means another caller already owns the key.
        let reply: Value = self
            .client
            .set(
                key,
                "1",
                ttl_secs.map(Expiration::EX),
                Some(SetOptions::NX),
                false,
            )
            .await?;
        Ok(!reply.is_null())
    }

    async fn incr_window(&self, key: &str, window_secs: i64) -> Result<u64> {
        let count: i64 = self.client.incr(key).await?;
        if count == 1 {
            // First touch opens the window; expiry drives the reset.
            self.client.expire::<(), _>(key, window_secs, None).await?;
        }
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        let count: i64 = self.client.incr(key).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn decr(&self, key: &str) -> Result<u64> {
        let count: i64 = self.client.decr(key).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.client.get(key).await?)
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: Option<i64>) -> Result<()> {
        self.client
            .set::<(), _, _>(key, value, ttl_secs.map(Expiration::EX), None, false)
            .await?;
        Ok(())
    }

    async fn put_nx(&self, key: &str, value: &str, ttl_secs: Option<i64>) -> Result<bool> {
        let reply: Value = self
            .client
            .set(
                key,
                value,
                ttl_secs.map(Expiration::EX),
                Some(SetOptions::NX),
                false,
            )
            .await?;
        Ok(!reply.is_null())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client.del::<(), _>(key).await?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.client.sadd::<(), _, _>(key, member).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let removed: i64 = self.client.srem(key, member).await?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.client.smembers(key).await?)
    }

    async fn set_card(&self, key: &str) -> Result<u64> {
        let count: i64 = self.client.scard(key).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

// ===================================================================
// In-process backend
// ===================================================================

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct MemoryInner {
    strings: HashMap<String, Entry>,
    sets: HashMap<String, BTreeSet<String>>,
}

/// Single-process backend for local development and the test suite.
/// Same atomicity guarantees as the Valkey backend (one mutex stands in
/// for Redis's single-threaded command loop), but state is lost on
/// restart and never shared across instances.
#[derive(Default)]
pub struct MemoryStore {
    inner: std::sync::Mutex<MemoryInner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory store mutex poisoned"))
    }
}

fn ttl_deadline(ttl_secs: Option<i64>) -> Option<Instant> {
    ttl_secs.and_then(|secs| u64::try_from(secs).ok().map(|s| Instant::now() + Duration::from_secs(s)))
}

fn purge_if_expired(strings: &mut HashMap<String, Entry>, key: &str) {
    let now = Instant::now();
    if strings.get(key).is_some_and(|entry| entry.is_expired(now)) {
        strings.remove(key);
    }
}

#[async_trait]
impl ProtocolStore for MemoryStore {
    async fn claim_once(&self, key: &str, ttl_secs: Option<i64>) -> Result<bool> {
        self.put_nx(key, "1", ttl_secs).await
    }

    async fn incr_window(&self, key: &str, window_secs: i64) -> Result<u64> {
        let mut inner = self.lock()?;
        purge_if_expired(&mut inner.strings, key);
        match inner.strings.get_mut(key) {
            Some(entry) => {
                let count = entry.value.parse::<u64>().unwrap_or(0) + 1;
                entry.value = count.to_string();
                Ok(count)
            }
            None => {
                inner.strings.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: ttl_deadline(Some(window_secs)),
                    },
                );
                Ok(1)
            }
        }
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        let mut inner = self.lock()?;
        purge_if_expired(&mut inner.strings, key);
        match inner.strings.get_mut(key) {
            Some(entry) => {
                let count = entry.value.parse::<u64>().unwrap_or(0) + 1;
                entry.value = count.to_string();
                Ok(count)
            }
            None => {
                inner.strings.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn decr(&self, key: &str) -> Result<u64> {
        let mut inner = self.lock()?;
        purge_if_expired(&mut inner.strings, key);
        match inner.strings.get_mut(key) {
            Some(entry) => {
                let count = entry.value.parse::<u64>().unwrap_or(0).saturating_sub(1);
                entry.value = count.to_string();
                Ok(count)
            }
            None => {
                inner.strings.insert(
                    key.to_string(),
                    Entry {
                        value: "0".to_string(),
                        expires_at: None,
                    },
                );
                Ok(0)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.lock()?;
        purge_if_expired(&mut inner.strings, key);
        Ok(inner.strings.get(key).map(|entry| entry.value.clone()))
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: Option<i64>) -> Result<()> {
        let mut inner = self.lock()?;
        inner.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl_deadline(ttl_secs),
            },
        );
        Ok(())
    }

    async fn put_nx(&self, key: &str, value: &str, ttl_secs: Option<i64>) -> Result<bool> {
        let mut inner = self.lock()?;
        purge_if_expired(&mut inner.strings, key);
        if inner.strings.contains_key(key) {
            return Ok(false);
        }
        inner.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl_deadline(ttl_secs),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.strings.remove(key);
        inner.sets.remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        Ok(inner
            .sets
            .get_mut(key)
            .is_some_and(|set| set.remove(member)))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let inner = self.lock()?;
        Ok(inner
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_card(&self, key: &str) -> Result<u64> {
        let inner = self.lock()?;
        Ok(inner.sets.get(key).map(|set| set.len() as u64).unwrap_or(0))
    }
}
