//! Caching, batching client for the identifier authority service.

pub mod cache;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use idmapper_core::{ResolutionCacheEntry, ResolutionType};

pub use cache::ResolutionCache;

use crate::config::ResolverConfig;
use crate::observability::{emit_counter, emit_histogram, MetricName};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    /// Worth retrying: timeouts, throttling, server-side failures
    #[error("transient authority failure: {0}")]
    Transient(String),

    #[error("authority rejected request: {0}")]
    Permanent(String),
}

/// One answer from the authority service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityRecord {
    pub query_id: String,
    #[serde(default)]
    pub resolved_id: Option<String>,
    pub resolution_type: ResolutionType,
}

impl AuthorityRecord {
    pub fn new(query_id: impl Into<String>, resolved_id: Option<&str>, resolution_type: ResolutionType) -> Self {
        Self {
            query_id: query_id.into(),
            resolved_id: resolved_id.map(str::to_string),
            resolution_type,
        }
    }
}

/// Port for the external identifier-history service
#[async_trait]
pub trait AuthorityService: Send + Sync {
    async fn lookup(&self, ids: &[String]) -> Result<Vec<AuthorityRecord>, AuthorityError>;
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub batch_timeout: Duration,
    pub concurrency: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::from(&ResolverConfig::default())
    }
}

impl From<&ResolverConfig> for ResolverSettings {
    fn from(config: &ResolverConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            batch_timeout: config.batch_timeout(),
            concurrency: config.concurrency.max(1),
        }
    }
}

/// Resolves identifiers through an [`AuthorityService`], consulting the cache first.
///
/// Service failures never surface as errors: after the last retry the affected ids
/// come back as `unresolved` and are left out of the cache so a later call can try
/// again.
pub struct ExternalResolverClient {
    service: Arc<dyn AuthorityService>,
    cache: Arc<ResolutionCache>,
    settings: ResolverSettings,
    permits: Arc<Semaphore>,
    // Serializes fetches so overlapping calls never request the same id twice
    fetch_gate: Mutex<()>,
}

impl ExternalResolverClient {
    /// Client backed by the process-wide cache
    pub fn new(service: Arc<dyn AuthorityService>, settings: ResolverSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.concurrency));
        Self {
            service,
            cache: ResolutionCache::shared(),
            settings,
            permits,
            fetch_gate: Mutex::new(()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResolutionCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Resolve every distinct, non-blank id in `ids`. The returned map has one entry per such id.
    pub async fn resolve_batch(&self, ids: &[String]) -> HashMap<String, ResolutionCacheEntry> {
        let mut seen = HashSet::new();
        let distinct: Vec<String> = ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty() && seen.insert(id.to_string()))
            .map(str::to_string)
            .collect();

        let mut resolved = HashMap::with_capacity(distinct.len());
        let mut uncached = self.take_cached(distinct, &mut resolved);
        if uncached.is_empty() {
            return resolved;
        }

        let _gate = self.fetch_gate.lock().await;
        // Another call may have filled these while we waited
        uncached = self.take_cached(uncached, &mut resolved);
        if uncached.is_empty() {
            return resolved;
        }

        info!(
            "🔎 Resolving {} identifiers against authority ({} already cached)",
            uncached.len(),
            resolved.len()
        );
        emit_counter(MetricName::ResolverIdsRequested, uncached.len() as u64);

        let mut tasks = JoinSet::new();
        for chunk in uncached.chunks(self.settings.batch_size) {
            let chunk = chunk.to_vec();
            let service = self.service.clone();
            let permits = self.permits.clone();
            let settings = self.settings.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let started = Instant::now();
                let outcome = fetch_with_retry(service.as_ref(), &chunk, &settings).await;
                emit_histogram(MetricName::ResolverBatchDuration, started.elapsed().as_secs_f64());
                (chunk, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (chunk, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!("Resolver batch task did not finish: {}", e);
                    continue;
                }
            };
            match outcome {
                Ok(records) => self.store_batch(&chunk, records, &mut resolved),
                Err(e) => {
                    warn!("⚠️ Authority lookup for {} ids gave up: {}", chunk.len(), e);
                }
            }
        }

        // Anything still missing failed outright; report it unresolved without caching
        let mut unresolved = 0u64;
        for id in uncached {
            if !resolved.contains_key(&id) {
                unresolved += 1;
                resolved.insert(id.clone(), ResolutionCacheEntry::unresolved(id));
            }
        }
        if unresolved > 0 {
            emit_counter(MetricName::ResolverUnresolved, unresolved);
        }

        resolved
    }

    fn take_cached(&self, ids: Vec<String>, resolved: &mut HashMap<String, ResolutionCacheEntry>) -> Vec<String> {
        let mut uncached = Vec::new();
        let mut hits = 0u64;
        for id in ids {
            match self.cache.get(&id) {
                Some(entry) => {
                    hits += 1;
                    resolved.insert(id, entry);
                }
                None => uncached.push(id),
            }
        }
        if hits > 0 {
            emit_counter(MetricName::ResolverCacheHits, hits);
        }
        uncached
    }

    fn store_batch(
        &self,
        chunk: &[String],
        records: Vec<AuthorityRecord>,
        resolved: &mut HashMap<String, ResolutionCacheEntry>,
    ) {
        let requested: HashSet<&str> = chunk.iter().map(String::as_str).collect();
        for record in records {
            if !requested.contains(record.query_id.as_str()) {
                debug!("Ignoring authority answer for unrequested id {}", record.query_id);
                continue;
            }
            let entry = ResolutionCacheEntry::new(record.query_id, record.resolved_id, record.resolution_type);
            self.cache.insert(entry.clone());
            resolved.insert(entry.query_id.clone(), entry);
        }

        let mut unanswered = 0u64;
        for id in chunk {
            if !resolved.contains_key(id) {
                unanswered += 1;
                let entry = ResolutionCacheEntry::unresolved(id.clone());
                self.cache.insert(entry.clone());
                resolved.insert(id.clone(), entry);
            }
        }
        if unanswered > 0 {
            emit_counter(MetricName::ResolverUnresolved, unanswered);
        }
    }
}

/// Backoff before retry number `retry` (1-based), doubling from `initial` up to `max`.
pub fn backoff_delay(retry: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(retry.saturating_sub(1));
    initial.saturating_mul(factor).min(max)
}

async fn fetch_with_retry(
    service: &dyn AuthorityService,
    chunk: &[String],
    settings: &ResolverSettings,
) -> Result<Vec<AuthorityRecord>, AuthorityError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        emit_counter(MetricName::ResolverRequests, 1);
        let error = match tokio::time::timeout(settings.batch_timeout, service.lookup(chunk)).await {
            Ok(Ok(records)) => return Ok(records),
            Ok(Err(AuthorityError::Permanent(message))) => return Err(AuthorityError::Permanent(message)),
            Ok(Err(transient)) => transient,
            Err(_) => AuthorityError::Transient(format!("no response within {:?}", settings.batch_timeout)),
        };

        if attempt >= settings.max_attempts {
            return Err(error);
        }
        let delay = backoff_delay(attempt, settings.initial_backoff, settings.max_backoff);
        debug!("Attempt {}/{} failed ({}), retrying in {:?}", attempt, settings.max_attempts, error, delay);
        emit_counter(MetricName::ResolverRetries, 1);
        tokio::time::sleep(delay).await;
    }
}
