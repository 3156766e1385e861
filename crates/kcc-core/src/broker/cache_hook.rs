use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use kcc_model::{CompileRequest, CompileResponse, Fingerprint};

use crate::{
    broker::{dispatch::Dispatch, pending::PendingTable, stats::CacheStats},
    cache::{CacheClient, CacheError, CacheObject},
    metrics::{CacheOutcome, MetricsHandle},
    router::{HookAction, RouterHook},
};

/// Router hook answering requests from the object cache.
///
/// Every cache failure is treated as a miss: the request is routed to an agent as if no cache
/// were configured.
pub(crate) struct CacheHook {
    client: Option<Arc<dyn CacheClient>>,
    available: AtomicBool,
    timeout: Option<Duration>,
    ttl: Duration,
    pending: Arc<PendingTable>,
    responses: mpsc::Sender<Dispatch>,
    metrics: MetricsHandle,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl CacheHook {
    pub(crate) fn new(
        client: Option<Arc<dyn CacheClient>>,
        timeout: Option<Duration>,
        ttl: Duration,
        pending: Arc<PendingTable>,
        responses: mpsc::Sender<Dispatch>,
        metrics: MetricsHandle,
    ) -> Self {
        Self {
            client,
            available: AtomicBool::new(true),
            timeout,
            ttl,
            pending,
            responses,
            metrics,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    fn enabled(&self) -> Option<&Arc<dyn CacheClient>> {
        self.client
            .as_ref()
            .filter(|_| self.available.load(Ordering::Acquire))
    }

    async fn pull(
        &self,
        client: &Arc<dyn CacheClient>,
        key: &Fingerprint,
    ) -> Result<CacheObject, CacheError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, client.pull(key))
                .await
                .unwrap_or(Err(CacheError::Timeout)),
            None => client.pull(key).await,
        }
    }

    /// Store the object of a successful compile in the background.
    pub(crate) fn write_back(&self, key: Fingerprint, data: Vec<u8>) {
        let Some(client) = self.enabled().cloned() else {
            return;
        };
        let object = CacheObject {
            data,
            expires_at: SystemTime::now().checked_add(self.ttl),
        };
        tokio::spawn(async move {
            match client.push(&key, object).await {
                Ok(()) => debug!(key = %key.short(), "object stored in cache"),
                Err(CacheError::AlreadyExists) => {
                    debug!(key = %key.short(), "object already cached")
                }
                Err(e) => error!(key = %key.short(), error = %e, "failed to store object in cache"),
            }
        });
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.client.is_some(),
            available: self.available.load(Ordering::Acquire),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl RouterHook for CacheHook {
    async fn pre_receive(&self, req: &CompileRequest) -> HookAction {
        let Some(client) = self.enabled() else {
            return HookAction::ProcessNormally;
        };
        let key = match req.fingerprint() {
            Ok(key) => key,
            Err(e) => {
                debug!(request = %req.request_id, error = %e, "request has no cache key");
                return HookAction::ProcessNormally;
            }
        };

        match self.pull(client, &key).await {
            Ok(object) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_cache(CacheOutcome::Hit);
                info!(request = %req.request_id, key = %key.short(), "cache hit");

                let resp = CompileResponse::success(req.request_id.clone(), object.data);
                if self.responses.send(Dispatch::Correlated(resp)).await.is_err() {
                    error!(request = %req.request_id, "response queue closed, routing cached request");
                    return HookAction::ProcessNormally;
                }
                HookAction::Intercepted
            }
            Err(CacheError::NotFound) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_cache(CacheOutcome::Miss);
                debug!(request = %req.request_id, key = %key.short(), "cache miss");
                self.pending.set_cache_key(&req.request_id, key);
                HookAction::ProcessNormally
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_cache(CacheOutcome::Error);
                error!(request = %req.request_id, error = %e, "error querying cache");
                HookAction::ProcessNormally
            }
        }
    }
}
