use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use kcc_model::{CompileResponse, CompileResult};

use crate::{
    broker::{BrokerShared, party::Consumerd},
    metrics::Anomaly,
};

/// Item on the shared response queue.
pub(crate) enum Dispatch {
    /// Response from an agent or the cache, matched to its requester by request id.
    Correlated(CompileResponse),
    /// Failure synthesized for a request that never became pending or was already resolved.
    Direct {
        to: Arc<Consumerd>,
        response: CompileResponse,
    },
}

/// Drain the response queue until the broker shuts down.
pub(crate) async fn run(shared: Arc<BrokerShared>, mut queue: mpsc::Receiver<Dispatch>) {
    loop {
        let item = tokio::select! {
            biased;
            _ = shared.lifetime.cancelled() => break,
            item = queue.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        match item {
            Dispatch::Correlated(resp) => resolve(&shared, resp).await,
            Dispatch::Direct { to, response } => {
                shared.metrics.record_response(response.result);
                deliver(&to, response).await;
            }
        }
    }
    debug!("response dispatcher stopped");
}

async fn resolve(shared: &BrokerShared, resp: CompileResponse) {
    let Some(pending) = shared.pending.take(&resp.request_id) else {
        error!(request = %resp.request_id, "received response for which there was no pending request");
        shared.metrics.record_anomaly(Anomaly::UnmatchedResponse);
        return;
    };

    pending.requester.record_completed();
    match resp.result {
        CompileResult::Success => {
            shared.counters.completed();
            if let (Some(key), Some(object)) = (pending.cache_key, resp.compiled_source()) {
                shared.cache.write_back(key, object.to_vec());
            }
        }
        CompileResult::Fail | CompileResult::InternalError => shared.counters.failed(),
    }
    shared.metrics.record_response(resp.result);
    deliver(&pending.requester, resp).await;
}

async fn deliver(to: &Consumerd, resp: CompileResponse) {
    let request = resp.request_id.clone();
    match to.deliver(resp).await {
        Ok(()) => trace!(consumerd = %to.id.short(), %request, "response delivered"),
        Err(e) => warn!(consumerd = %to.id.short(), %request, error = %e, "could not deliver response"),
    }
}
