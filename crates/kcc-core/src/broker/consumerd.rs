//! Connection tasks of one consumerd.
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use kcc_model::{CompileRequest, CompileResponse};

use crate::{
    broker::{
        BrokerShared,
        dispatch::Dispatch,
        party::{ConnectionState, Consumerd},
    },
    guard::write,
    metrics::{Anomaly, PartyRole},
    stream::BoxSource,
    watch::ToolchainWatch,
};

pub(crate) fn spawn(
    shared: Arc<BrokerShared>,
    consumerd: Arc<Consumerd>,
    source: BoxSource<CompileRequest>,
    watch: ToolchainWatch,
) {
    let recv = tokio::spawn(recv_loop(shared.clone(), consumerd.clone(), source));
    tokio::spawn(follow_toolchains(shared.clone(), consumerd.clone(), watch));
    tokio::spawn(finish(shared, consumerd, recv));
}

async fn recv_loop(shared: Arc<BrokerShared>, consumerd: Arc<Consumerd>, mut source: BoxSource<CompileRequest>) {
    loop {
        let next = tokio::select! {
            biased;
            _ = consumerd.lifetime.cancelled() => break,
            next = source.recv() => next,
        };
        match next {
            Ok(Some(req)) => accept(&shared, &consumerd, req).await,
            Ok(None) => {
                debug!(consumerd = %consumerd.id.short(), "consumerd stream finished");
                break;
            }
            Err(e) => {
                warn!(consumerd = %consumerd.id.short(), error = %e, "consumerd stream failed");
                break;
            }
        }
    }
    consumerd.lifetime.cancel();
}

/// Register `req` as pending and route it. Any refusal is answered directly to the requester.
async fn accept(shared: &BrokerShared, consumerd: &Arc<Consumerd>, req: CompileRequest) {
    let request = req.request_id.clone();
    let kind = req
        .toolchain
        .as_ref()
        .map_or("none", |tc| tc.kind.as_str());

    if !shared.pending.insert(request.clone(), consumerd.clone()) {
        warn!(consumerd = %consumerd.id.short(), %request, "request id is already in flight");
        shared.metrics.record_anomaly(Anomaly::DuplicateRequest);
        let response = CompileResponse::internal_error(request, "duplicate request id");
        shared
            .enqueue(Dispatch::Direct {
                to: consumerd.clone(),
                response,
            })
            .await;
        return;
    }
    shared.counters.request_accepted();
    shared.metrics.record_request(kind);
    trace!(consumerd = %consumerd.id.short(), %request, "routing request");

    if let Err(err) = shared.router.send(&consumerd.lifetime, req).await {
        debug!(consumerd = %consumerd.id.short(), %request, error = %err, "failed to route request");
        shared.pending.take(&request);
        shared.counters.request_refused();
        shared.metrics.record_routing_error(err.as_label());
        let response = CompileResponse::internal_error(request, err.to_string());
        shared
            .enqueue(Dispatch::Direct {
                to: consumerd.clone(),
                response,
            })
            .await;
    }
}

async fn follow_toolchains(shared: Arc<BrokerShared>, consumerd: Arc<Consumerd>, mut watch: ToolchainWatch) {
    loop {
        let next = tokio::select! {
            biased;
            _ = consumerd.lifetime.cancelled() => return,
            next = watch.next() => next,
        };
        let Some(toolchains) = next else {
            debug!(consumerd = %consumerd.id.short(), "toolchain watch closed");
            return;
        };
        debug!(consumerd = %consumerd.id.short(), count = toolchains.len(), "consumerd toolchains updated");
        shared.router.update_sender_toolchains(consumerd.id, &toolchains);
        consumerd.set_toolchains(toolchains);
    }
}

async fn finish(shared: Arc<BrokerShared>, consumerd: Arc<Consumerd>, recv: JoinHandle<()>) {
    consumerd.lifetime.cancelled().await;
    consumerd.state.set(ConnectionState::Draining);
    let _ = recv.await;

    // Responses still owed to this consumerd are dropped by the dispatcher once they arrive.
    let orphaned = shared.pending.count_for(consumerd.id);
    if orphaned > 0 {
        warn!(consumerd = %consumerd.id.short(), count = orphaned, "consumerd left with requests in flight");
    }

    {
        let mut consumerds = write(&shared.consumerds);
        consumerds.remove(&consumerd.id);
        shared.metrics.set_connected(PartyRole::Consumerd, consumerds.len());
    }
    shared.watcher.release(consumerd.id);
    consumerd.state.set(ConnectionState::Closed);
    info!(consumerd = %consumerd.id.short(), completed = consumerd.completed(), "consumerd disconnected");
}
