//! Connection tasks of one agent.
//!
//! Three loops share the agent's lifetime: the send loop writes routed requests while tokens
//! allow, the recv loop returns tokens and forwards responses, and the toolchain loop keeps the
//! router attachments in step with the agent's advertised set. Whichever ends first ends the
//! others; the finishing task then fails whatever the agent still owed.
use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, trace, warn};

use kcc_model::{CompileRequest, CompileResponse};

use crate::{
    broker::{
        BrokerShared,
        dispatch::Dispatch,
        party::{Agent, ConnectionState},
    },
    error::StreamError,
    guard::write,
    metrics::{Anomaly, PartyRole},
    stream::{BoxSink, BoxSource},
    watch::ToolchainWatch,
};

pub(crate) fn spawn(
    shared: Arc<BrokerShared>,
    agent: Arc<Agent>,
    sink: BoxSink<CompileRequest>,
    source: BoxSource<CompileResponse>,
    output: mpsc::Receiver<CompileRequest>,
    watch: ToolchainWatch,
) {
    let send = tokio::spawn(send_loop(shared.clone(), agent.clone(), sink, output));
    let recv = tokio::spawn(recv_loop(shared.clone(), agent.clone(), source));
    tokio::spawn(follow_toolchains(shared.clone(), agent.clone(), watch));
    tokio::spawn(finish(shared, agent, send, recv));
}

async fn send_loop(
    shared: Arc<BrokerShared>,
    agent: Arc<Agent>,
    mut sink: BoxSink<CompileRequest>,
    mut output: mpsc::Receiver<CompileRequest>,
) {
    loop {
        tokio::select! {
            biased;
            _ = agent.lifetime.cancelled() => break,
            acquired = agent.tokens.acquire() => if acquired.is_err() { break },
        }

        let req = tokio::select! {
            biased;
            _ = agent.lifetime.cancelled() => None,
            next = output.recv() => next,
        };
        let Some(req) = req else {
            let _ = agent.tokens.release();
            break;
        };

        let request = req.request_id.clone();
        agent.track(request.clone());
        trace!(agent = %agent.id.short(), %request, "sending request to agent");

        let sent = tokio::select! {
            biased;
            _ = agent.lifetime.cancelled() => Err(StreamError::Closed),
            sent = sink.send(req) => sent,
        };
        if let Err(e) = sent {
            warn!(agent = %agent.id.short(), %request, error = %e, "failed to send request to agent");
            if agent.untrack(&request) {
                let _ = agent.tokens.release();
                let resp = CompileResponse::internal_error(request, format!("agent stream failed: {e}"));
                shared.enqueue(Dispatch::Correlated(resp)).await;
            }
            break;
        }
    }
    agent.lifetime.cancel();

    // Requests already handed to this agent by its routes but never written. Attachments that
    // are still winding down may hand over one more each; the stream ends once they are gone.
    while let Some(req) = output.recv().await {
        let resp = CompileResponse::internal_error(req.request_id, "agent disconnected before accepting request");
        shared.enqueue(Dispatch::Correlated(resp)).await;
    }
}

async fn recv_loop(shared: Arc<BrokerShared>, agent: Arc<Agent>, mut source: BoxSource<CompileResponse>) {
    loop {
        let next = tokio::select! {
            biased;
            _ = agent.lifetime.cancelled() => break,
            next = source.recv() => next,
        };
        let resp = match next {
            Ok(Some(resp)) => resp,
            Ok(None) => {
                debug!(agent = %agent.id.short(), "agent stream finished");
                break;
            }
            Err(e) => {
                warn!(agent = %agent.id.short(), error = %e, "agent stream failed");
                break;
            }
        };

        if let Err(e) = agent.tokens.release() {
            warn!(agent = %agent.id.short(), request = %resp.request_id, error = %e, "response without a locked token");
            shared.metrics.record_anomaly(Anomaly::TokenImbalance);
        }
        agent.record_completed();
        agent.untrack(&resp.request_id);

        if !shared.enqueue(Dispatch::Correlated(resp)).await {
            break;
        }
    }
    agent.lifetime.cancel();
}

async fn follow_toolchains(shared: Arc<BrokerShared>, agent: Arc<Agent>, mut watch: ToolchainWatch) {
    loop {
        let next = tokio::select! {
            biased;
            _ = agent.lifetime.cancelled() => return,
            next = watch.next() => next,
        };
        let Some(toolchains) = next else {
            debug!(agent = %agent.id.short(), "toolchain watch closed");
            return;
        };
        debug!(agent = %agent.id.short(), count = toolchains.len(), "agent toolchains updated");
        shared.router.update_receiver_toolchains(agent.id, &toolchains);
        agent.set_toolchains(toolchains);
    }
}

async fn finish(shared: Arc<BrokerShared>, agent: Arc<Agent>, send: JoinHandle<()>, recv: JoinHandle<()>) {
    agent.lifetime.cancelled().await;
    agent.state.set(ConnectionState::Draining);
    let _ = send.await;
    let _ = recv.await;

    let lost = agent.drain_in_flight();
    if !lost.is_empty() {
        warn!(agent = %agent.id.short(), count = lost.len(), "failing requests of lost agent");
    }
    for request in lost {
        let resp = CompileResponse::internal_error(request, "agent disconnected before responding");
        shared.enqueue(Dispatch::Correlated(resp)).await;
    }

    {
        let mut agents = write(&shared.agents);
        agents.remove(&agent.id);
        shared.metrics.set_connected(PartyRole::Agent, agents.len());
    }
    shared.watcher.release(agent.id);
    agent.state.set(ConnectionState::Closed);
    info!(agent = %agent.id.short(), completed = agent.completed(), "agent disconnected");
}
