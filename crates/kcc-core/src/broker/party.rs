use std::{
    collections::HashSet,
    sync::{
        Mutex, RwLock,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use kcc_model::{CompileRequest, CompileResponse, PartyId, RequestId, Toolchains, UsageLimits};

use crate::{
    broker::tokens::TokenBucket,
    error::StreamError,
    guard::{lock, read, write},
    stream::{BoxSink, BoxSource},
};

/// Lifecycle of a connection as seen by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// Registered, waiting for the first toolchain set.
    Connecting,
    /// Attached to the router and exchanging messages.
    Streaming,
    /// Lifetime ended; loops are winding down and in-flight work is being failed.
    Draining,
    /// Fully removed from the broker.
    Closed,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Streaming,
            2 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }
}

pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Connecting as u8))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Streams and limits of an agent handing itself to [`crate::Broker::new_agent_stream`].
pub struct AgentConnection {
    pub id: PartyId,
    pub usage: UsageLimits,
    /// Requests towards the agent.
    pub sink: BoxSink<CompileRequest>,
    /// Responses from the agent.
    pub source: BoxSource<CompileResponse>,
}

impl AgentConnection {
    pub fn new(
        id: PartyId,
        usage: UsageLimits,
        sink: BoxSink<CompileRequest>,
        source: BoxSource<CompileResponse>,
    ) -> Self {
        Self {
            id,
            usage,
            sink,
            source,
        }
    }
}

/// Streams of a consumerd handing itself to [`crate::Broker::new_consumerd_stream`].
pub struct ConsumerdConnection {
    pub id: PartyId,
    /// Responses towards the consumerd.
    pub sink: BoxSink<CompileResponse>,
    /// Requests from the consumerd.
    pub source: BoxSource<CompileRequest>,
}

impl ConsumerdConnection {
    pub fn new(
        id: PartyId,
        sink: BoxSink<CompileResponse>,
        source: BoxSource<CompileRequest>,
    ) -> Self {
        Self { id, sink, source }
    }
}

/// Handle to an accepted connection.
///
/// Dropping the session does not close the connection; it lives until its stream ends,
/// [`Session::close`] is called or the broker shuts down.
#[derive(Debug, Clone)]
pub struct Session {
    id: PartyId,
    lifetime: CancellationToken,
}

impl Session {
    pub(crate) fn new(id: PartyId, lifetime: CancellationToken) -> Self {
        Self { id, lifetime }
    }

    pub fn id(&self) -> PartyId {
        self.id
    }

    /// End the connection.
    pub fn close(&self) {
        self.lifetime.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.lifetime.is_cancelled()
    }

    /// Wait until the connection's lifetime has ended.
    pub async fn closed(&self) {
        self.lifetime.cancelled().await;
    }
}

pub(crate) struct Agent {
    pub(crate) id: PartyId,
    pub(crate) lifetime: CancellationToken,
    pub(crate) usage: UsageLimits,
    pub(crate) tokens: TokenBucket,
    pub(crate) state: StateCell,
    completed: AtomicU64,
    in_flight: Mutex<HashSet<RequestId>>,
    toolchains: RwLock<Toolchains>,
}

impl Agent {
    pub(crate) fn new(
        id: PartyId,
        lifetime: CancellationToken,
        usage: UsageLimits,
        tokens: usize,
    ) -> Self {
        Self {
            id,
            lifetime,
            usage,
            tokens: TokenBucket::new(tokens),
            state: StateCell::new(),
            completed: AtomicU64::new(0),
            in_flight: Mutex::new(HashSet::new()),
            toolchains: RwLock::new(Toolchains::default()),
        }
    }

    pub(crate) fn track(&self, id: RequestId) {
        lock(&self.in_flight).insert(id);
    }

    pub(crate) fn untrack(&self, id: &RequestId) -> bool {
        lock(&self.in_flight).remove(id)
    }

    /// Take every request written to the agent and not yet answered.
    pub(crate) fn drain_in_flight(&self) -> Vec<RequestId> {
        lock(&self.in_flight).drain().collect()
    }

    pub(crate) fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub(crate) fn set_toolchains(&self, toolchains: Toolchains) {
        *write(&self.toolchains) = toolchains;
    }

    pub(crate) fn toolchain_count(&self) -> usize {
        read(&self.toolchains).len()
    }
}

pub(crate) struct Consumerd {
    pub(crate) id: PartyId,
    pub(crate) lifetime: CancellationToken,
    pub(crate) state: StateCell,
    sink: AsyncMutex<BoxSink<CompileResponse>>,
    completed: AtomicU64,
    toolchains: RwLock<Toolchains>,
}

impl Consumerd {
    pub(crate) fn new(
        id: PartyId,
        lifetime: CancellationToken,
        sink: BoxSink<CompileResponse>,
    ) -> Self {
        Self {
            id,
            lifetime,
            state: StateCell::new(),
            sink: AsyncMutex::new(sink),
            completed: AtomicU64::new(0),
            toolchains: RwLock::new(Toolchains::default()),
        }
    }

    /// Write a response to the consumerd. Gives up once its lifetime has ended.
    pub(crate) async fn deliver(&self, resp: CompileResponse) -> Result<(), StreamError> {
        if self.lifetime.is_cancelled() {
            return Err(StreamError::Closed);
        }
        let mut sink = self.sink.lock().await;
        tokio::select! {
            biased;
            _ = self.lifetime.cancelled() => Err(StreamError::Closed),
            res = sink.send(resp) => res,
        }
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub(crate) fn set_toolchains(&self, toolchains: Toolchains) {
        *write(&self.toolchains) = toolchains;
    }

    pub(crate) fn toolchain_count(&self) -> usize {
        read(&self.toolchains).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cell_round_trips_every_state() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), ConnectionState::Connecting);

        for state in [
            ConnectionState::Streaming,
            ConnectionState::Draining,
            ConnectionState::Closed,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    #[test]
    fn in_flight_tracking() {
        let agent = Agent::new(
            PartyId::new(),
            CancellationToken::new(),
            UsageLimits::default(),
            1,
        );
        agent.track("a".into());
        agent.track("b".into());
        assert!(agent.untrack(&"a".into()));
        assert!(!agent.untrack(&"a".into()));
        assert_eq!(agent.in_flight(), 1);

        assert_eq!(agent.drain_in_flight(), vec![RequestId::from("b")]);
        assert_eq!(agent.in_flight(), 0);
    }
}
