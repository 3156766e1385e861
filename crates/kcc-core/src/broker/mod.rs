//! Broker between consumerds and agents.
//!
//! The broker owns the [`Router`], the per-agent concurrency tokens, the pending-request table
//! and the single response dispatcher. Transports hand it accepted connections through
//! [`Broker::new_agent_stream`] and [`Broker::new_consumerd_stream`]; everything after that runs
//! on tasks bound to the connection's lifetime, itself a child of the broker's.
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use kcc_model::{PartyId, Toolchains};

use crate::{
    cache::CacheClient,
    config::BrokerConfig,
    error::BrokerError,
    guard::{read, write},
    metrics::{MetricsHandle, PartyRole, noop_metrics},
    router::{RouteInfo, Router, RouterHook},
    watch::{ToolchainWatch, ToolchainWatcher},
};

mod agent;
mod cache_hook;
mod consumerd;
mod dispatch;
mod party;
mod pending;
mod stats;
mod tokens;


pub use party::{AgentConnection, ConnectionState, ConsumerdConnection, Session};
pub use stats::{AgentStats, CacheStats, ConsumerdStats, TaskStats};

use cache_hook::CacheHook;
use dispatch::Dispatch;
use party::{Agent, Consumerd};
use pending::PendingTable;
use stats::TaskCounters;

pub(crate) struct BrokerShared {
    lifetime: CancellationToken,
    config: BrokerConfig,
    router: Router,
    watcher: Arc<dyn ToolchainWatcher>,
    agents: RwLock<HashMap<PartyId, Arc<Agent>>>,
    consumerds: RwLock<HashMap<PartyId, Arc<Consumerd>>>,
    pending: Arc<PendingTable>,
    responses: mpsc::Sender<Dispatch>,
    cache: Arc<CacheHook>,
    counters: TaskCounters,
    metrics: MetricsHandle,
}

impl BrokerShared {
    /// Push onto the response queue. Returns `false` once the broker is shutting down.
    async fn enqueue(&self, item: Dispatch) -> bool {
        tokio::select! {
            biased;
            _ = self.lifetime.cancelled() => false,
            sent = self.responses.send(item) => sent.is_ok(),
        }
    }

    /// Wait for the first toolchain set of a connecting party.
    async fn first_toolchains(
        &self,
        id: PartyId,
        watch: &mut ToolchainWatch,
        lifetime: &CancellationToken,
    ) -> Result<Toolchains, BrokerError> {
        tokio::select! {
            biased;
            _ = lifetime.cancelled() => Err(BrokerError::ShuttingDown),
            next = tokio::time::timeout(self.config.toolchain_timeout(), watch.next()) => match next {
                Ok(Some(toolchains)) => Ok(toolchains),
                Ok(None) => Err(BrokerError::WatchClosed(id)),
                Err(_) => Err(BrokerError::ToolchainTimeout(id)),
            },
        }
    }
}

/// Builder for [`Broker`].
pub struct BrokerBuilder {
    lifetime: CancellationToken,
    watcher: Arc<dyn ToolchainWatcher>,
    config: BrokerConfig,
    cache: Option<Arc<dyn CacheClient>>,
    metrics: MetricsHandle,
}

impl BrokerBuilder {
    pub fn with_config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Consult `cache` before routing and store successful results in it.
    pub fn with_cache(mut self, cache: Arc<dyn CacheClient>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    /// Build the broker and start its response dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Broker {
        let config = self.config;
        let (responses, queue) = mpsc::channel(config.response_queue_capacity.max(1));
        let pending = Arc::new(PendingTable::new());

        let cache = Arc::new(CacheHook::new(
            self.cache,
            config.cache_timeout(),
            config.cache_ttl(),
            Arc::clone(&pending),
            responses.clone(),
            Arc::clone(&self.metrics),
        ));
        let hook: Arc<dyn RouterHook> = cache.clone();
        let router = Router::with_hooks(self.lifetime.child_token(), vec![hook]);

        let shared = Arc::new(BrokerShared {
            lifetime: self.lifetime,
            config,
            router,
            watcher: self.watcher,
            agents: RwLock::new(HashMap::new()),
            consumerds: RwLock::new(HashMap::new()),
            pending,
            responses,
            cache,
            counters: TaskCounters::default(),
            metrics: self.metrics,
        });
        tokio::spawn(dispatch::run(Arc::clone(&shared), queue));

        info!(
            max_tokens = shared.config.max_tokens,
            cache = shared.cache.stats().enabled,
            "broker started"
        );
        Broker { shared }
    }
}

/// Broker handle. Cheap to clone; all clones share the same state.
///
/// The broker runs until the lifetime passed to [`Broker::builder`] is cancelled, which closes
/// every connection and route.
#[derive(Clone)]
pub struct Broker {
    shared: Arc<BrokerShared>,
}

impl Broker {
    pub fn builder(lifetime: CancellationToken, watcher: Arc<dyn ToolchainWatcher>) -> BrokerBuilder {
        BrokerBuilder {
            lifetime,
            watcher,
            config: BrokerConfig::default(),
            cache: None,
            metrics: noop_metrics(),
        }
    }

    /// Accept an agent connection.
    ///
    /// Waits for the agent's first toolchain set, grants it tokens for its usage limit and
    /// attaches it to the router. The returned session ends when the agent's stream ends.
    #[instrument(level = "debug", skip(self, conn), fields(agent = %conn.id.short()))]
    pub async fn new_agent_stream(&self, conn: AgentConnection) -> Result<Session, BrokerError> {
        let shared = &self.shared;
        let AgentConnection {
            id,
            usage,
            sink,
            source,
        } = conn;
        if shared.lifetime.is_cancelled() {
            return Err(BrokerError::ShuttingDown);
        }

        let tokens = shared.config.tokens_for(usage.concurrent_process_limit);
        let agent = Arc::new(Agent::new(id, shared.lifetime.child_token(), usage, tokens));
        {
            let mut agents = write(&shared.agents);
            if agents.contains_key(&id) {
                return Err(BrokerError::DuplicateConnection(id));
            }
            agents.insert(id, Arc::clone(&agent));
        }

        let mut watch = shared.watcher.watch_toolchains(id);
        let toolchains = match shared.first_toolchains(id, &mut watch, &agent.lifetime).await {
            Ok(toolchains) => toolchains,
            Err(e) => {
                write(&shared.agents).remove(&id);
                shared.watcher.release(id);
                agent.lifetime.cancel();
                return Err(e);
            }
        };

        let output = shared.router.add_receiver(id, &agent.lifetime, &toolchains);
        info!(agent = %id.short(), limit = usage.concurrent_process_limit, tokens, toolchains = toolchains.len(), "agent connected");
        agent.set_toolchains(toolchains);
        agent.state.set(ConnectionState::Streaming);
        shared
            .metrics
            .set_connected(PartyRole::Agent, read(&shared.agents).len());

        agent::spawn(Arc::clone(shared), Arc::clone(&agent), sink, source, output, watch);
        Ok(Session::new(id, agent.lifetime.clone()))
    }

    /// Accept a consumerd connection.
    ///
    /// Waits for the consumerd's first toolchain set and attaches it to the router as a sender.
    #[instrument(level = "debug", skip(self, conn), fields(consumerd = %conn.id.short()))]
    pub async fn new_consumerd_stream(&self, conn: ConsumerdConnection) -> Result<Session, BrokerError> {
        let shared = &self.shared;
        let ConsumerdConnection { id, sink, source } = conn;
        if shared.lifetime.is_cancelled() {
            return Err(BrokerError::ShuttingDown);
        }

        let consumerd = Arc::new(Consumerd::new(id, shared.lifetime.child_token(), sink));
        {
            let mut consumerds = write(&shared.consumerds);
            if consumerds.contains_key(&id) {
                return Err(BrokerError::DuplicateConnection(id));
            }
            consumerds.insert(id, Arc::clone(&consumerd));
        }

        let mut watch = shared.watcher.watch_toolchains(id);
        let toolchains = match shared.first_toolchains(id, &mut watch, &consumerd.lifetime).await {
            Ok(toolchains) => toolchains,
            Err(e) => {
                write(&shared.consumerds).remove(&id);
                shared.watcher.release(id);
                consumerd.lifetime.cancel();
                return Err(e);
            }
        };

        shared.router.add_sender(id, &consumerd.lifetime, &toolchains);
        info!(consumerd = %id.short(), toolchains = toolchains.len(), "consumerd connected");
        consumerd.set_toolchains(toolchains);
        consumerd.state.set(ConnectionState::Streaming);
        shared
            .metrics
            .set_connected(PartyRole::Consumerd, read(&shared.consumerds).len());

        consumerd::spawn(Arc::clone(shared), Arc::clone(&consumerd), source, watch);
        Ok(Session::new(id, consumerd.lifetime.clone()))
    }

    /// Turn cache lookups and write-backs on or off without replacing the client.
    pub fn set_cache_available(&self, available: bool) {
        debug!(available, "cache availability changed");
        self.shared.cache.set_available(available);
    }

    pub fn router(&self) -> &Router {
        &self.shared.router
    }

    /// Snapshot of every live route.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.shared.router.routes()
    }

    pub fn agent_stats(&self) -> Vec<AgentStats> {
        let mut stats: Vec<AgentStats> = read(&self.shared.agents)
            .values()
            .map(|a| AgentStats {
                id: a.id,
                state: a.state.get(),
                completed_total: a.completed(),
                usage_limit: a.usage.concurrent_process_limit,
                tokens: a.tokens.capacity(),
                tokens_in_use: a.tokens.locked(),
                in_flight: a.in_flight(),
                toolchains: a.toolchain_count(),
            })
            .collect();
        stats.sort_by_key(|s| s.id);
        stats
    }

    pub fn consumerd_stats(&self) -> Vec<ConsumerdStats> {
        let mut stats: Vec<ConsumerdStats> = read(&self.shared.consumerds)
            .values()
            .map(|c| ConsumerdStats {
                id: c.id,
                state: c.state.get(),
                completed_total: c.completed(),
                pending: self.shared.pending.count_for(c.id),
                toolchains: c.toolchain_count(),
            })
            .collect();
        stats.sort_by_key(|s| s.id);
        stats
    }

    pub fn task_stats(&self) -> TaskStats {
        let mut stats = TaskStats {
            pending: self.shared.pending.len(),
            agents: self.agent_count(),
            consumerds: self.consumerd_count(),
            usage_limit_total: self.usage_limit_total(),
            ..Default::default()
        };
        self.shared.counters.fill(&mut stats);
        stats
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache.stats()
    }

    /// Whether a party with `id` is currently registered, in either role.
    pub fn is_connected(&self, id: PartyId) -> bool {
        read(&self.shared.agents).contains_key(&id) || read(&self.shared.consumerds).contains_key(&id)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lifetime.is_cancelled()
    }

    pub fn agent_count(&self) -> usize {
        read(&self.shared.agents).len()
    }

    pub fn consumerd_count(&self) -> usize {
        read(&self.shared.consumerds).len()
    }

    /// Sum of the concurrent process limits advertised by connected agents.
    pub fn usage_limit_total(&self) -> u64 {
        read(&self.shared.agents)
            .values()
            .map(|a| u64::from(a.usage.concurrent_process_limit))
            .sum()
    }

    /// Wait until the broker's lifetime has ended.
    pub async fn closed(&self) {
        self.shared.lifetime.cancelled().await;
    }
}
