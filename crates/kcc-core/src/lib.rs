pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod router;
pub mod stream;
pub mod watch;

mod guard;

pub use broker::{
    AgentConnection, AgentStats, Broker, BrokerBuilder, CacheStats, ConnectionState,
    ConsumerdConnection, ConsumerdStats, Session, TaskStats,
};
pub use cache::{CacheClient, CacheError, CacheObject};
pub use config::{BrokerConfig, MAX_TOKENS};
pub use error::{BrokerError, RouteError, StreamError};
pub use router::{HookAction, Route, RouteInfo, Router, RouterHook};
pub use watch::{ToolchainRegistry, ToolchainWatch, ToolchainWatcher};

pub mod prelude {
    pub use crate::broker::{AgentConnection, Broker, ConsumerdConnection, Session};
    pub use crate::error::{BrokerError, RouteError, StreamError};
    pub use crate::metrics::{MetricsBackend, MetricsHandle};
    pub use crate::router::Router;
    pub use crate::stream::{BoxSink, BoxSource, StreamSink, StreamSource};
    pub use crate::watch::{ToolchainRegistry, ToolchainWatcher};
}
