use thiserror::Error;

use kcc_model::PartyId;

/// Failure to place a request on a route.
///
/// The display strings are sent verbatim to the requester inside an `InternalError` response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no agents available")]
    NoAgents,

    #[error("invalid or missing toolchain")]
    InvalidToolchain,

    #[error("request rejected")]
    RequestRejected,

    #[error("stream closed")]
    StreamClosed,

    #[error("context canceled")]
    Canceled,
}

impl RouteError {
    /// Return label value for metrics.
    #[inline]
    pub fn as_label(&self) -> &'static str {
        match self {
            RouteError::NoAgents => "no_agents",
            RouteError::InvalidToolchain => "invalid_toolchain",
            RouteError::RequestRejected => "rejected",
            RouteError::StreamClosed => "stream_closed",
            RouteError::Canceled => "canceled",
        }
    }
}

/// Transport-level failure of one party's stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("token imbalance")]
    TokenImbalance,

    #[error("timed out waiting for toolchains from {0}")]
    ToolchainTimeout(PartyId),

    #[error("toolchain watch for {0} closed before the first update")]
    WatchClosed(PartyId),

    #[error("party {0} is already connected")]
    DuplicateConnection(PartyId),

    #[error("broker is shutting down")]
    ShuttingDown,

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
}
