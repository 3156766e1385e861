//! Network surfaces of the scheduler: JSON statistics over HTTP and the line-delimited JSON
//! stream transport agents and consumerds connect through.
pub mod adapter;
pub mod error;
pub mod handler;
pub mod http;
pub mod tcp;

pub use adapter::BrokerStatsAdapter;
pub use error::ApiError;
pub use handler::StatsHandler;
pub use http::HttpApi;
pub use tcp::{Frame, FrameError, Hello, Role, TcpFrontend, TcpPeer};
