//! Line-delimited JSON transport for agents and consumerds.
//!
//! Every connection opens with a [`Hello`] frame naming its role. The server answers with a
//! `hello` of its own carrying the assigned id, or an `error` frame, and then hands the socket to
//! the broker. From that point agents receive `request` frames and answer with `response`
//! frames, consumerds do the reverse, and either side may send `toolchains` at any time to
//! replace its advertised set.
mod client;
mod frame;
mod server;
mod wire;

pub use client::TcpPeer;
pub use frame::{Frame, FrameError, Hello, MAX_FRAME_LEN, Role};
pub use server::{HELLO_TIMEOUT, TcpFrontend};
pub use wire::{FrameSink, FrameSource, Payload};
