//! Transport seam between the broker and a connected party.
//!
//! The broker never sees sockets: each connection is handed over as a boxed sink (broker → party)
//! and a boxed source (party → broker). [`local`] wires both ends through tokio channels;
//! network transports live in other crates.
use async_trait::async_trait;

use crate::error::StreamError;

pub mod local;

/// Outbound half of a party's stream.
#[async_trait]
pub trait StreamSink<T: Send + 'static>: Send + 'static {
    async fn send(&mut self, item: T) -> Result<(), StreamError>;
}

/// Inbound half of a party's stream.
#[async_trait]
pub trait StreamSource<T: Send + 'static>: Send + 'static {
    /// Next message, or `Ok(None)` once the peer has finished.
    async fn recv(&mut self) -> Result<Option<T>, StreamError>;
}

pub type BoxSink<T> = Box<dyn StreamSink<T>>;
pub type BoxSource<T> = Box<dyn StreamSource<T>>;
