//! Adapters between a framed socket and the broker's stream seam.
use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::trace;

use kcc_core::{
    StreamError, ToolchainRegistry,
    stream::{StreamSink, StreamSource},
};
use kcc_model::{CompileRequest, CompileResponse, PartyId};

use crate::tcp::frame::Frame;

pub(crate) type Lines = Framed<TcpStream, LinesCodec>;

/// Message type carried by a frame in the steady state of a connection.
pub trait Payload: Sized + Send + 'static {
    fn into_frame(self) -> Frame;

    /// Extract the payload, or hand the frame back when it carries something else.
    fn from_frame(frame: Frame) -> Result<Self, Frame>;
}

impl Payload for CompileRequest {
    fn into_frame(self) -> Frame {
        Frame::Request(self)
    }

    fn from_frame(frame: Frame) -> Result<Self, Frame> {
        match frame {
            Frame::Request(req) => Ok(req),
            other => Err(other),
        }
    }
}

impl Payload for CompileResponse {
    fn into_frame(self) -> Frame {
        Frame::Response(self)
    }

    fn from_frame(frame: Frame) -> Result<Self, Frame> {
        match frame {
            Frame::Response(resp) => Ok(resp),
            other => Err(other),
        }
    }
}

/// Broker → party half of a connection.
pub struct FrameSink<T> {
    inner: SplitSink<Lines, String>,
    _payload: PhantomData<fn(T)>,
}

impl<T> FrameSink<T> {
    pub(crate) fn new(inner: SplitSink<Lines, String>) -> Self {
        Self {
            inner,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Payload> StreamSink<T> for FrameSink<T> {
    async fn send(&mut self, item: T) -> Result<(), StreamError> {
        let line = item
            .into_frame()
            .encode()
            .map_err(|e| StreamError::Protocol(e.to_string()))?;
        self.inner
            .send(line)
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))
    }
}

/// Party → broker half of a connection.
///
/// `toolchains` frames are published to the registry under the party's id and never reach the
/// broker's stream.
pub struct FrameSource<T> {
    id: PartyId,
    inner: SplitStream<Lines>,
    registry: Arc<ToolchainRegistry>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> FrameSource<T> {
    pub(crate) fn new(id: PartyId, inner: SplitStream<Lines>, registry: Arc<ToolchainRegistry>) -> Self {
        Self {
            id,
            inner,
            registry,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Payload> StreamSource<T> for FrameSource<T> {
    async fn recv(&mut self) -> Result<Option<T>, StreamError> {
        loop {
            let line = match self.inner.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(StreamError::Transport(e.to_string())),
                Some(Ok(line)) => line,
            };
            if line.trim().is_empty() {
                continue;
            }

            let frame = Frame::decode(&line).map_err(|e| StreamError::Protocol(e.to_string()))?;
            match frame {
                Frame::Toolchains { toolchains } => {
                    trace!(party = %self.id.short(), count = toolchains.len(), "toolchain update");
                    self.registry.publish(self.id, toolchains);
                }
                other => {
                    return T::from_frame(other)
                        .map(Some)
                        .map_err(|f| StreamError::Protocol(format!("unexpected {} frame", f.kind())));
                }
            }
        }
    }
}
