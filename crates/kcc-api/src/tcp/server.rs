use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::{
    codec::{Framed, LinesCodec},
    sync::CancellationToken,
};
use tracing::{debug, info, instrument, warn};

use kcc_core::{AgentConnection, Broker, BrokerError, ConsumerdConnection, Session, ToolchainRegistry, ToolchainWatcher};
use kcc_model::{CompileRequest, CompileResponse, PartyId, Toolchains, UsageLimits};

use crate::tcp::{
    frame::{Frame, FrameError, Hello, MAX_FRAME_LEN, Role},
    wire::{FrameSink, FrameSource, Lines},
};

/// How long a fresh connection may take to send its hello.
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepts agent and consumerd connections and attaches them to a [`Broker`].
///
/// Toolchains announced in hello and `toolchains` frames are published to `registry`, which must
/// be the watcher the broker was built with.
#[derive(Clone)]
pub struct TcpFrontend {
    broker: Broker,
    registry: Arc<ToolchainRegistry>,
    hello_timeout: Duration,
}

impl TcpFrontend {
    pub fn new(broker: Broker, registry: Arc<ToolchainRegistry>) -> Self {
        Self {
            broker,
            registry,
            hello_timeout: HELLO_TIMEOUT,
        }
    }

    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    /// Accept connections until `lifetime` is cancelled.
    pub async fn serve(self, listener: TcpListener, lifetime: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "accepting party connections");
        }
        loop {
            let accepted = tokio::select! {
                biased;
                _ = lifetime.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            let frontend = self.clone();
            let lifetime = lifetime.clone();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = lifetime.cancelled() => {}
                    attached = frontend.attach(stream, peer) => {
                        if let Err(e) = attached {
                            warn!(%peer, error = %e, "connection refused");
                        }
                    }
                }
            });
        }
        debug!("party listener stopped");
    }

    /// Run the hello exchange on `stream` and hand it to the broker.
    #[instrument(level = "debug", skip(self, stream))]
    pub async fn attach(&self, stream: TcpStream, peer: SocketAddr) -> Result<Session, FrameError> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }
        let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN));

        let first = match tokio::time::timeout(self.hello_timeout, lines.next()).await {
            Err(_) => return Err(FrameError::HelloTimeout),
            Ok(None) => return Err(FrameError::Closed),
            Ok(Some(line)) => Frame::decode(&line?)?,
        };
        let Hello {
            role,
            id,
            usage,
            toolchains,
        } = match first {
            Frame::Hello(hello) => hello,
            other => {
                refuse(&mut lines, "expected hello").await;
                return Err(FrameError::UnexpectedFrame(other.kind()));
            }
        };

        let id = id.unwrap_or_else(PartyId::new);
        // Checking the id and publishing its first set is one step, so a duplicate hello can
        // never overwrite the toolchains of the live party.
        if !self.registry.claim(id, toolchains) {
            refuse(&mut lines, format!("party {id} is already connected")).await;
            return Err(FrameError::DuplicateParty(id));
        }

        match self.admit(lines, peer, role, id, usage).await {
            Ok(session) => Ok(session),
            Err(e) => {
                if !matches!(e, FrameError::Broker(BrokerError::DuplicateConnection(_))) {
                    self.registry.release(id);
                }
                Err(e)
            }
        }
    }

    /// Acknowledge the hello of a party whose id has been claimed and attach it to the broker.
    async fn admit(
        &self,
        mut lines: Lines,
        peer: SocketAddr,
        role: Role,
        id: PartyId,
        usage: UsageLimits,
    ) -> Result<Session, FrameError> {
        let ack = Hello {
            role,
            id: Some(id),
            usage,
            toolchains: Toolchains::new(),
        };
        lines.send(Frame::Hello(ack).encode()?).await?;

        let (sink, source) = lines.split();
        let session = match role {
            Role::Agent => {
                let conn = AgentConnection::new(
                    id,
                    usage,
                    Box::new(FrameSink::<CompileRequest>::new(sink)),
                    Box::new(FrameSource::<CompileResponse>::new(id, source, Arc::clone(&self.registry))),
                );
                self.broker.new_agent_stream(conn).await?
            }
            Role::Consumerd => {
                let conn = ConsumerdConnection::new(
                    id,
                    Box::new(FrameSink::<CompileResponse>::new(sink)),
                    Box::new(FrameSource::<CompileRequest>::new(id, source, Arc::clone(&self.registry))),
                );
                self.broker.new_consumerd_stream(conn).await?
            }
        };
        info!(party = %id.short(), role = role.as_str(), %peer, "connection attached");
        Ok(session)
    }
}

async fn refuse(lines: &mut Lines, message: impl Into<String>) {
    let Ok(line) = Frame::error(message).encode() else {
        return;
    };
    if let Err(e) = lines.send(line).await {
        debug!(error = %e, "failed to send refusal");
    }
}
