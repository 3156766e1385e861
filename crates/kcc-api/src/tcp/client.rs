use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::debug;

use kcc_model::{PartyId, Toolchains};

use crate::tcp::{
    frame::{Frame, FrameError, Hello, MAX_FRAME_LEN, Role},
    wire::Lines,
};

/// Client end of a party connection, used by agents and consumerds.
pub struct TcpPeer {
    id: PartyId,
    role: Role,
    lines: Lines,
}

impl TcpPeer {
    /// Connect and complete the hello exchange.
    pub async fn connect(addr: impl ToSocketAddrs, hello: Hello) -> Result<Self, FrameError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN));

        let role = hello.role;
        lines.send(Frame::Hello(hello).encode()?).await?;
        let reply = match lines.next().await {
            Some(line) => Frame::decode(&line?)?,
            None => return Err(FrameError::Closed),
        };
        let id = match reply {
            Frame::Hello(Hello { id: Some(id), .. }) => id,
            Frame::Error { message } => return Err(FrameError::Refused(message)),
            other => return Err(FrameError::UnexpectedFrame(other.kind())),
        };
        debug!(party = %id.short(), role = role.as_str(), "connected to scheduler");
        Ok(Self { id, role, lines })
    }

    /// Id assigned by the scheduler.
    pub fn id(&self) -> PartyId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub async fn send(&mut self, frame: Frame) -> Result<(), FrameError> {
        self.lines.send(frame.encode()?).await?;
        Ok(())
    }

    /// Next frame from the scheduler, or `None` once it closed the connection.
    pub async fn recv(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            match self.lines.next().await {
                None => return Ok(None),
                Some(line) => {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Frame::decode(&line).map(Some);
                }
            }
        }
    }

    /// Replace the advertised toolchain set.
    pub async fn update_toolchains(&mut self, toolchains: Toolchains) -> Result<(), FrameError> {
        self.send(Frame::Toolchains { toolchains }).await
    }
}
