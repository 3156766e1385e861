use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use kcc_core::BrokerError;
use kcc_model::{CompileRequest, CompileResponse, PartyId, Toolchains, UsageLimits};

/// Longest accepted line. Preprocessed sources travel inline, so this is generous.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("codec error: {0}")]
    Codec(#[from] LinesCodecError),

    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected {0} frame")]
    UnexpectedFrame(&'static str),

    #[error("connection refused by peer: {0}")]
    Refused(String),

    #[error("party {0} is already connected")]
    DuplicateParty(PartyId),

    #[error("timed out waiting for hello")]
    HelloTimeout,

    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Agent,
    Consumerd,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Agent => "agent",
            Role::Consumerd => "consumerd",
        }
    }
}

/// First frame on every connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub role: Role,
    /// Requested id. The server assigns a fresh one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PartyId>,
    #[serde(default)]
    pub usage: UsageLimits,
    #[serde(default)]
    pub toolchains: Toolchains,
}

impl Hello {
    pub fn agent(usage: UsageLimits, toolchains: Toolchains) -> Self {
        Self {
            role: Role::Agent,
            id: None,
            usage,
            toolchains,
        }
    }

    pub fn consumerd(toolchains: Toolchains) -> Self {
        Self {
            role: Role::Consumerd,
            id: None,
            usage: UsageLimits::default(),
            toolchains,
        }
    }

    pub fn with_id(mut self, id: PartyId) -> Self {
        self.id = Some(id);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    Hello(Hello),
    Toolchains { toolchains: Toolchains },
    Request(CompileRequest),
    Response(CompileResponse),
    Error { message: String },
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello(_) => "hello",
            Frame::Toolchains { .. } => "toolchains",
            Frame::Request(_) => "request",
            Frame::Response(_) => "response",
            Frame::Error { .. } => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error {
            message: message.into(),
        }
    }

    /// Serialize to a single line, without the trailing newline.
    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(line: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_defaults_optional_fields() {
        let frame = Frame::decode(r#"{"type":"hello","role":"consumerd"}"#).unwrap();
        assert_eq!(frame, Frame::Hello(Hello::consumerd(Toolchains::new())));
    }

    #[test]
    fn frames_are_tagged_by_type() {
        let line = Frame::Response(CompileResponse::fail("r1", "boom"))
            .encode()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(json["type"], "response");
        assert_eq!(json["requestId"], "r1");
        assert!(!line.contains('\n'));
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let err = Frame::decode(r#"{"type":"shutdown"}"#).unwrap_err();
        assert!(matches!(err, FrameError::Json(_)));
    }

    #[test]
    fn hello_keeps_requested_id() {
        let id = PartyId::new();
        let hello = Hello::agent(UsageLimits::new(4), Toolchains::new()).with_id(id);
        let line = Frame::Hello(hello.clone()).encode().unwrap();
        assert_eq!(Frame::decode(&line).unwrap(), Frame::Hello(hello));
    }
}
