use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("request has no toolchain")]
    MissingToolchain,

    #[error("unknown toolchain kind: {0}")]
    UnknownKind(String),

    #[error("unknown toolchain language: {0}")]
    UnknownLang(String),

    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("invalid party id: {0}")]
    InvalidPartyId(String),
}

pub type ModelResult<T> = Result<T, ModelError>;
