//! Contract of the external object cache.
//!
//! The broker only needs two calls: look an object up by request fingerprint, and store the
//! object produced by a successful compile.
use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;

use kcc_model::Fingerprint;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("object not found")]
    NotFound,

    #[error("object already exists")]
    AlreadyExists,

    #[error("cache lookup timed out")]
    Timeout,

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Stored compile output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheObject {
    pub data: Vec<u8>,
    /// `None` keeps the object until the cache evicts it on its own.
    pub expires_at: Option<SystemTime>,
}

#[async_trait]
pub trait CacheClient: Send + Sync + 'static {
    async fn pull(&self, key: &Fingerprint) -> Result<CacheObject, CacheError>;

    async fn push(&self, key: &Fingerprint, object: CacheObject) -> Result<(), CacheError>;
}
