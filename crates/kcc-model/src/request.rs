use serde::{Deserialize, Serialize};

use crate::{
    error::ModelError,
    fingerprint::{Fingerprint, FingerprintBuilder},
    id::RequestId,
    toolchain::Toolchain,
};

/// A single preprocessed translation unit to compile remotely.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub request_id: RequestId,
    /// Requests without a toolchain are never routed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolchain: Option<Toolchain>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default)]
    pub preprocessed_source: Vec<u8>,
}

impl CompileRequest {
    pub fn new(
        request_id: impl Into<RequestId>,
        toolchain: Toolchain,
        args: Vec<String>,
        preprocessed_source: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            toolchain: Some(toolchain),
            args,
            preprocessed_source: preprocessed_source.into(),
        }
    }

    /// Cache key for this request.
    ///
    /// Covers the toolchain identity, the arguments in sorted order and the preprocessed source,
    /// so invocations that differ only in argument order share a key.
    pub fn fingerprint(&self) -> Result<Fingerprint, ModelError> {
        let toolchain = self.toolchain.as_ref().ok_or(ModelError::MissingToolchain)?;

        let mut args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        args.sort_unstable();

        let mut b = FingerprintBuilder::new()
            .field(toolchain.fingerprint().as_bytes())
            .count(args.len());
        for arg in args {
            b = b.field(arg.as_bytes());
        }
        Ok(b.field(&self.preprocessed_source).finish())
    }
}
