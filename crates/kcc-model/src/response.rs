use serde::{Deserialize, Serialize};

use crate::id::RequestId;

/// Terminal outcome of a compile request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompileResult {
    Success,
    /// The compiler ran and rejected the input.
    Fail,
    /// The cluster could not run the request at all.
    InternalError,
}

impl CompileResult {
    /// Return label value for metrics.
    #[inline]
    pub fn as_label(&self) -> &'static str {
        match self {
            CompileResult::Success => "success",
            CompileResult::Fail => "fail",
            CompileResult::InternalError => "internal_error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseData {
    CompiledSource(Vec<u8>),
    Error(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResponse {
    pub request_id: RequestId,
    pub result: CompileResult,
    pub data: ResponseData,
}

impl CompileResponse {
    pub fn success(request_id: impl Into<RequestId>, object: impl Into<Vec<u8>>) -> Self {
        Self {
            request_id: request_id.into(),
            result: CompileResult::Success,
            data: ResponseData::CompiledSource(object.into()),
        }
    }

    pub fn fail(request_id: impl Into<RequestId>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            result: CompileResult::Fail,
            data: ResponseData::Error(message.into()),
        }
    }

    pub fn internal_error(request_id: impl Into<RequestId>, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            result: CompileResult::InternalError,
            data: ResponseData::Error(message.into()),
        }
    }

    pub fn compiled_source(&self) -> Option<&[u8]> {
        match &self.data {
            ResponseData::CompiledSource(b) => Some(b),
            ResponseData::Error(_) => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.data {
            ResponseData::Error(m) => Some(m),
            ResponseData::CompiledSource(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_pair_result_and_payload() {
        let ok = CompileResponse::success("a", b"obj".to_vec());
        assert_eq!(ok.result, CompileResult::Success);
        assert_eq!(ok.compiled_source(), Some(&b"obj"[..]));
        assert_eq!(ok.error_message(), None);

        let err = CompileResponse::internal_error("b", "no agents available");
        assert_eq!(err.result, CompileResult::InternalError);
        assert_eq!(err.error_message(), Some("no agents available"));
        assert_eq!(err.compiled_source(), None);
    }

    #[test]
    fn json_shape_is_camel_case() {
        let resp = CompileResponse::fail("r1", "error: expected ';'");
        let json = serde_json::to_value(&resp).unwrap();

        assert_eq!(json["requestId"], "r1");
        assert_eq!(json["result"], "fail");
        assert_eq!(json["data"]["error"], "error: expected ';'");
    }
}
