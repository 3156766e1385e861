mod error;
pub use error::{ModelError, ModelResult};

mod fingerprint;
pub use fingerprint::Fingerprint;

mod id;
pub use id::{PartyId, RequestId};

mod toolchain;
pub use toolchain::{Toolchain, ToolchainKind, ToolchainLang, Toolchains};

mod request;
pub use request::CompileRequest;

mod response;
pub use response::{CompileResponse, CompileResult, ResponseData};

mod usage;
pub use usage::UsageLimits;
