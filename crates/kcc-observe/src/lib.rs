//! Logging setup shared by the kcc binaries.
mod logging;
pub use logging::*;
