use serde::{Deserialize, Serialize};

/// Capacity an agent advertises when it connects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageLimits {
    /// Maximum number of compile requests the agent runs at once.
    pub concurrent_process_limit: u32,
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            concurrent_process_limit: 1,
        }
    }
}

impl UsageLimits {
    pub fn new(concurrent_process_limit: u32) -> Self {
        Self {
            concurrent_process_limit,
        }
    }
}
