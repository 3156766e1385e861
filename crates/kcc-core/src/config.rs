use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound on the tokens a single agent may hold, whatever it advertises.
pub const MAX_TOKENS: usize = 1000;

/// Broker tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// How long a new connection may take to publish its first toolchain set.
    pub toolchain_timeout_ms: u64,
    /// Clamp applied to each agent's advertised concurrency limit.
    pub max_tokens: usize,
    /// Capacity of the shared response queue.
    pub response_queue_capacity: usize,
    /// Bound on a single cache lookup. `None` waits for the cache indefinitely.
    pub cache_timeout_ms: Option<u64>,
    /// Lifetime of objects written back to the cache.
    pub cache_ttl_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            toolchain_timeout_ms: 5_000,
            max_tokens: MAX_TOKENS,
            response_queue_capacity: 256,
            cache_timeout_ms: None,
            cache_ttl_secs: 3_600,
        }
    }
}

impl BrokerConfig {
    #[inline]
    pub fn toolchain_timeout(&self) -> Duration {
        Duration::from_millis(self.toolchain_timeout_ms)
    }

    #[inline]
    pub fn cache_timeout(&self) -> Option<Duration> {
        self.cache_timeout_ms.map(Duration::from_millis)
    }

    #[inline]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Token count for an agent advertising `limit` concurrent processes.
    ///
    /// Always at least one, never more than [`BrokerConfig::max_tokens`].
    pub fn tokens_for(&self, limit: u32) -> usize {
        (limit as usize).clamp(1, self.max_tokens.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = BrokerConfig::default();

        assert_eq!(cfg.toolchain_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.max_tokens, 1000);
        assert_eq!(cfg.cache_timeout(), None);
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn serde_uses_defaults_for_missing_fields() {
        let cfg: BrokerConfig = serde_json::from_str(r#"{"cache_timeout_ms": 250}"#).unwrap();

        assert_eq!(cfg.cache_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.max_tokens, MAX_TOKENS);
        assert_eq!(cfg.response_queue_capacity, 256);
    }

    #[test]
    fn tokens_are_clamped() {
        let cfg = BrokerConfig {
            max_tokens: 8,
            ..Default::default()
        };

        assert_eq!(cfg.tokens_for(0), 1);
        assert_eq!(cfg.tokens_for(4), 4);
        assert_eq!(cfg.tokens_for(5000), 8);
    }
}
