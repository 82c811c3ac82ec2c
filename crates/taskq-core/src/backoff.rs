use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capped exponential backoff used for retrying broker and storage calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Backoff { base_ms, max_ms }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.max_ms))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            base_ms: 50,
            max_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay() {
        let backoff = Backoff::new(5, 3600);

        assert_eq!(backoff.delay(0), Duration::from_millis(5));
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(2), Duration::from_millis(20));
        assert_eq!(backoff.delay(10), Duration::from_millis(3600));
        assert_eq!(backoff.delay(200), Duration::from_millis(3600));
    }
}
