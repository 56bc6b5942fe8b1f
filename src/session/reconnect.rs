//! Linear reconnect backoff with a hard attempt budget

use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// The delay stops growing after this many attempts
pub const DEFAULT_MAX_MULTIPLIER: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
    pub max_multiplier: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_multiplier: DEFAULT_MAX_MULTIPLIER,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect `attempt` (1-based), or `None` once the budget is spent
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay * attempt.min(self.max_multiplier))
    }
}
