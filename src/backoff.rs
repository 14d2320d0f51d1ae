use std::time::Duration;

/// Exponential delay between reconnect attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay to wait before retry number `attempt` (1 is the first retry)
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }
}

impl From<&crate::opts::Opts> for Backoff {
    fn from(opts: &crate::opts::Opts) -> Self {
        Self::new(opts.reconnect_backoff, opts.reconnect_backoff_max)
    }
}
