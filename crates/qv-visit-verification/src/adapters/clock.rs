//! Manually driven clock.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::Timestamp;
use crate::ports::outbound::TimeSource;

/// Time source that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    millis: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(initial_millis: Timestamp) -> Self {
        Self {
            millis: AtomicU64::new(initial_millis),
        }
    }

    /// Start at `secs` unix seconds.
    pub fn at_secs(secs: u64) -> Self {
        Self::new(secs * 1_000)
    }

    pub fn advance_millis(&self, ms: u64) {
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance_millis(secs * 1_000);
    }

    pub fn set_millis(&self, ms: Timestamp) {
        self.millis.store(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_millis(&self) -> Timestamp {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_time_source() {
        let source = ManualTimeSource::at_secs(1_000);
        assert_eq!(source.now_secs(), 1_000);

        source.advance_secs(5);
        assert_eq!(source.now_millis(), 1_005_000);

        source.advance_millis(999);
        assert_eq!(source.now_secs(), 1_005);

        source.set_millis(3_000);
        assert_eq!(source.now_secs(), 3);
    }
}
