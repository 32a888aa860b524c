use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Host wall-clock source used to seed calendar time.
pub trait WallClock {
    /// Time elapsed since 1970-01-01T00:00:00Z.
    fn since_unix_epoch(&self) -> Duration;
}

/// Wall clock backed by the host's `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn since_unix_epoch(&self) -> Duration {
        // A host clock set before 1970 is treated as the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// Manually driven wall clock for tests. Clones share the same time.
#[derive(Debug, Default, Clone)]
pub struct FakeWallClock {
    now: Rc<Cell<Duration>>,
}

impl FakeWallClock {
    pub fn new(since_epoch: Duration) -> Self {
        Self {
            now: Rc::new(Cell::new(since_epoch)),
        }
    }

    pub fn from_unix_seconds(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn set(&self, since_epoch: Duration) {
        self.now.set(since_epoch);
    }

    pub fn advance(&self, delta: Duration) {
        self.now.set(self.now.get().saturating_add(delta));
    }
}

impl WallClock for FakeWallClock {
    fn since_unix_epoch(&self) -> Duration {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_clones_share_time() {
        let clock = FakeWallClock::from_unix_seconds(10);
        let other = clock.clone();
        clock.advance(Duration::from_millis(1_500));
        assert_eq!(other.since_unix_epoch(), Duration::from_millis(11_500));
    }
}
