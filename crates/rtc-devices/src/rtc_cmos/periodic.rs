use rtc_time::NANOS_PER_SEC;

/// Frequency of the divider chain feeding the periodic interrupt.
pub const RTC_BASE_HZ: u64 = 32_768;

/// Interval shift for a rate-select code, or `None` when the code disables the periodic source.
///
/// Codes 1 and 2 alias codes 8 and 9 (the 256 Hz and 128 Hz taps).
pub fn rate_shift(code: u8) -> Option<u32> {
    match code & 0x0F {
        0 => None,
        c @ (1 | 2) => Some(u32::from(c) + 7),
        c => Some(u32::from(c)),
    }
}

/// Periodic interval in base-clock ticks: `2^(shift - 1)`.
pub fn period_ticks(code: u8) -> Option<u64> {
    rate_shift(code).map(|shift| 1u64 << (shift - 1))
}

/// Longest interval any rate-select code produces (code 15, 2 Hz).
pub const MAX_PERIOD_TICKS: u64 = 1 << 14;

/// Whether `ticks` is an interval some rate-select code produces.
pub fn is_valid_period(ticks: u64) -> bool {
    ticks.is_power_of_two() && ticks <= MAX_PERIOD_TICKS
}

/// Converts base-clock ticks to nanoseconds, rounding up.
pub fn ticks_to_ns(ticks: u64) -> u64 {
    let ns = (u128::from(ticks) * u128::from(NANOS_PER_SEC)).div_ceil(u128::from(RTC_BASE_HZ));
    u64::try_from(ns).unwrap_or(u64::MAX)
}

/// Converts nanoseconds to whole elapsed base-clock ticks.
pub fn ns_to_ticks(ns: u64) -> u64 {
    let ticks = u128::from(ns) * u128::from(RTC_BASE_HZ) / u128::from(NANOS_PER_SEC);
    u64::try_from(ticks).unwrap_or(u64::MAX)
}

/// Phase-stable periodic deadline tracker.
///
/// All arithmetic happens in base-clock ticks; deadlines are only converted to nanoseconds when
/// they are handed to the timer facility, so long runs accumulate no rounding drift.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeriodicScheduler {
    period: Option<u64>,
    anchor_tick: u64,
    next_due_tick: u64,
}

impl PeriodicScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn period_ticks(&self) -> Option<u64> {
        self.period
    }

    pub fn period_ns(&self) -> Option<u64> {
        self.period.map(ticks_to_ns)
    }

    pub fn anchor_tick(&self) -> u64 {
        self.anchor_tick
    }

    pub fn next_due_tick(&self) -> Option<u64> {
        self.period.map(|_| self.next_due_tick)
    }

    pub fn next_due_ns(&self) -> Option<u64> {
        self.next_due_tick().map(ticks_to_ns)
    }

    /// Applies a new interval (`None` stops the source) and returns the previous one.
    ///
    /// A source that was already running keeps its anchor, so the next deadline is the first
    /// `anchor + k * period` boundary not yet passed. A freshly started source anchors at `now`.
    pub fn reconfigure(&mut self, now_ns: u64, period: Option<u64>) -> Option<u64> {
        let old = self.period;
        self.period = period;
        let Some(period) = period else {
            return old;
        };

        let now_tick = ns_to_ticks(now_ns);
        if old.is_none() || self.anchor_tick > now_tick {
            self.anchor_tick = now_tick;
        }
        let elapsed = now_tick - self.anchor_tick;
        let k = elapsed.div_ceil(period).max(1);
        self.next_due_tick = self.anchor_tick.saturating_add(k.saturating_mul(period));
        old
    }

    /// Restarts the phase at `now`, discarding any pending boundary.
    pub fn restart(&mut self, now_ns: u64) {
        if let Some(period) = self.period {
            self.anchor_tick = ns_to_ticks(now_ns);
            self.next_due_tick = self.anchor_tick.saturating_add(period);
        }
    }

    /// Accounts for a firing at `now` and returns the number of whole intervals that elapsed
    /// without a callback.
    pub fn on_fire(&mut self, now_ns: u64) -> Option<u64> {
        let period = self.period?;
        let due = self.next_due_tick;
        let missed = ns_to_ticks(now_ns).saturating_sub(due) / period;
        self.anchor_tick = due.saturating_add(missed.saturating_mul(period));
        self.next_due_tick = self.anchor_tick.saturating_add(period);
        Some(missed)
    }

    /// Restores a running source whose next boundary is `ticks_until_due` ticks after `now`.
    pub fn restore(&mut self, now_ns: u64, period: Option<u64>, ticks_until_due: u64) {
        self.period = period;
        if let Some(period) = period {
            let now_tick = ns_to_ticks(now_ns);
            self.next_due_tick = now_tick.saturating_add(ticks_until_due.clamp(1, period));
            self.anchor_tick = self.next_due_tick.saturating_sub(period);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_table_matches_datasheet() {
        assert_eq!(period_ticks(0), None);
        assert_eq!(period_ticks(1), Some(128));
        assert_eq!(period_ticks(2), Some(256));
        assert_eq!(period_ticks(3), Some(4));
        assert_eq!(period_ticks(6), Some(32));
        assert_eq!(period_ticks(15), Some(16_384));
        for code in 3..=15u8 {
            assert_eq!(period_ticks(code), Some(1 << (code - 1)));
        }
        for code in 1..=15u8 {
            assert!(period_ticks(code).is_some_and(is_valid_period));
        }
        assert!(!is_valid_period(0));
        assert!(!is_valid_period(48));
        assert!(!is_valid_period(MAX_PERIOD_TICKS * 2));
        assert!(!is_valid_period(u64::MAX));
    }

    #[test]
    fn restore_with_huge_interval_saturates() {
        let mut p = PeriodicScheduler::new();
        p.restore(5 * NANOS_PER_SEC, Some(u64::MAX), u64::MAX);
        assert_eq!(p.next_due_tick(), Some(u64::MAX));
        assert_eq!(p.on_fire(u64::MAX), Some(0));
    }

    #[test]
    fn tick_conversion_rounds_deadlines_up() {
        // 1024 Hz: 32 ticks = 976_562.5 ns.
        assert_eq!(ticks_to_ns(32), 976_563);
        assert_eq!(ns_to_ticks(976_563), 32);
        assert_eq!(ticks_to_ns(RTC_BASE_HZ), NANOS_PER_SEC);
    }

    #[test]
    fn rewriting_same_rate_does_not_postpone() {
        let mut p = PeriodicScheduler::new();
        p.reconfigure(0, Some(32));
        let due = p.next_due_tick();

        p.reconfigure(ticks_to_ns(10), Some(32));
        assert_eq!(p.next_due_tick(), due);
        p.reconfigure(ticks_to_ns(31), Some(32));
        assert_eq!(p.next_due_tick(), due);
    }

    #[test]
    fn rate_change_keeps_the_anchor() {
        let mut p = PeriodicScheduler::new();
        p.reconfigure(0, Some(32));
        assert_eq!(p.on_fire(ticks_to_ns(32)), Some(0));
        assert_eq!(p.anchor_tick(), 32);

        assert_eq!(p.reconfigure(ticks_to_ns(40), Some(4)), Some(32));
        assert_eq!(p.next_due_tick(), Some(40));
        assert_eq!(p.reconfigure(ticks_to_ns(41), Some(16)), Some(4));
        assert_eq!(p.next_due_tick(), Some(48));
    }

    #[test]
    fn late_fire_reports_missed_intervals() {
        let mut p = PeriodicScheduler::new();
        p.reconfigure(0, Some(32));
        assert_eq!(p.on_fire(ticks_to_ns(32 + 5 * 32 + 3)), Some(5));
        assert_eq!(p.anchor_tick(), 192);
        assert_eq!(p.next_due_tick(), Some(224));
    }

    #[test]
    fn stopped_source_has_no_deadline() {
        let mut p = PeriodicScheduler::new();
        p.reconfigure(0, Some(32));
        assert_eq!(p.reconfigure(100, None), Some(32));
        assert_eq!(p.next_due_ns(), None);
        assert_eq!(p.on_fire(1_000_000_000), None);
    }
}
