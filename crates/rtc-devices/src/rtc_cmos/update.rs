use rtc_time::NANOS_PER_SEC;

use super::datetime::{Encoding, RtcDateTime};
use super::regs::{CmosRegisters, REG_HOURS_ALARM, REG_MINUTES_ALARM, REG_SECONDS_ALARM};

/// Which half of the once-per-second cycle a timer drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    /// UIP goes high `uip_window_ns` before the second boundary.
    Start,
    /// The second boundary itself.
    End,
}

/// Phase bookkeeping for the once-per-second update cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateCycle {
    next_second_ns: u64,
    in_progress: bool,
    last_alarm: Option<i64>,
}

impl UpdateCycle {
    pub fn new(next_second_ns: u64) -> Self {
        Self {
            next_second_ns,
            in_progress: false,
            last_alarm: None,
        }
    }

    pub fn next_second_ns(&self) -> u64 {
        self.next_second_ns
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn last_alarm(&self) -> Option<i64> {
        self.last_alarm
    }

    /// Places the next second boundary at `next_second_ns` and aborts any open UIP window.
    pub fn realign(&mut self, next_second_ns: u64) {
        self.next_second_ns = next_second_ns;
        self.in_progress = false;
    }

    pub fn restore(&mut self, next_second_ns: u64, in_progress: bool, last_alarm: Option<i64>) {
        self.next_second_ns = next_second_ns;
        self.in_progress = in_progress;
        self.last_alarm = last_alarm;
    }

    pub fn forget_alarm(&mut self) {
        self.last_alarm = None;
    }

    /// Deadline and phase of the next update timer.
    pub fn next_event(&self, uip_window_ns: u64) -> (u64, UpdatePhase) {
        if !self.in_progress && uip_window_ns != 0 {
            (
                self.next_second_ns.saturating_sub(uip_window_ns),
                UpdatePhase::Start,
            )
        } else {
            (self.next_second_ns, UpdatePhase::End)
        }
    }

    pub fn begin(&mut self) {
        self.in_progress = true;
    }

    /// Closes the cycle at `now` and returns how many second boundaries have passed.
    pub fn complete(&mut self, now_ns: u64) -> u64 {
        self.in_progress = false;
        let elapsed = 1 + now_ns.saturating_sub(self.next_second_ns) / NANOS_PER_SEC;
        self.next_second_ns = self
            .next_second_ns
            .saturating_add(elapsed.saturating_mul(NANOS_PER_SEC));
        elapsed
    }

    /// Latches `now` as the alarm second. Returns `false` if that second already fired.
    pub fn latch_alarm(&mut self, now: &RtcDateTime) -> bool {
        let secs = now.to_unix_seconds();
        if self.last_alarm == Some(secs) {
            return false;
        }
        self.last_alarm = Some(secs);
        true
    }
}

fn is_wildcard(raw: u8) -> bool {
    raw & 0xC0 == 0xC0
}

/// Compares `now` against the alarm registers. Bytes 0xC0..=0xFF match any value.
pub fn alarm_matches(regs: &CmosRegisters, enc: Encoding, now: &RtcDateTime) -> bool {
    let field = |reg: u8, current: u8, decode: fn(Encoding, u8) -> u8| {
        let raw = regs.get(reg);
        is_wildcard(raw) || decode(enc, raw) == current
    };
    field(REG_SECONDS_ALARM, now.second, Encoding::decode)
        && field(REG_MINUTES_ALARM, now.minute, Encoding::decode)
        && field(REG_HOURS_ALARM, now.hour, Encoding::decode_hour)
}
