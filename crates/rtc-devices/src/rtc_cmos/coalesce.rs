//! Interrupt line arbitration and lost periodic tick recovery.

use std::fmt;
use std::str::FromStr;

use rtc_platform::irq::IrqLine;
use rtc_time::TimerId;

use super::config::SlewConfig;
use super::error::RtcConfigError;

/// What happens to periodic interrupts the host could not deliver on time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LostTickPolicy {
    /// A backlog of any size is delivered as a single tick.
    #[default]
    Discard,
    /// Missed ticks are counted (up to a cap) and reinjected one per guest acknowledgment.
    Slew,
}

impl LostTickPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            LostTickPolicy::Discard => "discard",
            LostTickPolicy::Slew => "slew",
        }
    }
}

impl fmt::Display for LostTickPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LostTickPolicy {
    type Err = RtcConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discard" => Ok(LostTickPolicy::Discard),
            "slew" => Ok(LostTickPolicy::Slew),
            _ => Err(RtcConfigError::UnknownLostTickPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlewState {
    config: SlewConfig,
    coalesced: u32,
    reinjected: u64,
    acks_since_tick: u32,
    reinject_timer: Option<TimerId>,
}

impl SlewState {
    fn new(config: SlewConfig) -> Self {
        Self {
            config,
            coalesced: 0,
            reinjected: 0,
            acks_since_tick: 0,
            reinject_timer: None,
        }
    }

    fn add_backlog(&mut self, lost: u64) {
        let cap = u64::from(self.config.max_coalesced);
        let total = u64::from(self.coalesced).saturating_add(lost);
        if total > cap {
            tracing::warn!(
                dropped = total - cap,
                cap,
                "rtc: periodic backlog over cap, dropping ticks"
            );
        }
        self.coalesced = total.min(cap) as u32;
    }

    fn reinject_delay(&self, period_ns: u64) -> u64 {
        self.config
            .reinject_delay_ns
            .unwrap_or_else(|| period_ns / (u64::from(self.coalesced.min(7)) + 1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LostTicks {
    Discard,
    Slew(SlewState),
}

/// Owns the device's view of the shared interrupt line and the lost-tick strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrqCoalescer {
    lost_ticks: LostTicks,
    line_asserted: bool,
}

impl IrqCoalescer {
    pub fn new(policy: LostTickPolicy, slew: SlewConfig) -> Self {
        let lost_ticks = match policy {
            LostTickPolicy::Discard => LostTicks::Discard,
            LostTickPolicy::Slew => LostTicks::Slew(SlewState::new(slew)),
        };
        Self {
            lost_ticks,
            line_asserted: false,
        }
    }

    pub fn policy(&self) -> LostTickPolicy {
        match self.lost_ticks {
            LostTicks::Discard => LostTickPolicy::Discard,
            LostTicks::Slew(_) => LostTickPolicy::Slew,
        }
    }

    pub fn line_asserted(&self) -> bool {
        self.line_asserted
    }

    pub fn coalesced(&self) -> u32 {
        match &self.lost_ticks {
            LostTicks::Discard => 0,
            LostTicks::Slew(s) => s.coalesced,
        }
    }

    pub fn reinjected(&self) -> u64 {
        match &self.lost_ticks {
            LostTicks::Discard => 0,
            LostTicks::Slew(s) => s.reinjected,
        }
    }

    pub fn acks_since_tick(&self) -> u32 {
        match &self.lost_ticks {
            LostTicks::Discard => 0,
            LostTicks::Slew(s) => s.acks_since_tick,
        }
    }

    pub fn reinject_timer(&self) -> Option<TimerId> {
        match &self.lost_ticks {
            LostTicks::Discard => None,
            LostTicks::Slew(s) => s.reinject_timer,
        }
    }

    /// Drives `line` to `pending`, touching it only on a level change.
    pub fn drive<L: IrqLine + ?Sized>(&mut self, line: &mut L, pending: bool) {
        if self.line_asserted != pending {
            self.line_asserted = pending;
            line.set_level(pending);
        }
    }

    /// Drives `line` to `pending` unconditionally, for restore paths where the wire state is
    /// unknown.
    pub fn sync<L: IrqLine + ?Sized>(&mut self, line: &mut L, pending: bool) {
        self.line_asserted = pending;
        line.set_level(pending);
    }

    /// Accounts for a periodic tick that fired with `missed` silent intervals before it.
    ///
    /// `pf_pending` reports whether the previous periodic flag was still unacknowledged, in
    /// which case this tick is invisible to the guest as well.
    pub fn on_periodic_tick(&mut self, missed: u64, pf_pending: bool) {
        match &mut self.lost_ticks {
            LostTicks::Discard => {
                if missed != 0 {
                    tracing::trace!(missed, "rtc: discarding missed periodic ticks");
                }
            }
            LostTicks::Slew(s) => {
                s.acks_since_tick = 0;
                let lost = missed + u64::from(pf_pending);
                if lost != 0 {
                    s.add_backlog(lost);
                    tracing::trace!(lost, coalesced = s.coalesced, "rtc: coalesced periodic ticks");
                }
            }
        }
    }

    /// Handles a register C read that returned the periodic flag.
    ///
    /// Returns the delay for a reinjection timer when one should be armed; the caller reports
    /// the armed timer back through [`Self::set_reinject_timer`].
    pub fn on_ack(&mut self, period_ns: Option<u64>) -> Option<u64> {
        let LostTicks::Slew(s) = &mut self.lost_ticks else {
            return None;
        };
        let period_ns = period_ns?;
        if s.coalesced == 0
            || s.reinject_timer.is_some()
            || s.acks_since_tick >= s.config.reinject_on_ack_limit
        {
            return None;
        }
        s.acks_since_tick += 1;
        Some(s.reinject_delay(period_ns))
    }

    pub fn set_reinject_timer(&mut self, id: TimerId) {
        if let LostTicks::Slew(s) = &mut self.lost_ticks {
            s.reinject_timer = Some(id);
        }
    }

    /// Consumes one backlog entry when the reinjection timer fires. Returns `true` when the
    /// caller should raise the periodic flag.
    pub fn on_reinject(&mut self, pf_pending: bool) -> bool {
        let LostTicks::Slew(s) = &mut self.lost_ticks else {
            return false;
        };
        s.reinject_timer = None;
        if pf_pending || s.coalesced == 0 {
            return false;
        }
        s.coalesced -= 1;
        s.reinjected += 1;
        tracing::trace!(
            coalesced = s.coalesced,
            reinjected = s.reinjected,
            "rtc: reinjected periodic interrupt"
        );
        true
    }

    /// Rescales the backlog after a period change. Returns a reinjection timer to cancel.
    pub fn rescale(&mut self, old: Option<u64>, new: Option<u64>) -> Option<TimerId> {
        if old == new {
            return None;
        }
        let LostTicks::Slew(s) = &mut self.lost_ticks else {
            return None;
        };
        match (old, new) {
            (Some(old), Some(new)) => {
                let scaled = u64::from(s.coalesced).saturating_mul(old) / new;
                s.coalesced = 0;
                s.add_backlog(scaled);
                None
            }
            (_, None) => {
                s.coalesced = 0;
                s.reinject_timer.take()
            }
            (None, Some(_)) => None,
        }
    }

    /// Drops the backlog without reinjecting it. Returns a reinjection timer to cancel.
    pub fn clear_backlog(&mut self) -> Option<TimerId> {
        let LostTicks::Slew(s) = &mut self.lost_ticks else {
            return None;
        };
        s.coalesced = 0;
        s.acks_since_tick = 0;
        s.reinject_timer.take()
    }

    /// Zeroes both counters. Returns a reinjection timer to cancel.
    pub fn reset_counters(&mut self) -> Option<TimerId> {
        let timer = self.clear_backlog();
        if let LostTicks::Slew(s) = &mut self.lost_ticks {
            s.reinjected = 0;
        }
        timer
    }

    /// Takes the reinjection timer so it can be cancelled, keeping the backlog.
    pub fn take_reinject_timer(&mut self) -> Option<TimerId> {
        match &mut self.lost_ticks {
            LostTicks::Discard => None,
            LostTicks::Slew(s) => s.reinject_timer.take(),
        }
    }

    pub fn restore_counters(&mut self, coalesced: u32, reinjected: u64, acks_since_tick: u32) {
        if let LostTicks::Slew(s) = &mut self.lost_ticks {
            s.coalesced = 0;
            s.add_backlog(u64::from(coalesced));
            s.reinjected = reinjected;
            s.acks_since_tick = acks_since_tick;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtc_platform::irq::RecordingIrqLine;
    use rtc_time::TimerQueue;

    fn slew(max_coalesced: u32) -> IrqCoalescer {
        IrqCoalescer::new(
            LostTickPolicy::Slew,
            SlewConfig {
                max_coalesced,
                ..SlewConfig::default()
            },
        )
    }

    #[test]
    fn policy_names_parse_and_print() {
        assert_eq!("slew".parse::<LostTickPolicy>(), Ok(LostTickPolicy::Slew));
        assert_eq!(" Discard ".parse(), Ok(LostTickPolicy::Discard));
        assert_eq!(
            "delay".parse::<LostTickPolicy>(),
            Err(RtcConfigError::UnknownLostTickPolicy("delay".into()))
        );
        assert_eq!(LostTickPolicy::Slew.to_string(), "slew");
    }

    #[test]
    fn discard_never_builds_a_backlog() {
        let mut c = IrqCoalescer::new(LostTickPolicy::Discard, SlewConfig::default());
        c.on_periodic_tick(10, true);
        assert_eq!(c.coalesced(), 0);
        assert_eq!(c.on_ack(Some(1_000)), None);
    }

    #[test]
    fn slew_backlog_is_capped() {
        let mut c = slew(3);
        c.on_periodic_tick(5, false);
        assert_eq!(c.coalesced(), 3);
        c.on_periodic_tick(0, true);
        assert_eq!(c.coalesced(), 3);
    }

    #[test]
    fn one_reinjection_timer_per_ack() {
        let mut c = slew(8);
        c.on_periodic_tick(2, false);
        assert_eq!(c.on_ack(Some(800)), Some(800 / 3));
        let mut queue = TimerQueue::new();
        c.set_reinject_timer(queue.schedule(0, ()));
        assert_eq!(c.on_ack(Some(800)), None);

        assert!(c.on_reinject(false));
        assert_eq!((c.coalesced(), c.reinjected()), (1, 1));
        assert_eq!(c.on_ack(Some(800)), Some(400));
    }

    #[test]
    fn pending_flag_blocks_reinjection() {
        let mut c = slew(8);
        c.on_periodic_tick(1, false);
        assert!(!c.on_reinject(true));
        assert_eq!(c.coalesced(), 1);
    }

    #[test]
    fn ack_driven_reinjection_is_bounded_between_ticks() {
        let mut c = IrqCoalescer::new(
            LostTickPolicy::Slew,
            SlewConfig {
                reinject_on_ack_limit: 2,
                ..SlewConfig::default()
            },
        );
        c.on_periodic_tick(10, false);
        for _ in 0..2 {
            assert!(c.on_ack(Some(100)).is_some());
            assert!(c.on_reinject(false));
        }
        assert_eq!(c.on_ack(Some(100)), None);
        c.on_periodic_tick(0, false);
        assert!(c.on_ack(Some(100)).is_some());
    }

    #[test]
    fn backlog_follows_period_changes() {
        let mut c = slew(512);
        c.on_periodic_tick(10, false);
        assert_eq!(c.rescale(Some(32), Some(64)), None);
        assert_eq!(c.coalesced(), 5);
        c.rescale(Some(64), None);
        assert_eq!(c.coalesced(), 0);
    }

    #[test]
    fn line_is_driven_only_on_change() {
        let line = RecordingIrqLine::new();
        let mut wire = line.clone();
        let mut c = slew(1);
        c.drive(&mut wire, true);
        c.drive(&mut wire, true);
        c.drive(&mut wire, false);
        assert_eq!(line.raise_count(), 1);
        assert!(!c.line_asserted());
    }
}
