//! MC146818-compatible real-time clock with battery-backed CMOS RAM.
//!
//! The device is driven from three directions:
//! - the guest, through the index/data register pair (see [`ports`]);
//! - the host timer facility, which hands [`RtcTimer`] events back via
//!   [`RtcCmos::handle_timer`];
//! - machine lifecycle notifications (clock reset, suspend, resume), drained from a mailbox
//!   before every register access or timer event.
//!
//! Periodic interrupts that the host could not deliver on time are handled according to the
//! configured [`LostTickPolicy`].

mod coalesce;
mod config;
mod datetime;
mod error;
mod periodic;
mod ports;
mod regs;
mod snapshot;
mod update;

pub use coalesce::{IrqCoalescer, LostTickPolicy};
pub use config::{RtcConfig, SlewConfig};
pub use datetime::{days_in_month, is_leap_year, ClockModel, Encoding, RtcDateTime};
pub use error::RtcConfigError;
pub use periodic::{period_ticks, rate_shift, ticks_to_ns, PeriodicScheduler, RTC_BASE_HZ};
pub use ports::{register_rtc_cmos, RtcCmosPort, SharedRtcCmos, RTC_DATA_PORT, RTC_INDEX_PORT};
pub use regs::*;
pub use update::{alarm_matches, UpdateCycle, UpdatePhase};

use rtc_platform::irq::IrqLine;
use rtc_time::{
    LifecycleEvent, LifecycleNotifier, LifecycleSubscription, TimerEvent, TimerFacility, TimerId,
    WallClock, NANOS_PER_SEC,
};

use datetime::SECONDS_PER_DAY;

/// Timer payloads the RTC schedules on its [`TimerFacility`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RtcTimer {
    Periodic,
    UpdateStart,
    UpdateEnd,
    Reinject,
}

impl From<UpdatePhase> for RtcTimer {
    fn from(phase: UpdatePhase) -> Self {
        match phase {
            UpdatePhase::Start => RtcTimer::UpdateStart,
            UpdatePhase::End => RtcTimer::UpdateEnd,
        }
    }
}

/// Releasing the divider chain from reset starts the first update half a second later.
const DIVIDER_RELEASE_DELAY_NS: u64 = NANOS_PER_SEC / 2;

#[derive(Debug, Default, Clone, Copy)]
struct ArmedTimers {
    periodic: Option<TimerId>,
    update: Option<TimerId>,
}

pub struct RtcCmos<T: TimerFacility<RtcTimer>, I: IrqLine> {
    config: RtcConfig,
    timers: T,
    irq: I,
    sqw: Option<Box<dyn IrqLine>>,
    wall: Box<dyn WallClock>,
    lifecycle: LifecycleSubscription,

    regs: CmosRegisters,
    clock: ClockModel,
    periodic: PeriodicScheduler,
    update: UpdateCycle,
    coalescer: IrqCoalescer,

    armed: ArmedTimers,
    suspended: bool,
}

impl<T: TimerFacility<RtcTimer>, I: IrqLine> RtcCmos<T, I> {
    /// Creates the device seeded from `wall` and subscribes it to `lifecycle`.
    pub fn new(
        config: RtcConfig,
        timers: T,
        irq: I,
        wall: impl WallClock + 'static,
        lifecycle: &LifecycleNotifier,
    ) -> Result<Self, RtcConfigError> {
        config.validate()?;
        let clock = ClockModel::new(
            RtcDateTime::new(config.base_year, 1, 1, 0, 0, 0),
            config.base_year,
            config.century_register,
        );
        let coalescer = IrqCoalescer::new(config.lost_tick_policy, config.slew.clone());
        let mut rtc = Self {
            config,
            timers,
            irq,
            sqw: None,
            wall: Box::new(wall),
            lifecycle: lifecycle.subscribe(),
            regs: CmosRegisters::new(),
            clock,
            periodic: PeriodicScheduler::new(),
            update: UpdateCycle::default(),
            coalescer,
            armed: ArmedTimers::default(),
            suspended: false,
        };
        rtc.resync("power-on");
        Ok(rtc)
    }

    pub fn config(&self) -> &RtcConfig {
        &self.config
    }

    pub fn lost_tick_policy(&self) -> LostTickPolicy {
        self.coalescer.policy()
    }

    /// The policy is fixed at construction; only a no-op change is accepted.
    pub fn set_lost_tick_policy(&mut self, policy: LostTickPolicy) -> Result<(), RtcConfigError> {
        let configured = self.coalescer.policy();
        if policy != configured {
            return Err(RtcConfigError::PolicyLocked {
                configured,
                requested: policy,
            });
        }
        Ok(())
    }

    /// Attaches the square-wave output, pulsed once per periodic interval while SQWE is set.
    pub fn connect_square_wave(&mut self, line: impl IrqLine + 'static) {
        self.sqw = Some(Box::new(line));
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    pub fn irq_line(&self) -> &I {
        &self.irq
    }

    pub fn irq_level(&self) -> bool {
        self.coalescer.line_asserted()
    }

    pub fn coalesced_count(&self) -> u32 {
        self.coalescer.coalesced()
    }

    pub fn reinjected_count(&self) -> u64 {
        self.coalescer.reinjected()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn datetime(&self) -> RtcDateTime {
        self.clock.now()
    }

    /// Host-side time set; the sub-second phase is preserved.
    pub fn set_datetime(&mut self, now: RtcDateTime) {
        self.poll_lifecycle();
        self.clock.set(now);
        let enc = self.encoding();
        self.clock.store(&mut self.regs, enc);
        self.update.forget_alarm();
    }

    /// Raw NVRAM read without guest-visible side effects.
    pub fn cmos_read(&self, index: u8) -> u8 {
        self.regs.get(index)
    }

    /// Raw NVRAM write without guest-visible side effects.
    pub fn cmos_write(&mut self, index: u8, value: u8) {
        self.regs.set(index, value);
    }

    pub fn read_index(&self) -> u8 {
        self.regs.index()
    }

    pub fn write_index(&mut self, value: u8) {
        self.poll_lifecycle();
        self.regs.write_index(value);
    }

    pub fn read_data(&mut self) -> u8 {
        self.poll_lifecycle();
        match self.regs.index() {
            REG_C => self.ack_flags(),
            REG_D => REG_D_VRT,
            index => self.regs.get(index),
        }
    }

    pub fn write_data(&mut self, value: u8) {
        self.poll_lifecycle();
        let index = self.regs.index();
        match index {
            REG_SECONDS | REG_MINUTES | REG_HOURS | REG_DAY_OF_WEEK..=REG_YEAR => {
                self.regs.set(index, value);
                if !self.regs.reg_b().contains(RegB::SET) {
                    self.reload_clock();
                }
            }
            REG_A => self.write_reg_a(value),
            REG_B => self.write_reg_b(value),
            REG_C | REG_D => {
                tracing::trace!(index, value, "rtc: ignoring write to read-only register");
            }
            _ => self.regs.set(index, value),
        }
    }

    /// Dispatches a timer event previously scheduled by this device.
    ///
    /// Events whose id no longer matches the armed timer are stale and ignored.
    pub fn handle_timer(&mut self, event: TimerEvent<RtcTimer>) {
        self.poll_lifecycle();
        match event.payload {
            RtcTimer::Periodic => {
                if self.armed.periodic != Some(event.id) {
                    return;
                }
                self.armed.periodic = None;
                self.periodic_tick();
            }
            RtcTimer::UpdateStart | RtcTimer::UpdateEnd => {
                if self.armed.update != Some(event.id) {
                    return;
                }
                self.armed.update = None;
                if event.payload == RtcTimer::UpdateStart {
                    self.begin_update();
                } else {
                    self.finish_update();
                }
                self.arm_update();
            }
            RtcTimer::Reinject => {
                if self.coalescer.reinject_timer() != Some(event.id) {
                    return;
                }
                self.reinject();
            }
        }
    }

    /// Applies every queued lifecycle notification.
    pub fn poll_lifecycle(&mut self) {
        while let Some(event) = self.lifecycle.try_recv() {
            match event {
                LifecycleEvent::ClockReset => self.resync("clock reset"),
                LifecycleEvent::Resume => self.resync("resume"),
                LifecycleEvent::Suspend => self.suspend(),
            }
        }
    }

    /// Device reset: interrupt enables and flags are cleared, counters zeroed and the clock
    /// resynchronised to the host.
    pub fn reset(&mut self) {
        self.poll_lifecycle();
        let b = self.regs.reg_b() - (RegB::PIE | RegB::AIE | RegB::SQWE);
        self.regs.set(REG_B, b.bits());
        self.regs.set(REG_C, 0);
        self.coalescer.drive(&mut self.irq, false);
        if let Some(id) = self.coalescer.reset_counters() {
            self.timers.cancel(id);
        }
        self.reconfigure_periodic();
        self.resync("reset");
    }

    fn encoding(&self) -> Encoding {
        Encoding::from_reg_b(self.regs.reg_b())
    }

    fn halted(&self) -> bool {
        self.regs.reg_b().contains(RegB::SET) || !self.regs.divider_running()
    }

    fn update_irq_line(&mut self) {
        let pending = self.regs.rearbitrate();
        self.coalescer.drive(&mut self.irq, pending);
    }

    fn ack_flags(&mut self) -> u8 {
        let flags = self.regs.take_flags();
        self.coalescer.drive(&mut self.irq, false);
        if flags.contains(RegC::PF) && !self.suspended {
            if let Some(delay) = self.coalescer.on_ack(self.periodic.period_ns()) {
                let id = self.timers.schedule_after(delay, RtcTimer::Reinject);
                self.coalescer.set_reinject_timer(id);
            }
        }
        flags.bits()
    }

    fn write_reg_a(&mut self, value: u8) {
        let was_running = self.regs.divider_running();
        let uip = self.regs.get(REG_A) & REG_A_UIP;
        self.regs.set(REG_A, (value & !REG_A_UIP) | uip);

        let running = self.regs.divider_running();
        if running != was_running {
            tracing::debug!(running, "rtc: divider chain changed");
            self.regs.set_uip(false);
            if running {
                self.restart_update_phase(DIVIDER_RELEASE_DELAY_NS);
            }
        }
        self.reconfigure_periodic();
    }

    fn write_reg_b(&mut self, value: u8) {
        let old = self.regs.reg_b();
        let mut new = RegB::from_bits_retain(value);

        if new.contains(RegB::SET) {
            new.remove(RegB::UIE);
            self.regs.set_uip(false);
            self.update.realign(self.update.next_second_ns());
            self.regs.set(REG_B, new.bits());
        } else {
            if old.contains(RegB::SET) {
                // The guest filled the registers in the old encoding.
                self.clock.load(&self.regs, Encoding::from_reg_b(old));
                self.restart_update_phase(NANOS_PER_SEC);
            }
            self.regs.set(REG_B, new.bits());
            if (old ^ new).intersects(RegB::BINARY | RegB::HOUR_24) {
                self.clock.store(&mut self.regs, Encoding::from_reg_b(new));
            }
        }

        if old != new {
            tracing::debug!(old = ?old, new = ?new, "rtc: register B write");
        }
        self.reconfigure_periodic();
        self.update_irq_line();
    }

    fn reload_clock(&mut self) {
        self.clock.load(&self.regs, self.encoding());
        self.update.forget_alarm();
        self.restart_update_phase(NANOS_PER_SEC);
    }

    fn restart_update_phase(&mut self, delay_ns: u64) {
        let now = self.timers.now_ns();
        self.update.realign(now.saturating_add(delay_ns));
        self.regs.set_uip(false);
        self.arm_update();
    }

    fn reconfigure_periodic(&mut self) {
        let b = self.regs.reg_b();
        let period = if b.intersects(RegB::PIE | RegB::SQWE) {
            period_ticks(self.regs.rate_select())
        } else {
            None
        };
        let now = self.timers.now_ns();
        let old = self.periodic.reconfigure(now, period);
        if old != period {
            tracing::debug!(
                rate = self.regs.rate_select(),
                period_ticks = ?period,
                "rtc: periodic source reconfigured"
            );
        }
        if let Some(id) = self.coalescer.rescale(old, period) {
            self.timers.cancel(id);
        }
        // Lost ticks are only owed while PIE is set.
        if !b.contains(RegB::PIE) {
            if let Some(id) = self.coalescer.clear_backlog() {
                self.timers.cancel(id);
            }
        }
        self.arm_periodic();
    }

    fn arm_periodic(&mut self) {
        if let Some(id) = self.armed.periodic.take() {
            self.timers.cancel(id);
        }
        if self.suspended {
            return;
        }
        if let Some(due) = self.periodic.next_due_ns() {
            let delay = due.saturating_sub(self.timers.now_ns());
            self.armed.periodic = Some(self.timers.schedule_after(delay, RtcTimer::Periodic));
        }
    }

    fn arm_update(&mut self) {
        if let Some(id) = self.armed.update.take() {
            self.timers.cancel(id);
        }
        if self.suspended {
            return;
        }
        let (due, phase) = self.update.next_event(self.config.uip_window_ns);
        let delay = due.saturating_sub(self.timers.now_ns());
        self.armed.update = Some(self.timers.schedule_after(delay, phase.into()));
    }

    fn cancel_all_timers(&mut self) {
        for id in [self.armed.periodic.take(), self.armed.update.take()]
            .into_iter()
            .flatten()
        {
            self.timers.cancel(id);
        }
        if let Some(id) = self.coalescer.take_reinject_timer() {
            self.timers.cancel(id);
        }
    }

    fn periodic_tick(&mut self) {
        let now = self.timers.now_ns();
        let Some(missed) = self.periodic.on_fire(now) else {
            return;
        };
        let b = self.regs.reg_b();
        if b.contains(RegB::PIE) {
            let pf_pending = self.regs.flags().contains(RegC::PF);
            self.coalescer.on_periodic_tick(missed, pf_pending);
        }
        self.regs.raise_flags(RegC::PF);
        self.update_irq_line();
        if b.contains(RegB::SQWE) {
            if let Some(sqw) = self.sqw.as_mut() {
                sqw.pulse();
            }
        }
        self.arm_periodic();
    }

    fn reinject(&mut self) {
        let pf_pending = self.regs.flags().contains(RegC::PF);
        if self.coalescer.on_reinject(pf_pending) {
            self.regs.raise_flags(RegC::PF);
            self.update_irq_line();
        }
    }

    fn begin_update(&mut self) {
        self.update.begin();
        if !self.halted() {
            self.regs.set_uip(true);
        }
    }

    fn finish_update(&mut self) {
        let now = self.timers.now_ns();
        let elapsed = self.update.complete(now);
        self.regs.set_uip(false);
        if self.halted() {
            return;
        }

        let enc = self.encoding();
        let (skip, steps) = if elapsed > SECONDS_PER_DAY {
            (elapsed - 1, 1)
        } else {
            (0, elapsed)
        };
        if skip != 0 {
            tracing::debug!(skip, "rtc: update cycle ran late, jumping the clock");
            self.clock.advance_seconds(skip);
        }

        let mut flags = RegC::UF;
        for _ in 0..steps {
            self.clock.advance_one_second();
            let now = self.clock.now();
            if alarm_matches(&self.regs, enc, &now) && self.update.latch_alarm(&now) {
                flags |= RegC::AF;
            }
        }
        self.clock.store(&mut self.regs, enc);
        self.regs.raise_flags(flags);
        self.update_irq_line();
    }

    fn suspend(&mut self) {
        tracing::info!("rtc: suspend, stopping timers");
        self.regs.set(REG_SHUTDOWN_STATUS, SHUTDOWN_S3_RESUME);
        self.cancel_all_timers();
        self.suspended = true;
    }

    /// Re-seeds the clock from the host and restarts every timer against a fresh phase.
    ///
    /// The lost-tick backlog is dropped; time that passed during the discontinuity is never
    /// reinjected.
    fn resync(&mut self, reason: &'static str) {
        let now = self.timers.now_ns();
        let wall = self.wall.since_unix_epoch();
        let secs = i64::try_from(wall.as_secs()).unwrap_or(i64::MAX);

        self.suspended = false;
        self.cancel_all_timers();
        self.clock.set_unix_seconds(secs);
        let enc = self.encoding();
        self.clock.store(&mut self.regs, enc);
        self.regs.set_uip(false);

        let to_next_second = NANOS_PER_SEC - u64::from(wall.subsec_nanos());
        self.update.realign(now.saturating_add(to_next_second));
        self.update.forget_alarm();
        self.periodic.restart(now);
        self.coalescer.clear_backlog();

        self.arm_update();
        self.arm_periodic();
        self.update_irq_line();
        tracing::info!(reason, unix_seconds = secs, "rtc: resynchronised to host clock");
    }
}

impl<T: TimerFacility<RtcTimer>, I: IrqLine> Drop for RtcCmos<T, I> {
    fn drop(&mut self) {
        self.cancel_all_timers();
    }
}
