#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{bail, Result};
use rtc_devices::rtc_cmos::{
    RegB, RegC, REG_A, REG_A_UIP, REG_B, REG_C, REG_CENTURY, REG_DAY_OF_MONTH, REG_HOURS,
    REG_MINUTES, REG_MONTH, REG_SECONDS, REG_YEAR, RTC_DATA_PORT, RTC_INDEX_PORT,
};
use rtc_devices::{register_rtc_cmos, RtcCmos, RtcConfig, RtcTimer, SharedRtcCmos};
use rtc_platform::io::IoPortBus;
use rtc_platform::irq::RecordingIrqLine;
use rtc_time::{FakeWallClock, LifecycleEvent, LifecycleNotifier, SharedTimerQueue};

/// Guest-side polling step while waiting for UIP to clear.
const UIP_POLL_NS: u64 = 10_000;
const UIP_POLL_LIMIT: u32 = 1_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// A minimal PC: port bus, virtual time, host wall clock and the RTC on IRQ 8.
pub struct Pc {
    pub bus: IoPortBus,
    pub queue: SharedTimerQueue<RtcTimer>,
    pub irq8: RecordingIrqLine,
    pub wall: FakeWallClock,
    pub notifier: LifecycleNotifier,
    pub rtc: SharedRtcCmos<SharedTimerQueue<RtcTimer>, RecordingIrqLine>,
}

impl Pc {
    pub fn new(config: RtcConfig, unix_seconds: u64) -> Result<Self> {
        init_tracing();
        let queue = SharedTimerQueue::new();
        let irq8 = RecordingIrqLine::new();
        let wall = FakeWallClock::from_unix_seconds(unix_seconds);
        let notifier = LifecycleNotifier::new();
        let rtc = Rc::new(RefCell::new(RtcCmos::new(
            config,
            queue.clone(),
            irq8.clone(),
            wall.clone(),
            &notifier,
        )?));
        let mut bus = IoPortBus::new();
        register_rtc_cmos(&mut bus, rtc.clone());
        Ok(Self {
            bus,
            queue,
            irq8,
            wall,
            notifier,
            rtc,
        })
    }

    pub fn now(&self) -> u64 {
        self.queue.now_ns()
    }

    pub fn cmos_read(&mut self, index: u8) -> u8 {
        self.bus.write_u8(RTC_INDEX_PORT, index);
        self.bus.read_u8(RTC_DATA_PORT)
    }

    pub fn cmos_write(&mut self, index: u8, value: u8) {
        self.bus.write_u8(RTC_INDEX_PORT, index);
        self.bus.write_u8(RTC_DATA_PORT, value);
    }

    /// Runs virtual time to `target_ns`. Whenever IRQ 8 is high the guest's handler reads
    /// register C; the observed values are returned in order.
    pub fn run_until(&mut self, target_ns: u64) -> Vec<u8> {
        let mut seen = Vec::new();
        while let Some(ev) = self.queue.advance_to(target_ns) {
            self.rtc.borrow_mut().handle_timer(ev);
            if self.irq8.is_asserted() {
                seen.push(self.cmos_read(REG_C));
            }
        }
        seen
    }

    pub fn run_for(&mut self, delta_ns: u64) -> Vec<u8> {
        let target = self.now() + delta_ns;
        self.run_until(target)
    }

    /// Host stopped delivering timer callbacks for `delta_ns`.
    pub fn stall(&mut self, delta_ns: u64) {
        self.queue.set_now(self.now() + delta_ns);
    }

    pub fn lifecycle(&mut self, event: LifecycleEvent) {
        self.notifier.notify(event);
        self.rtc.borrow_mut().poll_lifecycle();
    }

    /// Reads the calendar the way a guest RTC driver does: wait for UIP to clear, then read
    /// each field and decode according to register B.
    pub fn read_time(&mut self) -> Result<GuestTime> {
        let mut polls = 0;
        while self.cmos_read(REG_A) & REG_A_UIP != 0 {
            polls += 1;
            if polls > UIP_POLL_LIMIT {
                bail!("update-in-progress never cleared");
            }
            self.run_for(UIP_POLL_NS);
        }

        let b = RegB::from_bits_retain(self.cmos_read(REG_B));
        let decode = |raw: u8| {
            if b.contains(RegB::BINARY) {
                raw
            } else {
                (raw >> 4) * 10 + (raw & 0x0F)
            }
        };
        let raw_hour = self.cmos_read(REG_HOURS);
        let mut hour = decode(raw_hour & 0x7F);
        if !b.contains(RegB::HOUR_24) {
            hour %= 12;
            if raw_hour & 0x80 != 0 {
                hour += 12;
            }
        }
        let century = decode(self.cmos_read(REG_CENTURY));
        Ok(GuestTime {
            year: u16::from(century) * 100 + u16::from(decode(self.cmos_read(REG_YEAR))),
            month: decode(self.cmos_read(REG_MONTH)),
            day: decode(self.cmos_read(REG_DAY_OF_MONTH)),
            hour,
            minute: decode(self.cmos_read(REG_MINUTES)),
            second: decode(self.cmos_read(REG_SECONDS)),
        })
    }

    /// Programs the calendar with SET held, in the current encoding.
    pub fn set_time(&mut self, t: GuestTime) {
        let b = RegB::from_bits_retain(self.cmos_read(REG_B));
        let encode = |v: u8| {
            if b.contains(RegB::BINARY) {
                v
            } else {
                ((v / 10) << 4) | (v % 10)
            }
        };
        let hour = if b.contains(RegB::HOUR_24) {
            encode(t.hour)
        } else {
            let pm = if t.hour >= 12 { 0x80 } else { 0 };
            let h12 = match t.hour % 12 {
                0 => 12,
                h => h,
            };
            encode(h12) | pm
        };

        self.cmos_write(REG_B, (b | RegB::SET).bits());
        self.cmos_write(REG_SECONDS, encode(t.second));
        self.cmos_write(REG_MINUTES, encode(t.minute));
        self.cmos_write(REG_HOURS, hour);
        self.cmos_write(REG_DAY_OF_MONTH, encode(t.day));
        self.cmos_write(REG_MONTH, encode(t.month));
        self.cmos_write(REG_YEAR, encode((t.year % 100) as u8));
        self.cmos_write(REG_CENTURY, encode((t.year / 100) as u8));
        self.cmos_write(REG_B, (b - RegB::SET).bits());
    }
}

pub fn count_flag(seen: &[u8], flag: RegC) -> usize {
    seen.iter().filter(|&&c| c & flag.bits() != 0).count()
}
