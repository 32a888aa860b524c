use std::cell::RefCell;
use std::rc::Rc;

use rtc_platform::io::{IoPortBus, PortIoDevice};
use rtc_platform::irq::IrqLine;
use rtc_time::TimerFacility;

use super::{RtcCmos, RtcTimer};

pub const RTC_INDEX_PORT: u16 = 0x70;
pub const RTC_DATA_PORT: u16 = 0x71;

pub type SharedRtcCmos<T, I> = Rc<RefCell<RtcCmos<T, I>>>;

/// I/O-port view of a shared [`RtcCmos`].
///
/// The RTC answers on two ports, so the device is shared behind `Rc<RefCell<_>>` and one
/// `RtcCmosPort` is registered per port.
pub struct RtcCmosPort<T: TimerFacility<RtcTimer>, I: IrqLine> {
    rtc: SharedRtcCmos<T, I>,
    port: u16,
}

impl<T: TimerFacility<RtcTimer>, I: IrqLine> RtcCmosPort<T, I> {
    pub fn new(rtc: SharedRtcCmos<T, I>, port: u16) -> Self {
        Self { rtc, port }
    }

    fn read_u8(&self, port: u16) -> u8 {
        let mut rtc = self.rtc.borrow_mut();
        match port {
            RTC_INDEX_PORT => rtc.read_index(),
            RTC_DATA_PORT => rtc.read_data(),
            _ => 0xFF,
        }
    }

    fn write_u8(&self, port: u16, value: u8) {
        let mut rtc = self.rtc.borrow_mut();
        match port {
            RTC_INDEX_PORT => rtc.write_index(value),
            RTC_DATA_PORT => rtc.write_data(value),
            _ => {}
        }
    }
}

impl<T: TimerFacility<RtcTimer>, I: IrqLine> PortIoDevice for RtcCmosPort<T, I> {
    fn read(&mut self, port: u16, size: u8) -> u32 {
        debug_assert_eq!(port, self.port);
        (0..u16::from(size.min(4))).fold(0u32, |acc, i| {
            acc | (u32::from(self.read_u8(port.wrapping_add(i))) << (8 * i))
        })
    }

    fn write(&mut self, port: u16, size: u8, value: u32) {
        debug_assert_eq!(port, self.port);
        for i in 0..u16::from(size.min(4)) {
            self.write_u8(port.wrapping_add(i), (value >> (8 * i)) as u8);
        }
    }

    fn reset(&mut self) {
        // Both ports share one device; only reset it once.
        if self.port == RTC_INDEX_PORT {
            self.rtc.borrow_mut().reset();
        }
    }
}

/// Maps the RTC at its legacy index/data ports.
pub fn register_rtc_cmos<T, I>(bus: &mut IoPortBus, rtc: SharedRtcCmos<T, I>)
where
    T: TimerFacility<RtcTimer> + 'static,
    I: IrqLine + 'static,
{
    bus.register_shared_range(RTC_INDEX_PORT, 2, |port| {
        Box::new(RtcCmosPort::new(rtc.clone(), port))
    });
}
