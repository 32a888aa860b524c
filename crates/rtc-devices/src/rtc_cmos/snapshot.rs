use rtc_io_snapshot::state::codec::{Decoder, Encoder};
use rtc_io_snapshot::state::{
    IoSnapshot, SnapshotError, SnapshotReader, SnapshotResult, SnapshotVersion, SnapshotWriter,
};
use rtc_platform::irq::IrqLine;
use rtc_time::TimerFacility;

use super::periodic::{is_valid_period, ns_to_ticks};
use super::regs::CMOS_SIZE;
use super::{RtcCmos, RtcTimer};

pub(super) const TAG_INDEX: u16 = 1;
pub(super) const TAG_CMOS: u16 = 2;
pub(super) const TAG_UNIX_SECONDS: u16 = 3;
pub(super) const TAG_BASE_YEAR: u16 = 4;
pub(super) const TAG_UPDATE: u16 = 5;
pub(super) const TAG_PERIODIC: u16 = 6;
pub(super) const TAG_COALESCE: u16 = 7;
pub(super) const TAG_SUSPENDED: u16 = 8;

impl<T: TimerFacility<RtcTimer>, I: IrqLine> IoSnapshot for RtcCmos<T, I> {
    const DEVICE_ID: [u8; 4] = *b"RTCC";
    const DEVICE_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

    fn save_state(&self) -> Vec<u8> {
        let now = self.timers.now_ns();
        let mut w = SnapshotWriter::new(Self::DEVICE_ID, Self::DEVICE_VERSION);
        w.field_u8(TAG_INDEX, self.regs.index());
        w.field_bytes(TAG_CMOS, self.regs.as_bytes().to_vec());
        w.field_i64(TAG_UNIX_SECONDS, self.clock.to_unix_seconds());
        w.field_u16(TAG_BASE_YEAR, self.clock.base_year());

        // Deadlines are stored relative to the save point so the state can be restored onto a
        // timer facility with a different time origin.
        let last_alarm = self.update.last_alarm();
        w.field_bytes(
            TAG_UPDATE,
            Encoder::new()
                .u64(self.update.next_second_ns().saturating_sub(now))
                .bool(self.update.in_progress())
                .bool(last_alarm.is_some())
                .i64(last_alarm.unwrap_or(0))
                .finish(),
        );

        let period = self.periodic.period_ticks();
        let until_due = self
            .periodic
            .next_due_tick()
            .map_or(0, |due| due.saturating_sub(ns_to_ticks(now)));
        w.field_bytes(
            TAG_PERIODIC,
            Encoder::new()
                .bool(period.is_some())
                .u64(period.unwrap_or(0))
                .u64(until_due)
                .finish(),
        );

        w.field_bytes(
            TAG_COALESCE,
            Encoder::new()
                .u32(self.coalescer.coalesced())
                .u64(self.coalescer.reinjected())
                .u32(self.coalescer.acks_since_tick())
                .finish(),
        );
        w.field_bool(TAG_SUSPENDED, self.suspended);
        w.finish()
    }

    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        let r = SnapshotReader::parse(bytes, Self::DEVICE_ID)?;
        r.ensure_device_major(Self::DEVICE_VERSION.major)?;

        // Decode and validate everything before the device is touched.
        let cmos = match r.bytes(TAG_CMOS) {
            Some(buf) => {
                let cmos: &[u8; CMOS_SIZE] = buf
                    .try_into()
                    .map_err(|_| SnapshotError::InvalidFieldEncoding("cmos"))?;
                Some((cmos, r.u8(TAG_INDEX)?.unwrap_or(0)))
            }
            None => None,
        };
        let base_year = r.u16(TAG_BASE_YEAR)?;
        if base_year.is_some_and(|year| !(1900..=9900).contains(&year)) {
            return Err(SnapshotError::InvalidFieldEncoding("base_year"));
        }
        let unix_seconds = r.i64(TAG_UNIX_SECONDS)?;

        let update = match r.bytes(TAG_UPDATE) {
            Some(buf) => {
                let mut d = Decoder::new(buf);
                let until_second = d.u64()?;
                let in_progress = d.bool()?;
                let has_alarm = d.bool()?;
                let alarm = d.i64()?;
                d.finish()?;
                Some((until_second, in_progress, has_alarm.then_some(alarm)))
            }
            None => None,
        };

        let periodic = match r.bytes(TAG_PERIODIC) {
            Some(buf) => {
                let mut d = Decoder::new(buf);
                let running = d.bool()?;
                let period = d.u64()?;
                let until_due = d.u64()?;
                d.finish()?;
                if running && !is_valid_period(period) {
                    return Err(SnapshotError::InvalidFieldEncoding("periodic"));
                }
                Some((running.then_some(period), until_due))
            }
            None => None,
        };

        let counters = match r.bytes(TAG_COALESCE) {
            Some(buf) => {
                let mut d = Decoder::new(buf);
                let coalesced = d.u32()?;
                let reinjected = d.u64()?;
                let acks = d.u32()?;
                d.finish()?;
                Some((coalesced, reinjected, acks))
            }
            None => None,
        };

        let suspended = r.bool(TAG_SUSPENDED)?.unwrap_or(false);

        let now = self.timers.now_ns();
        self.cancel_all_timers();

        if let Some((cmos, index)) = cmos {
            self.regs.load_bytes(cmos, index);
        }
        if let Some(base_year) = base_year {
            self.clock.set_base_year(base_year);
        }
        if let Some(secs) = unix_seconds {
            self.clock.set_unix_seconds(secs);
        }
        if let Some((until_second, in_progress, alarm)) = update {
            self.update
                .restore(now.saturating_add(until_second), in_progress, alarm);
        }
        if let Some((period, until_due)) = periodic {
            self.periodic.restore(now, period, until_due);
        }
        if let Some((coalesced, reinjected, acks)) = counters {
            self.coalescer.restore_counters(coalesced, reinjected, acks);
        }
        self.suspended = suspended;

        self.arm_update();
        self.arm_periodic();
        let pending = self.regs.rearbitrate();
        self.coalescer.sync(&mut self.irq, pending);
        Ok(())
    }
}
