//! Calendar arithmetic and the register encoding of the time of day.

use super::regs::{
    CmosRegisters, RegB, REG_DAY_OF_MONTH, REG_DAY_OF_WEEK, REG_HOURS, REG_MINUTES, REG_MONTH,
    REG_SECONDS, REG_YEAR,
};

pub const SECONDS_PER_DAY: u64 = 86_400;

/// 1900-01-01T00:00:00Z.
const MIN_UNIX_SECONDS: i64 = -2_208_988_800;
/// 9999-12-31T23:59:59Z.
const MAX_UNIX_SECONDS: i64 = 253_402_300_799;

const PM_BIT: u8 = 0x80;

pub fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        _ => 28,
    }
}

fn days_from_civil(year: i64, month: u8, day: u8) -> i64 {
    let month = i64::from(month);
    let day = i64::from(day);
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// A valid Gregorian calendar instant with one-second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RtcDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl RtcDateTime {
    /// Builds a date, clamping every field into the valid calendar.
    pub fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        let year = year.clamp(1900, 9999);
        let month = month.clamp(1, 12);
        Self {
            year,
            month,
            day: day.clamp(1, days_in_month(year, month)),
            hour: hour.min(23),
            minute: minute.min(59),
            second: second.min(59),
        }
    }

    /// The same instant with every out-of-range field clamped, see [`RtcDateTime::new`].
    pub fn normalized(self) -> Self {
        Self::new(
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
        )
    }

    pub fn from_unix_seconds(secs: i64) -> Self {
        let secs = secs.clamp(MIN_UNIX_SECONDS, MAX_UNIX_SECONDS);
        let days = secs.div_euclid(SECONDS_PER_DAY as i64);
        let sod = secs.rem_euclid(SECONDS_PER_DAY as i64);
        let (year, month, day) = civil_from_days(days);
        Self {
            year: year as u16,
            month,
            day,
            hour: (sod / 3600) as u8,
            minute: (sod / 60 % 60) as u8,
            second: (sod % 60) as u8,
        }
    }

    pub fn to_unix_seconds(&self) -> i64 {
        let days = days_from_civil(i64::from(self.year), self.month, self.day);
        days * SECONDS_PER_DAY as i64
            + i64::from(self.hour) * 3600
            + i64::from(self.minute) * 60
            + i64::from(self.second)
    }

    /// Day of the week, 0 = Sunday.
    pub fn weekday(&self) -> u8 {
        // 1970-01-01 was a Thursday.
        (days_from_civil(i64::from(self.year), self.month, self.day) + 4).rem_euclid(7) as u8
    }

    pub fn advance_one_second(&mut self) {
        self.second += 1;
        if self.second < 60 {
            return;
        }
        self.second = 0;
        self.minute += 1;
        if self.minute < 60 {
            return;
        }
        self.minute = 0;
        self.hour += 1;
        if self.hour < 24 {
            return;
        }
        self.hour = 0;
        self.day += 1;
        if self.day <= days_in_month(self.year, self.month) {
            return;
        }
        self.day = 1;
        self.month += 1;
        if self.month <= 12 {
            return;
        }
        if self.year == 9999 {
            // The calendar saturates at its last second.
            *self = Self::new(9999, 12, 31, 23, 59, 59);
            return;
        }
        self.month = 1;
        self.year += 1;
    }

    pub fn advance_seconds(&mut self, secs: u64) {
        let secs = i64::try_from(secs).unwrap_or(i64::MAX);
        *self = Self::from_unix_seconds(self.to_unix_seconds().saturating_add(secs));
    }
}

/// Register representation selected by register B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Encoding {
    pub binary: bool,
    pub hour_24: bool,
}

impl Encoding {
    pub fn from_reg_b(b: RegB) -> Self {
        Self {
            binary: b.contains(RegB::BINARY),
            hour_24: b.contains(RegB::HOUR_24),
        }
    }

    pub fn encode(self, value: u8) -> u8 {
        if self.binary {
            value
        } else {
            ((value / 10) << 4) | (value % 10)
        }
    }

    pub fn decode(self, raw: u8) -> u8 {
        if self.binary {
            raw
        } else {
            (raw >> 4) * 10 + (raw & 0x0F)
        }
    }

    pub fn encode_hour(self, hour: u8) -> u8 {
        if self.hour_24 {
            return self.encode(hour);
        }
        let pm = hour >= 12;
        let hour_12 = match hour % 12 {
            0 => 12,
            h => h,
        };
        self.encode(hour_12) | if pm { PM_BIT } else { 0 }
    }

    pub fn decode_hour(self, raw: u8) -> u8 {
        let hour = self.decode(raw & !PM_BIT);
        if self.hour_24 {
            hour
        } else {
            hour % 12 + if raw & PM_BIT != 0 { 12 } else { 0 }
        }
    }
}

/// The chip's notion of the current time of day, independent of its register encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockModel {
    now: RtcDateTime,
    base_year: u16,
    century_register: Option<u8>,
}

impl ClockModel {
    pub fn new(now: RtcDateTime, base_year: u16, century_register: Option<u8>) -> Self {
        Self {
            now: now.normalized(),
            base_year,
            century_register,
        }
    }

    pub fn now(&self) -> RtcDateTime {
        self.now
    }

    pub fn set(&mut self, now: RtcDateTime) {
        self.now = now.normalized();
    }

    pub fn base_year(&self) -> u16 {
        self.base_year
    }

    pub fn set_base_year(&mut self, base_year: u16) {
        self.base_year = base_year;
    }

    pub fn to_unix_seconds(&self) -> i64 {
        self.now.to_unix_seconds()
    }

    pub fn set_unix_seconds(&mut self, secs: i64) {
        self.now = RtcDateTime::from_unix_seconds(secs);
    }

    pub fn advance_one_second(&mut self) {
        self.now.advance_one_second();
    }

    pub fn advance_seconds(&mut self, secs: u64) {
        self.now.advance_seconds(secs);
    }

    /// Writes the current instant into the time-of-day registers under `enc`.
    pub fn store(&self, regs: &mut CmosRegisters, enc: Encoding) {
        let now = self.now;
        let year_reg = (i32::from(now.year) - i32::from(self.base_year)).rem_euclid(100) as u8;
        regs.set(REG_SECONDS, enc.encode(now.second));
        regs.set(REG_MINUTES, enc.encode(now.minute));
        regs.set(REG_HOURS, enc.encode_hour(now.hour));
        regs.set(REG_DAY_OF_WEEK, enc.encode(now.weekday() + 1));
        regs.set(REG_DAY_OF_MONTH, enc.encode(now.day));
        regs.set(REG_MONTH, enc.encode(now.month));
        regs.set(REG_YEAR, enc.encode(year_reg));
        if let Some(century) = self.century_register {
            regs.set(century, enc.encode((now.year / 100) as u8));
        }
    }

    /// Re-seeds the clock from the time-of-day registers decoded under `enc`.
    ///
    /// The weekday register is ignored; it is recomputed on the next store.
    pub fn load(&mut self, regs: &CmosRegisters, enc: Encoding) {
        let year = self.base_year + u16::from(enc.decode(regs.get(REG_YEAR)).min(99));
        self.now = RtcDateTime::new(
            year,
            enc.decode(regs.get(REG_MONTH)),
            enc.decode(regs.get(REG_DAY_OF_MONTH)),
            enc.decode_hour(regs.get(REG_HOURS)),
            enc.decode(regs.get(REG_MINUTES)),
            enc.decode(regs.get(REG_SECONDS)),
        );
    }
}
