//! MC146818 register layout and the raw CMOS byte bank.

use bitflags::bitflags;

pub const CMOS_SIZE: usize = 128;
pub const INDEX_MASK: u8 = 0x7F;

pub const REG_SECONDS: u8 = 0x00;
pub const REG_SECONDS_ALARM: u8 = 0x01;
pub const REG_MINUTES: u8 = 0x02;
pub const REG_MINUTES_ALARM: u8 = 0x03;
pub const REG_HOURS: u8 = 0x04;
pub const REG_HOURS_ALARM: u8 = 0x05;
pub const REG_DAY_OF_WEEK: u8 = 0x06;
pub const REG_DAY_OF_MONTH: u8 = 0x07;
pub const REG_MONTH: u8 = 0x08;
pub const REG_YEAR: u8 = 0x09;
pub const REG_A: u8 = 0x0A;
pub const REG_B: u8 = 0x0B;
pub const REG_C: u8 = 0x0C;
pub const REG_D: u8 = 0x0D;
pub const REG_SHUTDOWN_STATUS: u8 = 0x0F;
pub const REG_CENTURY: u8 = 0x32;

pub const REG_A_RATE_MASK: u8 = 0x0F;
pub const REG_A_DIVIDER_MASK: u8 = 0x70;
/// 32.768 kHz time base, the only divider setting under which the clock runs.
pub const REG_A_DIVIDER_NORMAL: u8 = 0x20;
pub const REG_A_UIP: u8 = 0x80;

/// Valid RAM and time: the battery is never reported as flat.
pub const REG_D_VRT: u8 = 0x80;

pub const REG_A_POWER_ON: u8 = 0x26;
pub const REG_B_POWER_ON: u8 = 0x02;
pub const REG_D_POWER_ON: u8 = REG_D_VRT;

/// Shutdown-status value firmware interprets as "resume from S3".
pub const SHUTDOWN_S3_RESUME: u8 = 0xFE;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RegB: u8 {
        const DST = 0x01;
        const HOUR_24 = 0x02;
        const BINARY = 0x04;
        const SQWE = 0x08;
        const UIE = 0x10;
        const AIE = 0x20;
        const PIE = 0x40;
        const SET = 0x80;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RegC: u8 {
        const UF = 0x10;
        const AF = 0x20;
        const PF = 0x40;
        const IRQF = 0x80;
    }
}

impl RegC {
    /// Flag bits that have a matching enable bit in register B.
    pub const SOURCES: Self = Self::UF.union(Self::AF).union(Self::PF);
}

impl RegB {
    /// Register C source bits enabled by this register B value.
    ///
    /// UIE/AIE/PIE sit at the same bit positions as UF/AF/PF.
    pub fn enabled_sources(self) -> RegC {
        RegC::from_bits_truncate(self.bits()) & RegC::SOURCES
    }
}

/// The 128-byte CMOS bank plus the index latch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmosRegisters {
    bytes: [u8; CMOS_SIZE],
    index: u8,
}

impl Default for CmosRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl CmosRegisters {
    pub fn new() -> Self {
        let mut bytes = [0u8; CMOS_SIZE];
        bytes[usize::from(REG_A)] = REG_A_POWER_ON;
        bytes[usize::from(REG_B)] = REG_B_POWER_ON;
        bytes[usize::from(REG_D)] = REG_D_POWER_ON;
        Self { bytes, index: 0 }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    /// Latches the register index. Bit 7 (the NMI mask on PC hardware) is ignored.
    pub fn write_index(&mut self, value: u8) {
        self.index = value & INDEX_MASK;
    }

    pub fn get(&self, index: u8) -> u8 {
        self.bytes[usize::from(index & INDEX_MASK)]
    }

    pub fn set(&mut self, index: u8, value: u8) {
        self.bytes[usize::from(index & INDEX_MASK)] = value;
    }

    pub fn as_bytes(&self) -> &[u8; CMOS_SIZE] {
        &self.bytes
    }

    pub fn load_bytes(&mut self, bytes: &[u8; CMOS_SIZE], index: u8) {
        self.bytes = *bytes;
        self.index = index & INDEX_MASK;
    }

    pub fn reg_b(&self) -> RegB {
        RegB::from_bits_retain(self.get(REG_B))
    }

    pub fn flags(&self) -> RegC {
        RegC::from_bits_truncate(self.get(REG_C))
    }

    pub fn rate_select(&self) -> u8 {
        self.get(REG_A) & REG_A_RATE_MASK
    }

    pub fn divider_running(&self) -> bool {
        self.get(REG_A) & REG_A_DIVIDER_MASK == REG_A_DIVIDER_NORMAL
    }

    pub fn set_uip(&mut self, on: bool) {
        let a = self.get(REG_A);
        let a = if on { a | REG_A_UIP } else { a & !REG_A_UIP };
        self.set(REG_A, a);
    }

    /// True iff an enabled source has its flag pending.
    pub fn irq_pending(&self) -> bool {
        self.flags().intersects(self.reg_b().enabled_sources())
    }

    /// Latches source flags into register C. Flags latch whether or not they are enabled.
    ///
    /// Returns the new interrupt request state.
    pub fn raise_flags(&mut self, flags: RegC) -> bool {
        let c = self.flags() | (flags & RegC::SOURCES);
        self.set(REG_C, c.bits());
        self.rearbitrate()
    }

    /// Recomputes IRQF from the pending flags and the current enables.
    pub fn rearbitrate(&mut self) -> bool {
        let pending = self.irq_pending();
        let mut c = self.flags();
        c.set(RegC::IRQF, pending);
        self.set(REG_C, c.bits());
        pending
    }

    /// Returns register C and clears it in full.
    pub fn take_flags(&mut self) -> RegC {
        let c = self.flags();
        self.set(REG_C, 0);
        c
    }
}
