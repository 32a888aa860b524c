use rtc_time::NANOS_PER_SEC;

use super::coalesce::LostTickPolicy;
use super::error::RtcConfigError;
use super::regs::{CMOS_SIZE, REG_CENTURY, REG_D};

pub const DEFAULT_BASE_YEAR: u16 = 2000;
pub const DEFAULT_MAX_COALESCED: u32 = 512;
pub const DEFAULT_REINJECT_ON_ACK_LIMIT: u32 = 20;
/// Datasheet update-cycle duration (244 µs).
pub const DEFAULT_UIP_WINDOW_NS: u64 = 244_140;

/// Tunables for [`LostTickPolicy::Slew`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlewConfig {
    /// Backlog cap; missed intervals beyond it are dropped.
    pub max_coalesced: u32,
    /// Fixed delay between an acknowledgment and the reinjected interrupt. `None` derives it
    /// from the period as `period / (min(backlog, 7) + 1)`.
    pub reinject_delay_ns: Option<u64>,
    /// Ack-driven reinjections allowed between two natural periodic ticks.
    pub reinject_on_ack_limit: u32,
}

impl Default for SlewConfig {
    fn default() -> Self {
        Self {
            max_coalesced: DEFAULT_MAX_COALESCED,
            reinject_delay_ns: None,
            reinject_on_ack_limit: DEFAULT_REINJECT_ON_ACK_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcConfig {
    /// Year represented by a year register value of 0.
    pub base_year: u16,
    pub lost_tick_policy: LostTickPolicy,
    pub slew: SlewConfig,
    /// How long UIP is visible before each second boundary; 0 disables the window.
    pub uip_window_ns: u64,
    /// CMOS index mirroring `year / 100`, if any.
    pub century_register: Option<u8>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            base_year: DEFAULT_BASE_YEAR,
            lost_tick_policy: LostTickPolicy::default(),
            slew: SlewConfig::default(),
            uip_window_ns: DEFAULT_UIP_WINDOW_NS,
            century_register: Some(REG_CENTURY),
        }
    }
}

impl RtcConfig {
    pub fn with_lost_tick_policy(mut self, policy: LostTickPolicy) -> Self {
        self.lost_tick_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), RtcConfigError> {
        if !(1900..=9900).contains(&self.base_year) {
            return Err(RtcConfigError::BaseYearOutOfRange(self.base_year));
        }
        if self.uip_window_ns >= NANOS_PER_SEC {
            return Err(RtcConfigError::UipWindowTooLong(self.uip_window_ns));
        }
        if self.slew.max_coalesced == 0 {
            return Err(RtcConfigError::ZeroSlewBacklog);
        }
        if let Some(reg) = self.century_register {
            if reg <= REG_D || usize::from(reg) >= CMOS_SIZE {
                return Err(RtcConfigError::InvalidCenturyRegister(reg));
            }
        }
        Ok(())
    }
}
