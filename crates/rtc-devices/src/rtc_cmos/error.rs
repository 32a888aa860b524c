use thiserror::Error;

use super::coalesce::LostTickPolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RtcConfigError {
    #[error("unknown lost tick policy {0:?} (expected \"discard\" or \"slew\")")]
    UnknownLostTickPolicy(String),

    #[error("lost tick policy is fixed at construction (configured {configured}, requested {requested})")]
    PolicyLocked {
        configured: LostTickPolicy,
        requested: LostTickPolicy,
    },

    #[error("slew backlog cap must be non-zero")]
    ZeroSlewBacklog,

    #[error("base year {0} is outside 1900..=9900")]
    BaseYearOutOfRange(u16),

    #[error("update-in-progress window of {0} ns must be shorter than one second")]
    UipWindowTooLong(u64),

    #[error("century register {0:#04x} overlaps the clock registers or lies outside CMOS")]
    InvalidCenturyRegister(u8),
}
