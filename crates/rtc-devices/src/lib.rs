#![forbid(unsafe_code)]

pub mod rtc_cmos;

pub use rtc_cmos::{
    register_rtc_cmos, LostTickPolicy, RtcCmos, RtcConfig, RtcConfigError, RtcDateTime, RtcTimer,
    SharedRtcCmos,
};
