//! Virtual time, host wall-clock and timer scheduling primitives.
//!
//! Emulated devices use **guest virtual time** (monotonic nanoseconds since the timer queue was
//! created) as the single source of truth for deadlines. Calendar time comes from a separate
//! [`WallClock`], which production code backs with the host `SystemTime` and tests back with a
//! [`FakeWallClock`].
//!
//! The [`TimerQueue`] uses **event delivery** rather than storing callbacks: devices schedule a
//! payload, the machine loop pops due [`TimerEvent`]s and hands them back to the device. Devices
//! only depend on the narrow [`TimerFacility`] capability.

mod lifecycle;
mod timer_queue;
mod wall_clock;

pub use lifecycle::{LifecycleEvent, LifecycleNotifier, LifecycleSubscription};
pub use timer_queue::{SharedTimerQueue, TimerEvent, TimerFacility, TimerId, TimerQueue};
pub use wall_clock::{FakeWallClock, SystemWallClock, WallClock};

pub const NANOS_PER_SEC: u64 = 1_000_000_000;
