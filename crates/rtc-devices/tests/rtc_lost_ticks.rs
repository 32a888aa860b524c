use std::time::Duration;

use rtc_devices::rtc_cmos::{period_ticks, ticks_to_ns, RegB, RegC, REG_B, REG_C};
use rtc_devices::{LostTickPolicy, RtcCmos, RtcConfig, RtcTimer};
use rtc_platform::irq::RecordingIrqLine;
use rtc_time::{FakeWallClock, LifecycleEvent, LifecycleNotifier, SharedTimerQueue};

const T0: u64 = 1_700_000_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

struct Rig {
    queue: SharedTimerQueue<RtcTimer>,
    wall: FakeWallClock,
    notifier: LifecycleNotifier,
    rtc: RtcCmos<SharedTimerQueue<RtcTimer>, RecordingIrqLine>,
}

impl Rig {
    fn new(config: RtcConfig) -> Self {
        init_tracing();
        let queue = SharedTimerQueue::new();
        let wall = FakeWallClock::from_unix_seconds(T0);
        let notifier = LifecycleNotifier::new();
        let rtc = RtcCmos::new(
            config,
            queue.clone(),
            RecordingIrqLine::new(),
            wall.clone(),
            &notifier,
        )
        .unwrap();
        Self {
            queue,
            wall,
            notifier,
            rtc,
        }
    }

    fn slew(max_coalesced: u32) -> Self {
        let mut config = RtcConfig::default().with_lost_tick_policy(LostTickPolicy::Slew);
        config.slew.max_coalesced = max_coalesced;
        Self::new(config)
    }

    fn ack(&mut self) -> bool {
        self.rtc.write_index(REG_C);
        self.rtc.read_data() & RegC::PF.bits() != 0
    }

    fn enable_periodic(&mut self) {
        self.rtc.write_index(REG_B);
        self.rtc
            .write_data((RegB::HOUR_24 | RegB::PIE).bits());
    }

    /// Delivers events up to `target_ns` with an acknowledging guest; returns
    /// (periodic acknowledgments, reinjections).
    fn run(&mut self, target_ns: u64) -> (u64, u64) {
        let before = self.rtc.reinjected_count();
        let mut acks = 0;
        loop {
            let ev = self.queue.advance_to(target_ns);
            let Some(ev) = ev else { break };
            self.rtc.handle_timer(ev);
            if self.ack() {
                acks += 1;
            }
        }
        (acks, self.rtc.reinjected_count() - before)
    }
}

fn period_ns() -> u64 {
    ticks_to_ns(period_ticks(6).unwrap())
}

#[test]
fn slew_recovers_every_missed_tick_below_the_cap() {
    let mut rig = Rig::slew(512);
    rig.enable_periodic();
    let (acks, _) = rig.run(10 * period_ns());
    assert_eq!(acks, 10);

    // The host stalls across eight boundaries; the late callback itself delivers one.
    rig.queue.set_now(rig.queue.now_ns() + 8 * period_ns() + period_ns() / 2);
    let (_, reinjected) = rig.run(rig.queue.now_ns() + 50 * period_ns());
    assert_eq!(reinjected, 7);
    assert_eq!(rig.rtc.coalesced_count(), 0);
}

#[test]
fn slew_drops_backlog_beyond_cap() {
    let mut rig = Rig::slew(4);
    rig.enable_periodic();
    rig.queue.set_now(30 * period_ns() + period_ns() / 2);
    let (_, reinjected) = rig.run(rig.queue.now_ns() + 50 * period_ns());
    assert_eq!(reinjected, 4);
}

#[test]
fn discard_delivers_backlog_as_one_tick() {
    let mut rig = Rig::new(RtcConfig::default());
    rig.enable_periodic();
    rig.queue.set_now(30 * period_ns() + period_ns() / 2);
    let (acks, reinjected) = rig.run(rig.queue.now_ns());
    assert_eq!((acks, reinjected), (1, 0));
    assert_eq!(rig.rtc.coalesced_count(), 0);
}

#[test]
fn resume_after_long_suspend_does_not_flood_the_guest() {
    let mut rig = Rig::slew(512);
    rig.enable_periodic();
    rig.run(5 * period_ns());

    rig.notifier.notify(LifecycleEvent::Suspend);
    rig.rtc.poll_lifecycle();
    assert!(rig.queue.is_empty());

    let asleep = 1000 * period_ns();
    rig.queue.set_now(rig.queue.now_ns() + asleep);
    rig.wall.advance(Duration::from_nanos(asleep));
    rig.notifier.notify(LifecycleEvent::Resume);
    rig.rtc.poll_lifecycle();

    let (acks, reinjected) = rig.run(rig.queue.now_ns() + 10 * period_ns());
    assert_eq!(rig.rtc.coalesced_count(), 0);
    assert_eq!(reinjected, 0);
    assert_eq!(acks, 10);
}

#[test]
fn clock_reset_cancels_pending_reinjection() {
    let mut rig = Rig::slew(512);
    rig.enable_periodic();
    rig.queue.set_now(20 * period_ns() + period_ns() / 2);
    let ev = rig.queue.pop_due().unwrap();
    rig.rtc.handle_timer(ev);
    assert!(rig.rtc.coalesced_count() > 0);
    assert!(rig.ack());

    rig.wall.set(Duration::from_secs(T0 + 7200));
    rig.notifier.notify(LifecycleEvent::ClockReset);
    rig.rtc.poll_lifecycle();
    assert_eq!(rig.rtc.coalesced_count(), 0);

    let (_, reinjected) = rig.run(rig.queue.now_ns() + 10 * period_ns());
    assert_eq!(reinjected, 0);
}
