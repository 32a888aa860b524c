use rtc_devices::rtc_cmos::{RegB, REG_B, REG_C, REG_SECONDS};
use rtc_devices::{RtcCmos, RtcConfig, RtcTimer};
use rtc_io_snapshot::state::{IoSnapshot, SnapshotError, SnapshotVersion, SnapshotWriter};
use rtc_platform::irq::RecordingIrqLine;
use rtc_time::{FakeWallClock, LifecycleNotifier, SharedTimerQueue, NANOS_PER_SEC};

type Rtc = RtcCmos<SharedTimerQueue<RtcTimer>, RecordingIrqLine>;

fn new_rtc(unix_seconds: u64) -> (Rtc, SharedTimerQueue<RtcTimer>, RecordingIrqLine) {
    let queue = SharedTimerQueue::new();
    let irq = RecordingIrqLine::new();
    let rtc = RtcCmos::new(
        RtcConfig::default(),
        queue.clone(),
        irq.clone(),
        FakeWallClock::from_unix_seconds(unix_seconds),
        &LifecycleNotifier::new(),
    )
    .unwrap();
    (rtc, queue, irq)
}

fn read(rtc: &mut Rtc, index: u8) -> u8 {
    rtc.write_index(index);
    rtc.read_data()
}

fn write(rtc: &mut Rtc, index: u8, value: u8) {
    rtc.write_index(index);
    rtc.write_data(value);
}

#[test]
fn save_is_deterministic() {
    let (mut rtc, _queue, _irq) = new_rtc(1_700_000_000);
    write(&mut rtc, 0x20, 0x42);
    assert_eq!(rtc.save_state(), rtc.save_state());
}

#[test]
fn restored_device_keeps_counting_from_the_saved_time() {
    let (mut src, src_queue, _) = new_rtc(1_700_000_000);
    write(&mut src, REG_B, (RegB::HOUR_24 | RegB::UIE).bits());
    while let Some(ev) = src_queue.advance_to(NANOS_PER_SEC / 2) {
        src.handle_timer(ev);
    }
    let snap = src.save_state();

    let (mut dst, dst_queue, dst_irq) = new_rtc(1_800_000_000);
    dst_queue.set_now(42 * NANOS_PER_SEC);
    dst.load_state(&snap).unwrap();
    assert_eq!(read(&mut dst, REG_SECONDS), 0x20);
    assert_eq!(read(&mut dst, REG_B), (RegB::HOUR_24 | RegB::UIE).bits());

    // Half a second remained until the next update when the snapshot was taken.
    let target = 42 * NANOS_PER_SEC + NANOS_PER_SEC / 2;
    while let Some(ev) = dst_queue.advance_to(target) {
        dst.handle_timer(ev);
    }
    assert_eq!(read(&mut dst, REG_SECONDS), 0x21);
    assert!(dst_irq.is_asserted());
    read(&mut dst, REG_C);
    assert!(!dst_irq.is_asserted());
}

#[test]
fn truncated_cmos_field_is_rejected() {
    let (mut rtc, _, _) = new_rtc(1_700_000_000);
    let mut w = SnapshotWriter::new(*b"RTCC", SnapshotVersion::new(1, 0));
    w.field_bytes(2, vec![0; 64]);
    assert_eq!(
        rtc.load_state(&w.finish()),
        Err(SnapshotError::InvalidFieldEncoding("cmos"))
    );
}

#[test]
fn newer_major_version_is_rejected() {
    let (mut rtc, _, _) = new_rtc(1_700_000_000);
    let w = SnapshotWriter::new(*b"RTCC", SnapshotVersion::new(2, 0));
    assert!(matches!(
        rtc.load_state(&w.finish()),
        Err(SnapshotError::UnsupportedDeviceMajorVersion { .. })
    ));
}
