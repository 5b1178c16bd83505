//! Sequence acquisition: counts, busy handling, overflow policy and
//! suspend/resume.

mod common;

use std::time::Duration;

use common::{wait_until, TestCamera, RI2, SETTLE};
use kscam_core::CameraError;
use kscam_driver::components::acquisition::AcquisitionState;
use kscam_driver::KsCamConfig;
use serial_test::serial;

#[test]
#[serial]
fn bounded_sequence_delivers_count_frames() {
    let cam = TestCamera::open(RI2);
    cam.driver
        .start_sequence(5, Duration::ZERO, false)
        .unwrap();

    assert!(cam.sink.wait_finished(1, SETTLE));
    assert_eq!(cam.sink.inserted(), 5);
    assert!(wait_until(SETTLE, || !cam.driver.is_capturing()));
    assert!(!cam.sdk.is_transfer_running(cam.handle()));

    let frames = cam.sink.drain();
    let numbers: Vec<u64> = frames.iter().map(|(_, m)| m.image_number).collect();
    assert_eq!(numbers, vec![0, 1, 2, 3, 4]);
    for (_, metadata) in &frames {
        assert_eq!(metadata.camera_label, "KsCam");
    }

    let stats = cam.driver.sequence_stats().unwrap();
    assert_eq!(stats.image_counter, 5);
    assert!(stats.start_time.is_some());
}

#[test]
#[serial]
fn second_start_is_busy_and_leaves_stream_running() {
    let cam = TestCamera::open(RI2);
    cam.driver.start_continuous(Duration::ZERO).unwrap();

    let err = cam
        .driver
        .start_sequence(3, Duration::ZERO, false)
        .unwrap_err();
    assert!(matches!(err, CameraError::Busy));
    assert!(cam.driver.is_capturing());

    let before = cam.sink.inserted();
    assert!(wait_until(SETTLE, || cam.sink.inserted() > before));

    cam.driver.stop_sequence().unwrap();
    assert_eq!(cam.driver.state().unwrap(), AcquisitionState::Idle);
    assert_eq!(cam.sink.sequences_finished(), 1);
}

#[test]
#[serial]
fn stopping_idle_sequence_is_noop() {
    let cam = TestCamera::open(RI2);
    cam.driver.stop_sequence().unwrap();
    cam.driver.stop_sequence().unwrap();
    assert_eq!(cam.driver.state().unwrap(), AcquisitionState::Idle);
    assert_eq!(cam.sink.sequences_finished(), 0);
}

#[test]
#[serial]
fn stop_after_sequence_ended_sends_nothing() {
    let cam = TestCamera::open(RI2);
    cam.driver
        .start_sequence(2, Duration::ZERO, false)
        .unwrap();
    assert!(cam.sink.wait_finished(1, SETTLE));
    assert!(wait_until(SETTLE, || !cam.driver.is_capturing()));

    cam.sdk.clear_command_log();
    cam.driver.stop_sequence().unwrap();
    assert!(cam.sdk.command_log().is_empty());
    assert_eq!(cam.driver.state().unwrap(), AcquisitionState::Idle);
    assert_eq!(cam.sink.sequences_finished(), 1);

    // The controller is reusable afterwards.
    cam.driver
        .start_sequence(1, Duration::ZERO, false)
        .unwrap();
    assert!(cam.sink.wait_finished(2, SETTLE));
}

#[test]
#[serial]
fn overflow_clears_sink_when_not_stopping() {
    let cam = TestCamera::with_config(KsCamConfig {
        sink_capacity: 2,
        ..Default::default()
    });
    cam.driver
        .start_sequence(6, Duration::ZERO, false)
        .unwrap();

    assert!(cam.sink.wait_finished(1, SETTLE));
    assert_eq!(cam.sink.inserted(), 6);
    assert_eq!(cam.sink.overflows(), 2);
}

#[test]
#[serial]
fn overflow_halts_sequence_when_stopping() {
    let cam = TestCamera::with_config(KsCamConfig {
        sink_capacity: 2,
        ..Default::default()
    });
    cam.driver.start_sequence(6, Duration::ZERO, true).unwrap();

    assert!(cam.sink.wait_finished(1, SETTLE));
    assert_eq!(cam.sink.inserted(), 2);
    assert_eq!(cam.sink.overflows(), 1);
    assert!(wait_until(SETTLE, || !cam.driver.is_capturing()));
}

#[test]
#[serial]
fn timeouts_count_as_cycles() {
    let cam = TestCamera::open(RI2);
    cam.sdk.suppress_frames(true);
    cam.driver
        .start_sequence(2, Duration::ZERO, false)
        .unwrap();

    assert!(cam.sink.wait_finished(1, SETTLE));
    assert_eq!(cam.sink.inserted(), 0);
}

#[test]
#[serial]
fn suspended_sequence_delivers_nothing() {
    let cam = TestCamera::open(RI2);
    cam.driver.start_continuous(Duration::ZERO).unwrap();
    assert!(wait_until(SETTLE, || cam.sink.inserted() > 0));

    assert!(cam.driver.suspend_sequence().unwrap());
    // Let an in-flight cycle finish.
    std::thread::sleep(Duration::from_millis(400));
    let frozen = cam.sink.inserted();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(cam.sink.inserted(), frozen);
    assert!(cam.sdk.is_transfer_running(cam.handle()));

    assert!(cam.driver.resume_sequence().unwrap());
    assert!(wait_until(SETTLE, || cam.sink.inserted() > frozen));
    cam.driver.stop_sequence().unwrap();
}

#[test]
#[serial]
fn sequence_forces_free_running_trigger() {
    let cam = TestCamera::open(RI2);
    cam.driver
        .properties()
        .set_str("TriggerMode", "Soft")
        .unwrap();

    cam.driver
        .start_sequence(2, Duration::ZERO, false)
        .unwrap();
    assert!(cam.sink.wait_finished(1, SETTLE));
    assert_eq!(cam.sink.inserted(), 2);
    assert_eq!(
        cam.driver.properties().get_value("TriggerMode").unwrap(),
        "OFF".into()
    );
}
