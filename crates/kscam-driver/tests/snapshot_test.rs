//! Single-image acquisition against the simulator.

mod common;

use common::{TestCamera, QI2, RI2};
use kscam_core::CameraError;
use kscam_driver::components::acquisition::AcquisitionState;
use serial_test::serial;

#[test]
#[serial]
fn color_snapshot_is_bgra_with_zero_alpha() {
    let cam = TestCamera::open(RI2);
    cam.driver.snap_image().unwrap();

    let frame = cam.driver.image_buffer().unwrap();
    assert_eq!((frame.width, frame.height), (1636, 1088));
    assert_eq!(frame.bytes_per_pixel, 4);
    assert_eq!(frame.components, 4);
    assert_eq!(frame.data.len(), 1636 * 1088 * 4);

    // The simulator's pattern increments by one per source byte.
    for px in frame.data.chunks_exact(4).take(1000) {
        assert_eq!(px[3], 0);
        assert_eq!(px[1], ((u16::from(px[0]) + 1) % 251) as u8);
        assert_eq!(px[2], ((u16::from(px[1]) + 1) % 251) as u8);
    }
    assert_eq!(cam.driver.state().unwrap(), AcquisitionState::Idle);
    assert!(!cam.sdk.is_transfer_running(cam.handle()));
}

#[test]
#[serial]
fn mono_snapshot_is_sixteen_bit() {
    let cam = TestCamera::open(QI2);
    cam.driver.snap_image().unwrap();

    let frame = cam.driver.image_buffer().unwrap();
    assert_eq!(frame.bytes_per_pixel, 2);
    assert_eq!(frame.components, 1);
    assert_eq!(frame.bit_depth, 16);
    assert_eq!(frame.data.len(), (frame.width * frame.height * 2) as usize);
}

#[test]
#[serial]
fn soft_trigger_mode_fires_trigger() {
    let cam = TestCamera::open(RI2);
    cam.driver
        .properties()
        .set_str("TriggerMode", "Soft")
        .unwrap();
    cam.sdk.clear_command_log();

    cam.driver.snap_image().unwrap();

    let log = cam.sdk.command_log();
    assert!(log.contains(&"OnePushSoftTrigger"), "log: {:?}", log);
    assert!(log.contains(&"StopFrameTransfer"));
}

#[test]
#[serial]
fn timed_out_snapshot_still_ends_idle() {
    let cam = TestCamera::open(RI2);
    cam.sdk.suppress_frames(true);

    assert!(cam.driver.snap_image().is_ok());
    assert_eq!(cam.driver.state().unwrap(), AcquisitionState::Idle);

    cam.sdk.suppress_frames(false);
    cam.driver.snap_image().unwrap();
}

#[test]
#[serial]
fn failed_pull_after_frame_is_reported() {
    let cam = TestCamera::open(RI2);
    cam.sdk.fail_get_image(true);

    let err = cam.driver.snap_image().unwrap_err();
    assert!(matches!(err, CameraError::Device { .. }), "got {:?}", err);
    assert_eq!(cam.driver.state().unwrap(), AcquisitionState::Idle);
}

#[test]
#[serial]
fn snapshot_rejected_while_streaming() {
    let cam = TestCamera::open(RI2);
    cam.driver
        .start_continuous(std::time::Duration::ZERO)
        .unwrap();
    assert!(matches!(cam.driver.snap_image(), Err(CameraError::Busy)));
    cam.driver.stop_sequence().unwrap();
    cam.driver.snap_image().unwrap();
}
