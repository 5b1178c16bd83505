//! The driver through the async capability traits, the way host code sees it.

#![allow(clippy::float_cmp)]

mod common;

use common::{wait_until, TestCamera, QI2, RI2, SETTLE};
use kscam_core::capabilities::{
    Commandable, ExposureControl, FrameProducer, Parameterized, Triggerable,
};
use kscam_core::PropertyValue;
use serde_json::json;
use serial_test::serial;

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn exposure_round_trip_in_seconds() {
    let cam = TestCamera::open(RI2);

    cam.driver.set_exposure(0.050).await.unwrap();
    assert_eq!(cam.driver.get_exposure().await.unwrap(), 0.050);

    // Quantized: 123.456 ms -> 123000 us.
    cam.driver.set_exposure(0.123_456).await.unwrap();
    assert_eq!(cam.driver.exposure_ms().unwrap(), 123.0);
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn finite_stream_through_frame_producer() {
    let cam = TestCamera::open(RI2);
    assert_eq!(cam.driver.resolution(), (1636, 1088));

    cam.driver.start_stream_finite(Some(3)).await.unwrap();
    assert!(cam.sink.wait_finished(1, SETTLE));
    assert_eq!(cam.sink.inserted(), 3);
    assert_eq!(cam.driver.frame_count(), 3);
    assert!(wait_until(SETTLE, || !cam.driver.is_capturing()));
    assert!(!cam.driver.is_streaming().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn open_ended_stream_stops_on_request() {
    let cam = TestCamera::open(QI2);
    cam.driver.start_stream().await.unwrap();
    assert!(cam.driver.is_streaming().await.unwrap());
    assert!(wait_until(SETTLE, || cam.sink.inserted() >= 2));

    cam.driver.stop_stream().await.unwrap();
    assert!(!cam.driver.is_streaming().await.unwrap());
    // Stopping again is harmless.
    cam.driver.stop_stream().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn arm_selects_soft_trigger() {
    let cam = TestCamera::open(RI2);
    assert!(!cam.driver.is_armed().await.unwrap());

    cam.driver.arm().await.unwrap();
    assert!(cam.driver.is_armed().await.unwrap());
    assert_eq!(
        cam.driver.parameters().get_value("TriggerMode").unwrap(),
        "Soft".into()
    );
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn commands_report_transfer_and_frame_size() {
    let cam = TestCamera::open(QI2);

    let size = cam
        .driver
        .execute_command("frame_size", json!({}))
        .await
        .unwrap();
    // 1636x1088 Mono16 plus one info row.
    assert_eq!(size["frame_size"], json!(1636 * 1089 * 2));

    let idle = cam
        .driver
        .execute_command("is_transfer_started", json!({}))
        .await
        .unwrap();
    assert_eq!(idle, json!({ "started": false }));

    cam.driver.start_stream().await.unwrap();
    let running = cam
        .driver
        .execute_command("is_transfer_started", json!({}))
        .await
        .unwrap();
    assert_eq!(running, json!({ "started": true }));
    cam.driver.stop_stream().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn white_balance_is_color_only() {
    let ri2 = TestCamera::open(RI2);
    assert!(ri2
        .driver
        .execute_command("one_push_white_balance", json!({}))
        .await
        .is_ok());
    assert!(wait_until(SETTLE, || {
        ri2.driver.parameters().get_value("WhiteBalanceRed").ok() == Some(PropertyValue::Integer(2))
    }));
    drop(ri2);

    let qi2 = TestCamera::open(QI2);
    assert!(qi2
        .driver
        .execute_command("one_push_white_balance", json!({}))
        .await
        .is_err());
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn unknown_command_is_an_error() {
    let cam = TestCamera::open(RI2);
    let err = cam
        .driver
        .execute_command("warp_drive", json!({}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("warp_drive"));
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn format_change_resizes_output() {
    let cam = TestCamera::open(RI2);
    cam.driver
        .parameters()
        .set_str("Format", "818x544 RGB 24")
        .unwrap();
    assert_eq!(cam.driver.resolution(), (818, 544));
    assert_eq!(cam.driver.get_roi().unwrap(), (0, 0, 818, 544));

    cam.driver.snap_image().unwrap();
    let frame = cam.driver.image_buffer().unwrap();
    assert_eq!(frame.data.len(), 818 * 544 * 4);

    cam.driver.clear_roi().unwrap();
    assert_eq!(cam.driver.resolution(), (4908, 3264));
}
