//! Device events routed through the per-session dispatcher, plus the
//! open/shutdown lifecycle that registers and removes the routing.

#![allow(clippy::float_cmp)]

mod common;

use std::sync::Arc;

use common::{wait_until, TestCamera, QI2, RI2, SETTLE};
use kscam_core::{BoundedFrameSink, CameraError, DriverErrorKind, PropertyValue};
use kscam_driver::components::dispatcher;
use kscam_driver::sdk::mock::MockSdk;
use kscam_driver::sdk::{CameraEvent, FeatureId, Variant};
use kscam_driver::{KsCamConfig, KsCamDriver};
use serial_test::serial;
use tracing_test::traced_test;

fn named(name: &str) -> KsCamConfig {
    KsCamConfig {
        camera_name: Some(name.to_string()),
        ..Default::default()
    }
}

#[test]
#[serial]
fn device_feature_change_updates_property() {
    let cam = TestCamera::open(RI2);
    let mut changes = cam.driver.properties().subscribe_changes();

    cam.sdk
        .device_change_feature(cam.handle(), FeatureId::Gain, Variant::UInt32(800));

    assert_eq!(
        cam.driver.properties().get_value("Gain").unwrap(),
        PropertyValue::Integer(800)
    );
    assert_eq!(changes.try_recv().unwrap().name, "Gain");
}

#[test]
#[serial]
fn device_exposure_change_is_reported_in_ms() {
    let cam = TestCamera::open(RI2);
    cam.sdk.device_change_feature(
        cam.handle(),
        FeatureId::ExposureTime,
        Variant::UInt32(42_000),
    );
    assert_eq!(cam.driver.exposure_ms().unwrap(), 42.0);
}

#[test]
#[serial]
fn one_push_ae_result_arrives_as_event() {
    let cam = TestCamera::open(RI2);
    cam.driver.command("one_push_ae").unwrap();
    assert!(wait_until(SETTLE, || {
        cam.driver.exposure_ms().ok() == Some(20.0)
    }));
}

#[test]
#[serial]
#[traced_test]
fn foreign_handle_event_is_rejected() {
    let cam = TestCamera::open(RI2);
    let before = cam.driver.exposure_ms().unwrap();

    cam.sdk.inject_event_as(
        cam.handle(),
        cam.handle() + 7,
        CameraEvent::FeatureChanged {
            tick: 0,
            feature_id: FeatureId::ExposureTime,
            variant: Variant::UInt32(99_000),
        },
    );

    assert_eq!(cam.driver.exposure_ms().unwrap(), before);
    assert!(logs_contain("rejected event for foreign camera handle"));
}

#[test]
#[serial]
#[traced_test]
fn transport_errors_are_logged() {
    let cam = TestCamera::open(RI2);
    cam.sdk.inject_event(
        cam.handle(),
        CameraEvent::TransError {
            tick: 5,
            usb_error: 1,
            driver_error: 2,
            received_size: 10,
            setting_size: 20,
        },
    );
    assert!(logs_contain("transfer error"));
}

#[test]
#[serial]
fn two_sessions_route_independently() {
    let sdk = Arc::new(MockSdk::new());
    let ri2 = KsCamDriver::open(sdk.clone(), named(RI2), Arc::new(BoundedFrameSink::new(4)))
        .unwrap();
    let qi2 = KsCamDriver::open(sdk.clone(), named(QI2), Arc::new(BoundedFrameSink::new(4)))
        .unwrap();

    sdk.device_change_feature(
        qi2.handle().unwrap(),
        FeatureId::ExposureTime,
        Variant::UInt32(55_000),
    );
    assert_eq!(qi2.exposure_ms().unwrap(), 55.0);
    assert_eq!(ri2.exposure_ms().unwrap(), 10.0);

    // Ri2-only properties exist on one session only.
    assert!(ri2.properties().contains("Hue"));
    assert!(!qi2.properties().contains("Hue"));

    ri2.shutdown().unwrap();
    qi2.shutdown().unwrap();
    assert_eq!(sdk.open_sessions(), 0);
}

#[test]
#[serial]
fn shutdown_is_idempotent_and_detaches() {
    let cam = TestCamera::open(RI2);
    let registered = dispatcher::registered();
    let handle = cam.handle();

    cam.driver.shutdown().unwrap();
    cam.driver.shutdown().unwrap();

    assert!(!cam.driver.is_open());
    assert!(cam.driver.properties().is_empty());
    assert_eq!(cam.sdk.open_sessions(), 0);
    assert_eq!(dispatcher::registered(), registered - 1);
    assert!(matches!(cam.driver.snap_image(), Err(CameraError::NotInitialized)));

    // Nothing is listening any more.
    cam.sdk.device_change_feature(handle, FeatureId::Gain, Variant::UInt32(200));
}

#[test]
#[serial]
fn shutdown_stops_running_sequence() {
    let cam = TestCamera::open(RI2);
    let handle = cam.handle();
    cam.driver
        .start_continuous(std::time::Duration::ZERO)
        .unwrap();

    cam.driver.shutdown().unwrap();
    assert!(!cam.sdk.is_transfer_running(handle));
    assert_eq!(cam.sink.sequences_finished(), 1);
}

#[test]
#[serial]
fn failed_initialization_leaves_nothing_open() {
    let sdk = Arc::new(MockSdk::new());
    sdk.fail_descriptor(Some(FeatureId::Gain));
    let driver = KsCamDriver::new(
        sdk.clone(),
        KsCamConfig::default(),
        Arc::new(BoundedFrameSink::new(4)),
    );

    let err = driver.initialize().unwrap_err();
    assert!(matches!(err, CameraError::Initialization(_)), "got {:?}", err);
    assert!(!driver.is_open());
    assert!(driver.properties().is_empty());
    assert_eq!(sdk.open_sessions(), 0);

    sdk.fail_descriptor(None);
    driver.initialize().unwrap();
    assert!(driver.is_open());
    driver.shutdown().unwrap();
}

#[test]
#[serial]
#[traced_test]
fn failed_initialization_logs_error_kind() {
    let sdk = Arc::new(MockSdk::new());
    sdk.fail_descriptor(Some(FeatureId::Gain));
    let driver = KsCamDriver::new(
        sdk,
        KsCamConfig::default(),
        Arc::new(BoundedFrameSink::new(4)),
    );
    assert!(driver.initialize().is_err());
    assert!(logs_contain("camera initialization failed"));
    assert!(logs_contain("kind=hardware"));
}

#[test]
#[serial]
#[traced_test]
fn invalid_config_is_a_configuration_driver_error() {
    let sdk = Arc::new(MockSdk::new());
    let driver = KsCamDriver::new(
        sdk.clone(),
        KsCamConfig {
            image_buffer_count: 0,
            ..Default::default()
        },
        Arc::new(BoundedFrameSink::new(4)),
    );

    let err = driver.initialize().unwrap_err();
    assert!(
        matches!(&err, CameraError::Driver(e) if e.driver_type == "kscam"),
        "got {:?}",
        err
    );
    assert_eq!(err.kind(), DriverErrorKind::Configuration);
    assert!(!driver.is_open());
    assert_eq!(sdk.open_sessions(), 0);
    assert!(logs_contain("kind=configuration"));
}

#[test]
#[serial]
fn open_failure_is_initialization_error() {
    let sdk = Arc::new(MockSdk::new());
    sdk.fail_open(true);
    let err = KsCamDriver::open(
        sdk.clone(),
        KsCamConfig::default(),
        Arc::new(BoundedFrameSink::new(4)),
    )
    .unwrap_err();
    assert!(matches!(err, CameraError::Initialization(_)));
    assert_eq!(sdk.open_sessions(), 0);
}

#[test]
#[serial]
fn list_devices_reports_both_simulators() {
    let sdk = Arc::new(MockSdk::new());
    let driver = KsCamDriver::new(
        sdk,
        KsCamConfig::default(),
        Arc::new(BoundedFrameSink::new(1)),
    );
    let names: Vec<String> = driver
        .list_devices()
        .unwrap()
        .into_iter()
        .map(|d| d.camera_name)
        .collect();
    assert_eq!(names, vec![RI2.to_string(), QI2.to_string()]);
}
