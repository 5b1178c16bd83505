//! Shared fixtures for the KsCam driver integration tests.
//!
//! Every test drives the simulator SDK; nothing here needs hardware.

#![allow(dead_code)] // Not every test file uses every helper

use std::sync::Arc;
use std::time::{Duration, Instant};

use kscam_core::BoundedFrameSink;
use kscam_driver::sdk::mock::MockSdk;
use kscam_driver::{KsCamConfig, KsCamDriver};

pub const RI2: &str = "DS-Ri2 Simulator";
pub const QI2: &str = "DS-Qi2 Simulator";

/// Generous upper bound for anything the simulator clock drives.
pub const SETTLE: Duration = Duration::from_secs(5);

/// An initialized driver plus handles on its simulator and sink.
pub struct TestCamera {
    pub sdk: Arc<MockSdk>,
    pub sink: Arc<BoundedFrameSink>,
    pub driver: KsCamDriver,
}

impl TestCamera {
    pub fn open(camera_name: &str) -> Self {
        Self::with_config(KsCamConfig {
            camera_name: Some(camera_name.to_string()),
            ..Default::default()
        })
    }

    pub fn with_config(config: KsCamConfig) -> Self {
        let sdk = Arc::new(MockSdk::new());
        let sink = Arc::new(BoundedFrameSink::new(config.sink_capacity));
        let driver = KsCamDriver::open(sdk.clone(), config, sink.clone())
            .unwrap_or_else(|e| panic!("driver failed to open: {}", e));
        Self { sdk, sink, driver }
    }

    pub fn handle(&self) -> u32 {
        self.driver.handle().unwrap()
    }
}

impl Drop for TestCamera {
    fn drop(&mut self) {
        let _ = self.driver.shutdown();
    }
}

/// Poll `condition` until it holds or `timeout` expires.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
