//! Camera Capabilities
//!
//! Fine-grained capability traits implemented by the KsCam driver. Host code
//! works against trait bounds rather than the concrete driver:
//!
//! - `ExposureControl`: exposure time in seconds
//! - `Triggerable`: software trigger on an armed device
//! - `FrameProducer`: sequence acquisition
//! - `Parameterized`: access to the property registry
//! - `Commandable`: device-specific one-shot commands
//!
//! Each trait is async (`#[async_trait]`), `Send + Sync`, and returns
//! `anyhow::Result`. Implementations move blocking SDK calls off the
//! executor themselves.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn timed_sequence<C>(camera: &C, frames: u32) -> Result<()>
//! where
//!     C: ExposureControl + FrameProducer,
//! {
//!     camera.set_exposure(0.010).await?;
//!     camera.start_stream_finite(Some(frames)).await?;
//!     while camera.is_streaming().await? {
//!         tokio::time::sleep(Duration::from_millis(10)).await;
//!     }
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::property::PropertySet;

/// Capability: Exposure Control
#[async_trait]
pub trait ExposureControl: Send + Sync {
    /// Set exposure time in seconds.
    ///
    /// The device quantizes the value; read it back with
    /// [`get_exposure`](Self::get_exposure).
    async fn set_exposure(&self, seconds: f64) -> Result<()>;

    /// Current exposure time in seconds.
    async fn get_exposure(&self) -> Result<f64>;
}

/// Capability: Software Trigger
#[async_trait]
pub trait Triggerable: Send + Sync {
    /// Prepare the device to accept triggers.
    async fn arm(&self) -> Result<()>;

    /// Issue one software trigger.
    async fn trigger(&self) -> Result<()>;

    /// Whether triggers are currently accepted.
    async fn is_armed(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Capability: Frame Production
///
/// Frames go to the sink the producer was configured with.
#[async_trait]
pub trait FrameProducer: Send + Sync {
    /// Start an open-ended sequence.
    async fn start_stream(&self) -> Result<()>;

    /// Start a sequence of `frame_limit` frames. `None` means open-ended.
    async fn start_stream_finite(&self, frame_limit: Option<u32>) -> Result<()> {
        match frame_limit {
            None => self.start_stream().await,
            Some(_) => anyhow::bail!("finite sequences are not supported by this producer"),
        }
    }

    /// Stop the running sequence, if any.
    async fn stop_stream(&self) -> Result<()>;

    /// Current output resolution (width, height).
    fn resolution(&self) -> (u32, u32);

    /// Whether a sequence is running.
    async fn is_streaming(&self) -> Result<bool> {
        Ok(false)
    }

    /// Frames delivered by the current or most recent sequence.
    fn frame_count(&self) -> u64 {
        0
    }
}

/// Capability: Parameter Registry
pub trait Parameterized: Send + Sync {
    /// Device property registry
    fn parameters(&self) -> &PropertySet;
}

/// Capability: Device Commands
#[async_trait]
pub trait Commandable: Send + Sync {
    /// Execute a named command.
    ///
    /// # Arguments
    /// * `command` - Command identifier
    /// * `args` - Command arguments as a JSON object
    ///
    /// # Returns
    /// - Ok(JSON object) with results
    /// - Err if the command is unknown or failed
    async fn execute_command(
        &self,
        command: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value>;
}
