//! CLI Entry Point for the KsCam driver
//!
//! Drives the simulated Ri2 / Qi2 devices:
//!
//! ```bash
//! kscam list
//! kscam props
//! kscam set Exposure 25
//! kscam snap --output frame.raw
//! kscam stream --count 20 --interval-ms 50
//! ```
//!
//! Settings come from `--config <file.toml>` and `KSCAM_*` environment
//! variables. `RUST_LOG` overrides the configured log level.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use kscam_core::capabilities::{Commandable, FrameProducer, Parameterized};
use kscam_core::BoundedFrameSink;
use kscam_driver::sdk::mock::MockSdk;
use kscam_driver::{KsCamConfig, KsCamDriver};

#[derive(Parser)]
#[command(name = "kscam")]
#[command(about = "Nikon DS-Ri2 / DS-Qi2 camera driver front end", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Camera to open (overrides the config)
    #[arg(long, global = true)]
    camera: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected devices
    List,

    /// Print every property with its value and limits
    Props,

    /// Set a property, then print its value as read back
    Set { name: String, value: String },

    /// Acquire one image
    Snap {
        /// Write the output pixels to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run a sequence and report its statistics
    Stream {
        #[arg(long, default_value = "10")]
        count: u32,

        /// Minimum time between images
        #[arg(long, default_value = "0")]
        interval_ms: u64,
    },

    /// Run a device command (one_push_ae, frame_size, ...)
    Command { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => KsCamConfig::load_from(path)?,
        None => KsCamConfig::load()?,
    };
    if cli.camera.is_some() {
        config.camera_name = cli.camera.clone();
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let sdk = Arc::new(MockSdk::new());
    let sink = Arc::new(BoundedFrameSink::new(config.sink_capacity));
    let driver = KsCamDriver::new(sdk, config, sink.clone());

    if let Commands::List = cli.command {
        for device in driver.list_devices()? {
            println!(
                "{:<2} {:<20} {:<14} serial {}",
                device.index,
                device.camera_name,
                device.device_type.as_str(),
                device.serial_no
            );
        }
        return Ok(());
    }

    driver.initialize().context("camera initialization failed")?;
    let result = run(&driver, &sink, cli.command).await;
    driver.shutdown()?;
    result
}

async fn run(driver: &KsCamDriver, sink: &BoundedFrameSink, command: Commands) -> Result<()> {
    match command {
        Commands::List => Ok(()),
        Commands::Props => {
            for prop in driver.parameters().properties() {
                let value = prop.get().map_or_else(|e| format!("<{}>", e), |v| v.to_string());
                let mut line = format!("{:<24} = {}", prop.name(), value);
                if let Some((min, max)) = prop.limits() {
                    line.push_str(&format!("  [{}, {}]", min, max));
                }
                let allowed = prop.allowed_values();
                if !allowed.is_empty() {
                    line.push_str(&format!("  {{{}}}", allowed.join(", ")));
                }
                if prop.is_read_only() {
                    line.push_str("  (read-only)");
                }
                println!("{}", line);
            }
            Ok(())
        }
        Commands::Set { name, value } => {
            let props = driver.parameters();
            props.set_str(&name, &value)?;
            println!("{} = {}", name, props.get_value(&name)?);
            Ok(())
        }
        Commands::Snap { output } => {
            driver.snap_image()?;
            let frame = driver.image_buffer()?;
            println!(
                "{}x{} {} bytes/pixel, {} bytes",
                frame.width,
                frame.height,
                frame.bytes_per_pixel,
                frame.data.len()
            );
            if let Some(path) = output {
                std::fs::write(&path, &frame.data)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("wrote {}", path.display());
            }
            Ok(())
        }
        Commands::Stream { count, interval_ms } => {
            driver.start_sequence(
                u64::from(count),
                Duration::from_millis(interval_ms),
                driver.config().stop_on_overflow,
            )?;
            let timeout = Duration::from_secs(5) + Duration::from_millis(interval_ms) * count;
            if !sink.wait_finished(1, timeout) {
                tracing::warn!(?timeout, "sequence did not finish in time; stopping");
                driver.stop_stream().await?;
            }
            let stats = driver.sequence_stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            println!(
                "frames delivered {}, overflows {}",
                sink.inserted(),
                sink.overflows()
            );
            Ok(())
        }
        Commands::Command { name } => {
            let reply = driver.execute_command(&name, serde_json::json!({})).await?;
            println!("{}", reply);
            Ok(())
        }
    }
}
