//! RTL-SDR Capture Service
//!
//! Adopts one RTL-SDR dongle, streams raw IQ buffers from it and reports
//! device status until the capture window closes or Ctrl+C is pressed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rtlsdr_lifecycle::{ChannelSink, Config, DeviceManager, Driver, HotplugEvent, SampleSink};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("RTL-SDR Capture Service starting...");

    let config = Config::from_env();
    info!("Configuration: {:?}", config);

    let driver = build_driver(&config.serial);
    run(config, driver).await
}

#[cfg(feature = "librtlsdr")]
fn build_driver(_serial: &str) -> Arc<rtlsdr_lifecycle::driver::LibRtlSdr> {
    info!("Using librtlsdr driver");
    Arc::new(rtlsdr_lifecycle::driver::LibRtlSdr::new())
}

#[cfg(not(feature = "librtlsdr"))]
fn build_driver(serial: &str) -> Arc<rtlsdr_lifecycle::driver::MockDriver> {
    warn!("Built without the librtlsdr feature, using the simulated driver");
    let driver = rtlsdr_lifecycle::driver::MockDriver::new()
        .with_synthetic_stream(16_384 * 2, Duration::from_millis(10));
    // A freshly plugged dongle is not visible to the first lookup
    driver.attach_delayed(serial, 1);
    Arc::new(driver)
}

async fn run<D: Driver>(config: Config, driver: Arc<D>) -> Result<()> {
    let (sink, samples) = ChannelSink::bounded(config.sink_capacity);
    let sink = Arc::new(sink);

    let manager = DeviceManager::new(driver, config.policy(), config.settings())
        .with_sink(sink.clone() as Arc<dyn SampleSink>);

    let device = manager
        .handle_event(HotplugEvent::Attached(config.descriptor()))
        .with_context(|| {
            format!(
                "{:04x}:{:04x} SN: {} was not adopted",
                config.vendor_id, config.product_id, config.serial
            )
        })?;

    info!(
        "Device: {} | tuner: {} | {} gain steps | rates: {:?} | {}-{} Hz",
        device.name(),
        device.tuner_name(),
        device.gain_list().len(),
        device.sample_rates(),
        device.min_frequency(),
        device.max_frequency()
    );

    device
        .start_stream()
        .with_context(|| format!("Failed to start streaming from {}", device.name()))?;

    // Blocking consumer, drained until every sender is gone
    let consumer = tokio::task::spawn_blocking(move || {
        let mut buffers = 0u64;
        let mut bytes = 0u64;
        for buffer in samples.iter() {
            buffers += 1;
            bytes += buffer.data.len() as u64;
        }
        (buffers, bytes)
    });

    let capture = (config.capture_seconds > 0).then(|| Duration::from_secs(config.capture_seconds));
    let deadline = async move {
        match capture {
            Some(window) => tokio::time::sleep(window).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut status_interval =
        tokio::time::interval(Duration::from_millis(config.status_interval_ms.max(1)));

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            _ = &mut deadline => {
                info!("Capture window of {}s elapsed", config.capture_seconds);
                break;
            }
            _ = status_interval.tick() => {
                let status = device.status();
                info!("[Status] {}", serde_json::to_string(&status)?);
                if !status.streaming {
                    warn!("{} is no longer streaming", device.name());
                    break;
                }
            }
        }
    }

    manager.stop_all();
    let dropped = sink.dropped();
    let first_buffer = device.stats().first_buffer_ms();

    // Release every sender so the consumer can finish
    drop(device);
    drop(manager);
    drop(sink);

    let (buffers, bytes) = consumer.await.context("Sample consumer panicked")?;
    info!(
        "Captured {} buffers ({} bytes), {} dropped, first buffer at {:?} ms",
        buffers, bytes, dropped, first_buffer
    );

    info!("RTL-SDR Capture Service stopped");
    Ok(())
}
