//! Configuration loaded from environment variables

use std::str::FromStr;
use std::time::Duration;

use crate::device::{DeviceSettings, DiscoveryPolicy, UsbDescriptor};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// USB vendor ID of the dongle to adopt
    pub vendor_id: u16,

    /// USB product ID of the dongle to adopt
    pub product_id: u16,

    /// USB serial number, used to find the driver index
    pub serial: String,

    pub vendor_name: String,
    pub product_name: String,

    /// Center frequency in Hz
    pub center_freq: u32,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// PPM frequency correction
    pub ppm_error: i32,

    /// Manual tuner gain in tenths of a dB, `None` for automatic gain
    pub gain: Option<i32>,

    /// Index lookups before a new dongle is given up on
    pub discovery_attempts: u32,

    /// Pause between index lookups in milliseconds
    pub discovery_retry_ms: u64,

    /// Capture duration in seconds, 0 runs until Ctrl+C
    pub capture_seconds: u64,

    /// Status logging interval in milliseconds
    pub status_interval_ms: u64,

    /// Buffers the consumer channel holds before dropping
    pub sink_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let hex = |key: &str| lookup(key).and_then(|s| parse_hex_u16(&s));
        let defaults = DeviceSettings::default();

        Self {
            vendor_id: hex("DEVICE_VID").unwrap_or(0x0bda),

            product_id: hex("DEVICE_PID").unwrap_or(0x2838),

            serial: lookup("DEVICE_SERIAL").unwrap_or_else(|| "00000001".to_string()),

            vendor_name: lookup("DEVICE_VENDOR").unwrap_or_else(|| "Realtek".to_string()),

            product_name: lookup("DEVICE_PRODUCT").unwrap_or_else(|| "RTL2838UHIDIR".to_string()),

            center_freq: parse(&lookup, "CENTER_FREQ").unwrap_or(defaults.center_freq),

            sample_rate: parse(&lookup, "SAMPLE_RATE").unwrap_or(defaults.sample_rate),

            ppm_error: parse(&lookup, "PPM_ERROR").unwrap_or(0),

            gain: parse(&lookup, "DEVICE_GAIN"),

            discovery_attempts: parse(&lookup, "DISCOVERY_ATTEMPTS").unwrap_or(5),

            discovery_retry_ms: parse(&lookup, "DISCOVERY_RETRY_MS").unwrap_or(10),

            capture_seconds: parse(&lookup, "CAPTURE_SECONDS").unwrap_or(0),

            status_interval_ms: parse(&lookup, "STATUS_INTERVAL_MS").unwrap_or(1000),

            sink_capacity: parse(&lookup, "SINK_CAPACITY").unwrap_or(64),
        }
    }

    pub fn descriptor(&self) -> UsbDescriptor {
        UsbDescriptor::new(
            self.vendor_id,
            self.product_id,
            self.vendor_name.clone(),
            self.product_name.clone(),
            self.serial.clone(),
        )
    }

    /// Initial settings for adopted devices
    pub fn settings(&self) -> DeviceSettings {
        DeviceSettings {
            sample_rate: self.sample_rate,
            center_freq: self.center_freq,
            ppm_correction: self.ppm_error,
            auto_gain: self.gain.is_none(),
            gain: self.gain.unwrap_or(0),
        }
    }

    pub fn policy(&self) -> DiscoveryPolicy {
        DiscoveryPolicy {
            max_attempts: self.discovery_attempts.max(1),
            retry_delay: Duration::from_millis(self.discovery_retry_ms),
        }
    }
}

/// Parse one variable, `None` when absent or malformed
fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

/// Accepts "0bda", "0x0bda" and "0X0BDA"
fn parse_hex_u16(s: &str) -> Option<u16> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(digits, 16).ok()
}
