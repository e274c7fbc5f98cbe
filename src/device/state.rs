//! Per-device configuration and streaming statistics

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::identity::SAMPLE_RATES;

/// Statistics for a device's sample stream
#[derive(Debug, Default)]
pub struct StreamStats {
    pub buffers_delivered: AtomicU64,
    pub bytes_delivered: AtomicU64,
    /// Unix millis of the first delivered buffer, 0 until then
    pub first_buffer_ms: AtomicI64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_buffer(&self, len: usize) {
        if self.buffers_delivered.fetch_add(1, Ordering::Relaxed) == 0 {
            self.first_buffer_ms
                .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        }
        self.bytes_delivered.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn buffers(&self) -> u64 {
        self.buffers_delivered.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes_delivered.load(Ordering::Relaxed)
    }

    pub fn first_buffer_ms(&self) -> Option<i64> {
        match self.first_buffer_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }
}

/// Last requested configuration of a device
///
/// These values survive close/reopen and are re-applied to the hardware
/// every time a stream starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub sample_rate: u32,
    pub center_freq: u32,
    /// Frequency correction in ppm
    pub ppm_correction: i32,
    pub auto_gain: bool,
    /// Manual gain in tenths of a dB, ignored while `auto_gain` is set
    pub gain: i32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATES[SAMPLE_RATES.len() - 1],
            center_freq: 100_000_000,
            ppm_correction: 0,
            auto_gain: false,
            gain: 0,
        }
    }
}
