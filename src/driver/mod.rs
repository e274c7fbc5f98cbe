//! Driver adapter - the synchronous command surface of the radio driver
//!
//! Every call may block and may fail. Nothing above this seam touches the
//! hardware directly:
//! 1. `index_by_serial` resolves a USB serial to the driver's transient index
//! 2. `open` / `close` bracket a session identified by an opaque handle
//! 3. setters and getters translate to the driver's numeric representation
//! 4. `read_async` blocks its caller until `cancel_async` is observed

#[cfg(feature = "librtlsdr")]
pub mod librtlsdr;
pub mod mock;

use std::fmt;

use crate::error::DriverResult;
use crate::stream::StreamToken;

#[cfg(feature = "librtlsdr")]
pub use librtlsdr::LibRtlSdr;
pub use mock::{DriverCall, MockDriver, Programmed, ReadOutcome};

/// Tuner gain control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainMode {
    Auto,
    Manual,
}

impl GainMode {
    /// Numeric value expected by `rtlsdr_set_tuner_gain_mode`
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Auto => 0,
            Self::Manual => 1,
        }
    }

    pub fn from_auto(auto: bool) -> Self {
        if auto {
            Self::Auto
        } else {
            Self::Manual
        }
    }
}

/// Tuner chip identifiers reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum TunerType {
    #[default]
    Unknown = 0,
    E4000 = 1,
    Fc0012 = 2,
    Fc0013 = 3,
    Fc2580 = 4,
    R820t = 5,
    R828d = 6,
}

impl From<i32> for TunerType {
    fn from(raw: i32) -> Self {
        match raw {
            1 => Self::E4000,
            2 => Self::Fc0012,
            3 => Self::Fc0013,
            4 => Self::Fc2580,
            5 => Self::R820t,
            6 => Self::R828d,
            _ => Self::Unknown,
        }
    }
}

impl TunerType {
    /// Human-readable chip name
    pub fn name(self) -> &'static str {
        match self {
            Self::E4000 => "Elonics E4000",
            Self::Fc0012 => "Fitipower FC0012",
            Self::Fc0013 => "Fitipower FC0013",
            Self::Fc2580 => "FCI 2580",
            Self::R820t => "Rafael Micro R820T",
            Self::R828d => "Rafael Micro R828D",
            Self::Unknown => "Unknown Tuner",
        }
    }
}

impl fmt::Display for TunerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Synchronous binding to the radio driver
///
/// Handles are plain copyable values; ownership of an open session is
/// tracked by the device that opened it, never by the handle itself.
pub trait Driver: Send + Sync + 'static {
    type Handle: Copy + Send + Sync + fmt::Debug + 'static;

    /// Driver index for a serial number, negative while not yet recognized
    fn index_by_serial(&self, serial: &str) -> i32;

    fn open(&self, index: u32) -> DriverResult<Self::Handle>;
    fn close(&self, handle: Self::Handle);

    fn set_sample_rate(&self, handle: Self::Handle, rate: u32) -> DriverResult<()>;
    fn sample_rate(&self, handle: Self::Handle) -> DriverResult<u32>;

    fn set_center_freq(&self, handle: Self::Handle, freq: u32) -> DriverResult<()>;
    fn center_freq(&self, handle: Self::Handle) -> DriverResult<u32>;

    fn set_freq_correction(&self, handle: Self::Handle, ppm: i32) -> DriverResult<()>;
    fn freq_correction(&self, handle: Self::Handle) -> DriverResult<i32>;

    fn set_tuner_gain_mode(&self, handle: Self::Handle, mode: GainMode) -> DriverResult<()>;

    /// Gain in tenths of a dB
    fn set_tuner_gain(&self, handle: Self::Handle, gain: i32) -> DriverResult<()>;
    fn tuner_gain(&self, handle: Self::Handle) -> DriverResult<i32>;

    /// Supported discrete gain steps, in tenths of a dB
    fn tuner_gains(&self, handle: Self::Handle) -> DriverResult<Vec<i32>>;
    fn tuner_type(&self, handle: Self::Handle) -> TunerType;

    fn reset_buffer(&self, handle: Self::Handle) -> DriverResult<()>;

    /// Blocks until cancelled, delivering every captured buffer through
    /// `stream.dispatch()` on the calling thread.
    fn read_async(
        &self,
        handle: Self::Handle,
        stream: StreamToken,
        buf_num: u32,
        buf_len: u32,
    ) -> DriverResult<()>;

    fn cancel_async(&self, handle: Self::Handle) -> DriverResult<()>;
}
