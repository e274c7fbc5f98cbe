//! RTL-SDR dongle lifecycle
//!
//! Detects dongles safely amid concurrent hot-plug events, runs their
//! one-time capability discovery, applies tuning and gain settings, and
//! streams raw sample buffers to a consumer:
//! 1. `device::discovery` admits one new dongle at a time
//! 2. `device::RtlSdrDevice` holds requested settings and pushes them down
//! 3. `stream` runs the blocking async read and forwards every buffer
//! 4. `driver` is the seam to librtlsdr (or the simulated driver)

pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod stream;

pub use config::Config;
pub use device::{
    DeviceManager, DeviceSettings, DeviceStatus, DiscoveryGate, DiscoveryPolicy, HotplugEvent,
    RtlSdrDevice, UsbDescriptor,
};
pub use driver::{Driver, GainMode, TunerType};
pub use error::{DeviceError, DriverError};
pub use stream::{ChannelSink, SampleBuffer, SampleSink, StreamEnd};
