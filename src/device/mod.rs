//! RTL-SDR device lifecycle
//!
//! - `identity`: USB identity, known chipsets and fixed capabilities
//! - `state`: requested configuration and stream statistics
//! - `rtlsdr`: configuration push-down and the streaming state machine
//! - `discovery`: serialized adoption of newly attached dongles
//! - `manager`: hot-plug bookkeeping

pub mod discovery;
pub mod identity;
pub mod manager;
pub mod rtlsdr;
pub mod state;

pub use discovery::{try_adopt, DiscoveryGate, DiscoveryPolicy};
pub use identity::{
    is_known_device, known_device_name, Capabilities, DeviceIdentity, UsbDescriptor,
    MAX_FREQUENCY, MIN_FREQUENCY, SAMPLE_RATES,
};
pub use manager::{DeviceManager, HotplugEvent};
pub use rtlsdr::{DeviceStatus, RtlSdrDevice};
pub use state::{DeviceSettings, StreamStats};
