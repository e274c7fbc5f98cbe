//! Error types for driver calls and device lifecycle operations

use thiserror::Error;

/// A failed call into the radio driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The driver returned a negative status code
    #[error("{op} failed with code {code}")]
    Call { op: &'static str, code: i32 },

    /// No device answers to the requested index
    #[error("no device at index {0}")]
    NoDevice(u32),
}

impl DriverError {
    pub fn call(op: &'static str, code: i32) -> Self {
        Self::Call { op, code }
    }
}

/// Result type alias for driver calls
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors surfaced by device lifecycle operations
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device {serial} is not recognized by the driver")]
    NotFound { serial: String },

    #[error("failed to open device {serial}: {source}")]
    Open {
        serial: String,
        #[source]
        source: DriverError,
    },

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("no sample sink attached to {0}")]
    NoSink(String),

    #[error("failed to spawn async read worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

/// Result type alias for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
