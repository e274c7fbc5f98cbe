//! Sample streaming plumbing
//!
//! Buffers travel driver callback -> `StreamToken::dispatch` -> `SampleSink`
//! on the callback thread. Nothing here queues or batches; a consumer that
//! needs slack brings its own channel (see `ChannelSink`).

pub mod registry;
mod worker;

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::device::DeviceIdentity;
use crate::error::DriverError;

pub use registry::{register, Registration, StreamTarget, StreamToken};
pub(crate) use worker::{AsyncReadWorker, ReadCanceller, ReadParams};

/// Why an async read returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Stopped through `stop_stream`
    Cancelled,
    /// The driver returned without a stop request
    Ended,
    /// The driver reported an error
    Failed(DriverError),
}

impl StreamEnd {
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// Consumer of raw sample buffers
///
/// Called on the driver's callback thread. Blocking here stalls the read
/// worker and with it the device.
pub trait SampleSink: Send + Sync {
    fn on_samples(&self, device: &DeviceIdentity, samples: Vec<u8>);

    fn on_stream_end(&self, _device: &DeviceIdentity, _end: &StreamEnd) {}
}

impl<F> SampleSink for F
where
    F: Fn(&DeviceIdentity, Vec<u8>) + Send + Sync,
{
    fn on_samples(&self, device: &DeviceIdentity, samples: Vec<u8>) {
        self(device, samples)
    }
}

/// One buffer as delivered to a `ChannelSink` receiver
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    pub serial: String,
    pub data: Vec<u8>,
}

/// Sink that hands buffers to a bounded channel, dropping when it is full
pub struct ChannelSink {
    tx: Sender<SampleBuffer>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<SampleBuffer>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Buffers discarded because the receiver fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl SampleSink for ChannelSink {
    fn on_samples(&self, device: &DeviceIdentity, samples: Vec<u8>) {
        let buffer = SampleBuffer {
            serial: device.serial().to_string(),
            data: samples,
        };
        match self.tx.try_send(buffer) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    debug!("Sample channel full, {} buffers dropped so far", dropped);
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn on_stream_end(&self, device: &DeviceIdentity, end: &StreamEnd) {
        if end.is_unexpected() {
            warn!("Stream from {} ended: {:?}", device, end);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::UsbDescriptor;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::from_descriptor(&UsbDescriptor::new(
            0x0bda,
            0x2838,
            "Realtek",
            "RTL2838UHIDIR",
            "00000042",
        ))
    }

    #[test]
    fn test_channel_sink_delivers_in_order() {
        let (sink, rx) = ChannelSink::bounded(4);
        let device = identity();
        sink.on_samples(&device, vec![1]);
        sink.on_samples(&device, vec![2, 2]);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.serial, "00000042");
        assert_eq!(first.data, vec![1]);
        assert_eq!(second.data, vec![2, 2]);
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, rx) = ChannelSink::bounded(1);
        let device = identity();
        sink.on_samples(&device, vec![1]);
        sink.on_samples(&device, vec![2]);
        sink.on_samples(&device, vec![3]);

        assert_eq!(sink.dropped(), 2);
        assert_eq!(rx.try_recv().unwrap().data, vec![1]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stream_end_classification() {
        assert!(!StreamEnd::Cancelled.is_unexpected());
        assert!(StreamEnd::Ended.is_unexpected());
        assert!(StreamEnd::Failed(DriverError::call("rtlsdr_read_async", -4)).is_unexpected());
    }
}
