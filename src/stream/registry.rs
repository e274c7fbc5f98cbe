//! Process-wide stream table used by the driver callback trampoline
//!
//! The driver only ever sees a `StreamToken`. When a buffer arrives the token
//! is resolved through this table to the live stream target, so no device
//! pointer crosses the driver boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::trace;

use super::SampleSink;
use crate::device::{DeviceIdentity, StreamStats};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

fn streams() -> &'static RwLock<HashMap<u64, Arc<StreamTarget>>> {
    static STREAMS: OnceLock<RwLock<HashMap<u64, Arc<StreamTarget>>>> = OnceLock::new();
    STREAMS.get_or_init(Default::default)
}

/// Where buffers for one stream end up
pub struct StreamTarget {
    pub identity: Arc<DeviceIdentity>,
    pub sink: Arc<dyn SampleSink>,
    pub stats: Arc<StreamStats>,
}

/// Stable identity of a registered stream, passed to the driver as context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamToken(u64);

impl StreamToken {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// Forward one driver buffer to the stream's consumer.
    ///
    /// The bytes are copied out of the driver-owned buffer before the sink
    /// sees them. Returns false if the stream is no longer registered.
    pub fn dispatch(self, buf: &[u8]) -> bool {
        let target = streams()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.0)
            .cloned();

        match target {
            Some(target) => {
                target.stats.record_buffer(buf.len());
                target.sink.on_samples(&target.identity, buf.to_vec());
                true
            }
            None => {
                trace!("Dropping {} bytes for unregistered stream {}", buf.len(), self.0);
                false
            }
        }
    }

    pub fn is_registered(self) -> bool {
        streams()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&self.0)
    }
}

/// Keeps a stream registered until dropped
#[derive(Debug)]
pub struct Registration {
    token: StreamToken,
}

impl Registration {
    pub fn token(&self) -> StreamToken {
        self.token
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        streams()
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.token.0);
    }
}

/// Register a stream target and hand back its token guard
pub fn register(target: StreamTarget) -> Registration {
    let token = StreamToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed));
    streams()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(token.0, Arc::new(target));
    Registration { token }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::UsbDescriptor;
    use std::sync::Mutex;

    fn target(sink: Arc<dyn SampleSink>) -> StreamTarget {
        let desc = UsbDescriptor::new(0x0bda, 0x2838, "Realtek", "RTL2838UHIDIR", "00000001");
        StreamTarget {
            identity: Arc::new(DeviceIdentity::from_descriptor(&desc)),
            sink,
            stats: Arc::new(StreamStats::new()),
        }
    }

    #[test]
    fn test_dispatch_reaches_sink() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let captured = received.clone();
        let sink = move |device: &DeviceIdentity, samples: Vec<u8>| {
            captured.lock().unwrap().push((device.serial().to_string(), samples));
        };
        let t = target(Arc::new(sink));
        let stats = t.stats.clone();
        let registration = register(t);

        assert!(registration.token().dispatch(&[1, 2, 3]));
        assert!(registration.token().dispatch(&[4]));

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], ("00000001".to_string(), vec![1, 2, 3]));
        assert_eq!(stats.buffers(), 2);
        assert_eq!(stats.bytes(), 4);
    }

    #[test]
    fn test_dispatch_after_unregister_is_dropped() {
        let sink = |_: &DeviceIdentity, _: Vec<u8>| panic!("sink called after unregister");
        let registration = register(target(Arc::new(sink)));
        let token = registration.token();
        assert!(token.is_registered());

        drop(registration);

        assert!(!token.is_registered());
        assert!(!token.dispatch(&[0u8; 16]));
    }

    #[test]
    fn test_tokens_are_unique() {
        let sink = |_: &DeviceIdentity, _: Vec<u8>| {};
        let a = register(target(Arc::new(sink)));
        let b = register(target(Arc::new(sink)));
        assert_ne!(a.token(), b.token());
        assert_eq!(StreamToken::from_raw(a.token().as_raw()), a.token());
    }
}
