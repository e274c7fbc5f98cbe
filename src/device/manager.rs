//! Device manager - adopts attached dongles and retires detached ones

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::Receiver;
use tracing::{debug, info};

use super::discovery::{DiscoveryGate, DiscoveryPolicy};
use super::identity::UsbDescriptor;
use super::rtlsdr::RtlSdrDevice;
use super::state::DeviceSettings;
use crate::driver::Driver;
use crate::stream::SampleSink;

/// Notification from the USB hot-plug source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Attached(UsbDescriptor),
    Detached { serial: String },
}

/// Tracks adopted devices by serial number
pub struct DeviceManager<D: Driver> {
    driver: Arc<D>,
    policy: DiscoveryPolicy,
    settings: DeviceSettings,
    sink: Option<Arc<dyn SampleSink>>,
    devices: Mutex<HashMap<String, Arc<RtlSdrDevice<D>>>>,
}

impl<D: Driver> DeviceManager<D> {
    pub fn new(driver: Arc<D>, policy: DiscoveryPolicy, settings: DeviceSettings) -> Self {
        Self {
            driver,
            policy,
            settings,
            sink: None,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Sink attached to every device adopted from now on
    pub fn with_sink(mut self, sink: Arc<dyn SampleSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn devices_lock(&self) -> MutexGuard<'_, HashMap<String, Arc<RtlSdrDevice<D>>>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one hot-plug event. Returns the device adopted by an attach.
    pub fn handle_event(&self, event: HotplugEvent) -> Option<Arc<RtlSdrDevice<D>>> {
        match event {
            HotplugEvent::Attached(desc) => self.attach(&desc),
            HotplugEvent::Detached { serial } => {
                self.detach(&serial);
                None
            }
        }
    }

    fn attach(&self, desc: &UsbDescriptor) -> Option<Arc<RtlSdrDevice<D>>> {
        if let Some(existing) = self.device(&desc.serial) {
            debug!("{} already adopted", existing.name());
            return Some(existing);
        }

        // Adoption can block for a while; keep the map unlocked meanwhile
        let device =
            DiscoveryGate::global().try_adopt(&self.driver, desc, &self.policy, self.settings)?;
        if let Some(sink) = &self.sink {
            device.set_sink(sink.clone());
        }

        let device = Arc::new(device);
        info!("Adopted {} ({})", device.name(), device.tuner_name());
        self.devices_lock().insert(desc.serial.clone(), device.clone());
        Some(device)
    }

    fn detach(&self, serial: &str) {
        let removed = self.devices_lock().remove(serial);
        match removed {
            Some(device) => {
                device.stop_stream();
                info!("Removed {}", device.name());
            }
            None => debug!("Detach for unknown serial {}", serial),
        }
    }

    pub fn device(&self, serial: &str) -> Option<Arc<RtlSdrDevice<D>>> {
        self.devices_lock().get(serial).cloned()
    }

    pub fn devices(&self) -> Vec<Arc<RtlSdrDevice<D>>> {
        self.devices_lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Process events until every sender is gone
    pub fn run(&self, events: Receiver<HotplugEvent>) {
        for event in events.iter() {
            self.handle_event(event);
        }
        debug!("Hot-plug channel closed");
    }

    pub fn stop_all(&self) {
        for device in self.devices() {
            device.stop_stream();
        }
    }
}
