//! Serialized discovery and adoption of newly attached dongles
//!
//! librtlsdr hands index 0 to whichever new dongle it notices first, so two
//! dongles probed at the same time can swap identities. The whole
//! match -> index poll -> construct -> initialize sequence therefore runs
//! under one process-wide gate.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::identity::UsbDescriptor;
use super::rtlsdr::RtlSdrDevice;
use super::state::DeviceSettings;
use crate::driver::Driver;

/// How long to wait for the driver to recognize a new dongle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryPolicy {
    /// Index lookups before giving up
    pub max_attempts: u32,
    /// Pause between lookups, zero polls back to back
    pub retry_delay: Duration,
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_millis(10),
        }
    }
}

/// Admission gate: one adoption at a time
#[derive(Debug, Default)]
pub struct DiscoveryGate {
    lock: Mutex<()>,
}

static GLOBAL_GATE: DiscoveryGate = DiscoveryGate::new();

impl DiscoveryGate {
    pub const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }

    /// The gate shared by every discovery source in the process
    pub fn global() -> &'static DiscoveryGate {
        &GLOBAL_GATE
    }

    /// Adopt a discovered dongle, or `None` if it is not a supported chipset
    /// or the driver never recognized it.
    ///
    /// Blocks while another adoption is in progress. Not adopting is a
    /// normal outcome, not an error.
    pub fn try_adopt<D: Driver>(
        &self,
        driver: &Arc<D>,
        desc: &UsbDescriptor,
        policy: &DiscoveryPolicy,
        settings: DeviceSettings,
    ) -> Option<RtlSdrDevice<D>> {
        if !desc.is_supported() {
            debug!(
                "Ignoring {:04x}:{:04x} ({}), not an RTL-SDR",
                desc.vendor_id, desc.product_id, desc.product_name
            );
            return None;
        }

        let _admitted = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let index = wait_for_index(driver.as_ref(), &desc.serial, policy)?;
        info!(
            "RTL-SDR {} SN: {} recognized at index {}",
            desc.product_name, desc.serial, index
        );

        let device = RtlSdrDevice::new(driver.clone(), desc, settings);
        match device.initialize() {
            Ok(()) => Some(device),
            Err(e) => {
                warn!("Failed to initialize {}: {}", device.name(), e);
                None
            }
        }
    }
}

/// Poll the driver until it reports a valid index for `serial`
fn wait_for_index<D: Driver>(driver: &D, serial: &str, policy: &DiscoveryPolicy) -> Option<u32> {
    for attempt in 1..=policy.max_attempts {
        let index = driver.index_by_serial(serial);
        if index >= 0 {
            debug!("SN: {} found after {} lookup(s)", serial, attempt);
            return Some(index as u32);
        }
        if attempt < policy.max_attempts && !policy.retry_delay.is_zero() {
            thread::sleep(policy.retry_delay);
        }
    }

    warn!(
        "SN: {} not recognized by the driver after {} lookups, skipping",
        serial, policy.max_attempts
    );
    None
}

/// Adopt through the process-wide gate
pub fn try_adopt<D: Driver>(
    driver: &Arc<D>,
    desc: &UsbDescriptor,
    policy: &DiscoveryPolicy,
    settings: DeviceSettings,
) -> Option<RtlSdrDevice<D>> {
    DiscoveryGate::global().try_adopt(driver, desc, policy, settings)
}
