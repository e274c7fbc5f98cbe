//! RTL-SDR device: configuration state and the streaming lifecycle
//!
//! Closed --start_stream--> Open (settings re-applied, buffer reset)
//!      --> Streaming (read worker running) --stop_stream--> cancel, close --> Closed
//!
//! All control operations on one device run under a single mutex, so
//! concurrent start/stop calls are applied one after the other. A stop issued
//! from inside a sample callback only cancels the read; the device is closed
//! by the next stop or start from a control thread.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::identity::{
    Capabilities, DeviceIdentity, UsbDescriptor, ASYNC_BUF_LEN, ASYNC_BUF_NUM, MAX_FREQUENCY,
    MIN_FREQUENCY, SAMPLE_RATES,
};
use super::state::{DeviceSettings, StreamStats};
use crate::driver::{Driver, GainMode, TunerType};
use crate::error::{DeviceError, DeviceResult, DriverResult};
use crate::stream::{AsyncReadWorker, ReadCanceller, ReadParams, SampleSink, StreamTarget};

/// Pause between cancel attempts while the read is still starting up
const CANCEL_RETRY: Duration = Duration::from_millis(1);

/// Mutable side of a device, guarded by the control mutex
struct Control<H> {
    handle: Option<H>,
    settings: DeviceSettings,
    sink: Option<Arc<dyn SampleSink>>,
    worker: Option<AsyncReadWorker>,
}

/// Serializable snapshot of a device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub name: String,
    pub serial: String,
    pub tuner: &'static str,
    pub open: bool,
    pub configured: bool,
    pub streaming: bool,
    pub settings: DeviceSettings,
    pub buffers_delivered: u64,
    pub bytes_delivered: u64,
    pub timestamp_ms: i64,
}

/// An adopted RTL-SDR dongle
pub struct RtlSdrDevice<D: Driver> {
    driver: Arc<D>,
    identity: Arc<DeviceIdentity>,
    capabilities: OnceLock<Capabilities>,
    stats: Arc<StreamStats>,
    control: Mutex<Control<D::Handle>>,
    /// The running read, reachable from its own callback without `control`
    reader: Mutex<Option<(ReadCanceller, D::Handle)>>,
}

impl<D: Driver> RtlSdrDevice<D> {
    pub(crate) fn new(driver: Arc<D>, desc: &UsbDescriptor, settings: DeviceSettings) -> Self {
        let identity = DeviceIdentity::from_descriptor(desc);
        info!("RTL-SDR: creating <{}>", identity);

        Self {
            driver,
            identity: Arc::new(identity),
            capabilities: OnceLock::new(),
            stats: Arc::new(StreamStats::new()),
            control: Mutex::new(Control {
                handle: None,
                settings,
                sink: None,
                worker: None,
            }),
            reader: Mutex::new(None),
        }
    }

    fn control(&self) -> MutexGuard<'_, Control<D::Handle>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reader(&self) -> MutexGuard<'_, Option<(ReadCanceller, D::Handle)>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Identity and capabilities
    // ------------------------------------------------------------------

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Display name, "<vendor> <product> SN: <serial>"
    pub fn name(&self) -> &str {
        self.identity.name()
    }

    pub fn serial(&self) -> &str {
        self.identity.serial()
    }

    pub fn tuner(&self) -> TunerType {
        self.capabilities
            .get()
            .map(|caps| caps.tuner)
            .unwrap_or_default()
    }

    pub fn tuner_name(&self) -> &'static str {
        self.tuner().name()
    }

    /// Supported gain steps in tenths of a dB, empty until initialized
    pub fn gain_list(&self) -> &[i32] {
        self.capabilities
            .get()
            .map(|caps| caps.gains.as_slice())
            .unwrap_or(&[])
    }

    pub fn sample_rates(&self) -> &'static [u32] {
        &SAMPLE_RATES
    }

    pub fn min_frequency(&self) -> u32 {
        MIN_FREQUENCY
    }

    pub fn max_frequency(&self) -> u32 {
        MAX_FREQUENCY
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    // ------------------------------------------------------------------
    // State flags
    // ------------------------------------------------------------------

    pub fn is_open(&self) -> bool {
        self.control().handle.is_some()
    }

    pub fn is_configured(&self) -> bool {
        self.capabilities.get().is_some()
    }

    pub fn is_streaming(&self) -> bool {
        self.control()
            .worker
            .as_ref()
            .is_some_and(AsyncReadWorker::is_running)
    }

    // ------------------------------------------------------------------
    // Configuration
    //
    // Getters report the last requested value. Setters store it and, if the
    // device is open, push it to the driver before returning.
    // ------------------------------------------------------------------

    pub fn settings(&self) -> DeviceSettings {
        self.control().settings
    }

    pub fn sample_rate(&self) -> u32 {
        self.control().settings.sample_rate
    }

    pub fn set_sample_rate(&self, rate: u32) {
        let mut c = self.control();
        c.settings.sample_rate = rate;
        if let Some(handle) = c.handle {
            self.push_sample_rate(handle, rate);
        }
    }

    pub fn center_freq(&self) -> u32 {
        self.control().settings.center_freq
    }

    pub fn set_center_freq(&self, freq: u32) {
        let mut c = self.control();
        c.settings.center_freq = freq;
        if let Some(handle) = c.handle {
            self.push_center_freq(handle, freq);
        }
    }

    pub fn ppm_correction(&self) -> i32 {
        self.control().settings.ppm_correction
    }

    pub fn set_ppm_correction(&self, ppm: i32) {
        let mut c = self.control();
        c.settings.ppm_correction = ppm;
        if let Some(handle) = c.handle {
            self.push_ppm_correction(handle, ppm);
        }
    }

    pub fn auto_gain(&self) -> bool {
        self.control().settings.auto_gain
    }

    /// Switching to manual also pushes the stored gain value
    pub fn set_auto_gain(&self, auto: bool) {
        let mut c = self.control();
        c.settings.auto_gain = auto;
        if let Some(handle) = c.handle {
            self.push_gain_mode(handle, auto, c.settings.gain);
        }
    }

    /// Manual gain in tenths of a dB
    pub fn gain(&self) -> i32 {
        self.control().settings.gain
    }

    pub fn set_gain(&self, gain: i32) {
        let mut c = self.control();
        c.settings.gain = gain;
        if let Some(handle) = c.handle {
            self.push_gain(handle, gain);
        }
    }

    pub fn set_sink(&self, sink: Arc<dyn SampleSink>) {
        self.control().sink = Some(sink);
    }

    fn push_sample_rate(&self, handle: D::Handle, rate: u32) {
        self.check("set sample rate", self.driver.set_sample_rate(handle, rate));
    }

    fn push_center_freq(&self, handle: D::Handle, freq: u32) {
        self.check("set center frequency", self.driver.set_center_freq(handle, freq));
    }

    fn push_ppm_correction(&self, handle: D::Handle, ppm: i32) {
        self.check("set frequency correction", self.driver.set_freq_correction(handle, ppm));
    }

    fn push_gain_mode(&self, handle: D::Handle, auto: bool, gain: i32) {
        let mode = GainMode::from_auto(auto);
        self.check("set gain mode", self.driver.set_tuner_gain_mode(handle, mode));
        if mode == GainMode::Manual {
            self.push_gain(handle, gain);
        }
    }

    fn push_gain(&self, handle: D::Handle, gain: i32) {
        self.check("set tuner gain", self.driver.set_tuner_gain(handle, gain));
    }

    fn check(&self, what: &str, result: DriverResult<()>) {
        if let Err(e) = result {
            warn!("{}: failed to {}: {}", self.identity, what, e);
        }
    }

    /// Push every stored setting, in a fixed order
    fn reapply(&self, handle: D::Handle, settings: &DeviceSettings) {
        debug!("{}: re-applying {:?}", self.identity, settings);
        self.push_sample_rate(handle, settings.sample_rate);
        self.push_ppm_correction(handle, settings.ppm_correction);
        self.push_center_freq(handle, settings.center_freq);
        self.push_gain_mode(handle, settings.auto_gain, settings.gain);
    }

    // ------------------------------------------------------------------
    // Open / close / one-time initialization
    // ------------------------------------------------------------------

    fn open_locked(&self, c: &mut Control<D::Handle>) -> DeviceResult<D::Handle> {
        if let Some(handle) = c.handle {
            return Ok(handle);
        }

        // Indices shift as dongles come and go, so resolve on every open
        let index = self.driver.index_by_serial(self.serial());
        if index < 0 {
            return Err(DeviceError::NotFound {
                serial: self.serial().to_string(),
            });
        }

        let handle = self
            .driver
            .open(index as u32)
            .map_err(|source| DeviceError::Open {
                serial: self.serial().to_string(),
                source,
            })?;

        debug!("{}: opened at index {}", self.identity, index);
        c.handle = Some(handle);
        Ok(handle)
    }

    fn close_locked(&self, c: &mut Control<D::Handle>) {
        if let Some(handle) = c.handle.take() {
            self.driver.close(handle);
            debug!("{}: closed", self.identity);
        }
    }

    /// Query gain list and tuner once; later calls are no-ops
    pub fn initialize(&self) -> DeviceResult<()> {
        let mut c = self.control();
        self.initialize_locked(&mut c)
    }

    fn initialize_locked(&self, c: &mut Control<D::Handle>) -> DeviceResult<()> {
        if self.is_configured() {
            return Ok(());
        }

        let opened_here = c.handle.is_none();
        let handle = self.open_locked(c)?;

        let queried = self.driver.tuner_gains(handle).map(|gains| Capabilities {
            tuner: self.driver.tuner_type(handle),
            gains,
        });

        // Discovery never leaves the device claimed
        if opened_here {
            self.close_locked(c);
        }

        let caps = queried?;
        info!(
            "{}: tuner {}, {} gain steps",
            self.identity,
            caps.tuner,
            caps.gains.len()
        );
        // Only written here, under the control mutex
        if self.capabilities.set(caps).is_err() {
            debug!("{}: capabilities already recorded", self.identity);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------

    /// Open the device, re-apply settings and start the async read worker.
    ///
    /// Returns once the worker is dispatched. Calling this while already
    /// streaming does nothing.
    pub fn start_stream(&self) -> DeviceResult<()> {
        let mut c = self.control();

        if c.worker.as_ref().is_some_and(AsyncReadWorker::is_running) {
            debug!("{}: already streaming", self.identity);
            return Ok(());
        }
        // A previous read that ended on its own or was cancelled from its callback
        if let Some(worker) = c.worker.take() {
            worker.finish();
            *self.reader() = None;
        }

        let sink = c
            .sink
            .clone()
            .ok_or_else(|| DeviceError::NoSink(self.name().to_string()))?;

        self.initialize_locked(&mut c)?;
        let handle = self.open_locked(&mut c)?;

        let settings = c.settings;
        self.reapply(handle, &settings);
        self.check("reset buffer", self.driver.reset_buffer(handle));

        let target = StreamTarget {
            identity: self.identity.clone(),
            sink,
            stats: self.stats.clone(),
        };
        let params = ReadParams {
            buf_num: ASYNC_BUF_NUM,
            buf_len: ASYNC_BUF_LEN,
        };

        // Held across the spawn so a callback stop always finds the reader
        let mut reader = self.reader();
        match AsyncReadWorker::spawn(self.driver.clone(), handle, target, params) {
            Ok(worker) => {
                *reader = Some((worker.canceller(), handle));
                c.worker = Some(worker);
                info!(
                    "{}: streaming at {} Hz, {} S/s",
                    self.identity, settings.center_freq, settings.sample_rate
                );
                Ok(())
            }
            Err(e) => {
                self.close_locked(&mut c);
                Err(e.into())
            }
        }
    }

    /// Cancel the async read and close the device. No-op while closed.
    ///
    /// From inside a sample callback this only cancels the read.
    pub fn stop_stream(&self) {
        if self.cancel_from_read_thread() {
            return;
        }

        let mut c = self.control();

        let Some(handle) = c.handle else {
            return;
        };

        if let Some(worker) = c.worker.take() {
            self.cancel_read(handle, &worker);
            worker.finish();
            *self.reader() = None;
        }

        self.close_locked(&mut c);
        info!("{}: stream stopped", self.identity);
    }

    /// Cancel until the driver accepts it or the read is gone.
    ///
    /// The driver rejects a cancel until its read is actually running, which
    /// can lag behind `start_stream` returning.
    fn cancel_read(&self, handle: D::Handle, worker: &AsyncReadWorker) {
        worker.request_cancel();
        let mut attempts = 0u32;
        while worker.is_running() {
            match self.driver.cancel_async(handle) {
                Ok(()) => return,
                Err(e) => {
                    attempts += 1;
                    if attempts == 1 {
                        debug!("{}: cancel not accepted yet: {}", self.identity, e);
                    }
                    thread::sleep(CANCEL_RETRY);
                }
            }
        }
    }

    /// Stop requested by a sink on the read thread. Closing here would wait
    /// on the very callback that is running, so only the read is cancelled.
    fn cancel_from_read_thread(&self) -> bool {
        let reader = self.reader();
        let Some((canceller, handle)) = reader.as_ref() else {
            return false;
        };
        if !canceller.is_read_thread() {
            return false;
        }

        canceller.request_cancel();
        self.check("cancel async read", self.driver.cancel_async(*handle));
        info!("{}: stream cancelled from its sample callback", self.identity);
        true
    }

    pub fn status(&self) -> DeviceStatus {
        let c = self.control();
        DeviceStatus {
            name: self.name().to_string(),
            serial: self.serial().to_string(),
            tuner: self.tuner_name(),
            open: c.handle.is_some(),
            configured: self.is_configured(),
            streaming: c.worker.as_ref().is_some_and(AsyncReadWorker::is_running),
            settings: c.settings,
            buffers_delivered: self.stats.buffers(),
            bytes_delivered: self.stats.bytes(),
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }
}

impl<D: Driver> Drop for RtlSdrDevice<D> {
    fn drop(&mut self) {
        self.stop_stream();
        debug!("RTL-SDR: dropping <{}>", self.identity);
    }
}
