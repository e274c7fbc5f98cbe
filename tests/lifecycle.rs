//! End-to-end lifecycle tests against the simulated driver

use std::sync::{Arc, Barrier, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use rtlsdr_lifecycle::device::{
    try_adopt, DeviceIdentity, DeviceSettings, DiscoveryGate, DiscoveryPolicy, RtlSdrDevice,
    UsbDescriptor,
};
use rtlsdr_lifecycle::driver::{DriverCall, GainMode, MockDriver, ReadOutcome};
use rtlsdr_lifecycle::error::DeviceError;
use rtlsdr_lifecycle::stream::{SampleSink, StreamEnd};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Forwards everything it receives to test-side channels
struct Recorder {
    buffers: Sender<Vec<u8>>,
    ends: Sender<StreamEnd>,
}

impl Recorder {
    fn new() -> (Arc<Self>, Receiver<Vec<u8>>, Receiver<StreamEnd>) {
        let (buffers, buffers_rx) = unbounded();
        let (ends, ends_rx) = unbounded();
        (Arc::new(Self { buffers, ends }), buffers_rx, ends_rx)
    }
}

impl SampleSink for Recorder {
    fn on_samples(&self, _device: &DeviceIdentity, samples: Vec<u8>) {
        let _ = self.buffers.send(samples);
    }

    fn on_stream_end(&self, _device: &DeviceIdentity, end: &StreamEnd) {
        let _ = self.ends.send(end.clone());
    }
}

/// Stops its own device from inside the first sample callback
struct StopOnFirstBuffer {
    device: OnceLock<Weak<RtlSdrDevice<MockDriver>>>,
    ends: Sender<StreamEnd>,
}

impl SampleSink for StopOnFirstBuffer {
    fn on_samples(&self, _device: &DeviceIdentity, _samples: Vec<u8>) {
        if let Some(device) = self.device.get().and_then(Weak::upgrade) {
            device.stop_stream();
        }
    }

    fn on_stream_end(&self, _device: &DeviceIdentity, end: &StreamEnd) {
        let _ = self.ends.send(end.clone());
    }
}

fn rtl(serial: &str) -> UsbDescriptor {
    UsbDescriptor::new(0x0bda, 0x2838, "Realtek", "RTL2838UHIDIR", serial)
}

fn fast() -> DiscoveryPolicy {
    DiscoveryPolicy {
        max_attempts: 5,
        retry_delay: Duration::from_millis(1),
    }
}

fn adopt(driver: &Arc<MockDriver>, settings: DeviceSettings) -> RtlSdrDevice<MockDriver> {
    driver.attach("00000001");
    try_adopt(driver, &rtl("00000001"), &fast(), settings).expect("device should be adopted")
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn test_discovery_on_second_attempt() {
    let driver = Arc::new(MockDriver::new());
    driver.attach_delayed("00000001", 1);

    let device = try_adopt(
        &driver,
        &rtl("00000001"),
        &DiscoveryPolicy::default(),
        DeviceSettings::default(),
    )
    .expect("device should be adopted");

    assert_eq!(device.name(), "Realtek RTL2838UHIDIR SN: 00000001");
    assert!(device.is_configured());
    assert!(!device.is_open());
    assert_eq!(device.tuner_name(), "Rafael Micro R820T");
    assert_eq!(device.gain_list().len(), 29);
    assert_eq!(device.sample_rates(), &[960_000, 2_400_000]);
    assert_eq!(device.min_frequency(), 24_000_000);
    assert_eq!(device.max_frequency(), 1_766_000_000);
    assert_eq!(driver.open_sessions(), 0);
}

#[test]
fn test_unrecognized_device_is_ignored() {
    let driver = Arc::new(MockDriver::new());
    driver.attach("00000001");
    let mouse = UsbDescriptor::new(0x046d, 0xc077, "Logitech", "USB Optical Mouse", "00000001");

    assert!(try_adopt(&driver, &mouse, &fast(), DeviceSettings::default()).is_none());
    assert!(driver.calls().is_empty());
}

#[test]
fn test_start_reapplies_settings_in_order() {
    let driver = Arc::new(MockDriver::new());
    let settings = DeviceSettings {
        gain: 30,
        ..DeviceSettings::default()
    };
    let device = adopt(&driver, settings);
    let (sink, _buffers, _ends) = Recorder::new();
    device.set_sink(sink);
    driver.clear_calls();

    device.start_stream().unwrap();
    assert!(driver.wait_for_call(&DriverCall::ReadAsync, TIMEOUT));

    assert_eq!(
        driver.calls(),
        vec![
            DriverCall::IndexBySerial("00000001".into()),
            DriverCall::Open(0),
            DriverCall::SetSampleRate(2_400_000),
            DriverCall::SetFreqCorrection(0),
            DriverCall::SetCenterFreq(100_000_000),
            DriverCall::SetTunerGainMode(GainMode::Manual),
            DriverCall::SetTunerGain(30),
            DriverCall::ResetBuffer,
            DriverCall::ReadAsync,
        ]
    );
    assert!(device.is_open());
    assert!(device.is_streaming());

    driver.clear_calls();
    device.stop_stream();
    assert_eq!(driver.calls(), vec![DriverCall::CancelAsync, DriverCall::Close]);
    assert!(!device.is_open());
    assert!(!device.is_streaming());
}

#[test]
fn test_auto_gain_skips_manual_gain() {
    let driver = Arc::new(MockDriver::new());
    let settings = DeviceSettings {
        auto_gain: true,
        gain: 300,
        ..DeviceSettings::default()
    };
    let device = adopt(&driver, settings);
    let (sink, _buffers, _ends) = Recorder::new();
    device.set_sink(sink);

    device.start_stream().unwrap();
    assert!(driver.wait_for_call(&DriverCall::ReadAsync, TIMEOUT));

    assert_eq!(driver.count(|c| *c == DriverCall::SetTunerGainMode(GainMode::Auto)), 1);
    assert_eq!(driver.count(|c| matches!(c, DriverCall::SetTunerGain(_))), 0);
    device.stop_stream();
}

#[test]
fn test_start_is_idempotent() {
    let driver = Arc::new(MockDriver::new());
    let device = adopt(&driver, DeviceSettings::default());
    let (sink, _buffers, _ends) = Recorder::new();
    device.set_sink(sink);

    device.start_stream().unwrap();
    assert!(driver.wait_for_call(&DriverCall::ReadAsync, TIMEOUT));
    device.start_stream().unwrap();

    assert_eq!(driver.count(|c| matches!(c, DriverCall::Open(_))), 2);
    assert_eq!(driver.count(|c| *c == DriverCall::ReadAsync), 1);
    assert_eq!(driver.open_sessions(), 1);
    device.stop_stream();
}

#[test]
fn test_stop_while_closed_is_noop() {
    let driver = Arc::new(MockDriver::new());
    let device = adopt(&driver, DeviceSettings::default());
    driver.clear_calls();

    device.stop_stream();
    device.stop_stream();

    assert!(driver.calls().is_empty());
    assert!(!device.is_open());
}

#[test]
fn test_failed_open_leaves_device_closed() {
    let driver = Arc::new(MockDriver::new());
    let device = adopt(&driver, DeviceSettings::default());
    let (sink, _buffers, _ends) = Recorder::new();
    device.set_sink(sink);

    driver.fail_open(true);
    assert!(matches!(device.start_stream(), Err(DeviceError::Open { .. })));
    assert!(!device.is_open());
    assert!(!device.is_streaming());

    driver.fail_open(false);
    device.start_stream().unwrap();
    assert!(device.is_open());
    device.stop_stream();
}

#[test]
fn test_detached_dongle_is_not_found() {
    let driver = Arc::new(MockDriver::new());
    let device = adopt(&driver, DeviceSettings::default());
    let (sink, _buffers, _ends) = Recorder::new();
    device.set_sink(sink);

    driver.detach("00000001");
    assert!(matches!(device.start_stream(), Err(DeviceError::NotFound { .. })));
    assert!(!device.is_open());
}

#[test]
fn test_configured_once() {
    let driver = Arc::new(MockDriver::new());
    let device = adopt(&driver, DeviceSettings::default());
    let (sink, _buffers, _ends) = Recorder::new();
    device.set_sink(sink);
    assert!(device.is_configured());

    for _ in 0..3 {
        device.start_stream().unwrap();
        assert!(device.is_configured());
        device.stop_stream();
        assert!(device.is_configured());
    }

    assert_eq!(driver.count(|c| *c == DriverCall::TunerGains), 1);
    assert_eq!(driver.count(|c| *c == DriverCall::TunerType), 1);
}

#[test]
fn test_settings_survive_reopen() {
    let driver = Arc::new(MockDriver::new());
    let device = adopt(&driver, DeviceSettings::default());
    let (sink, _buffers, _ends) = Recorder::new();
    device.set_sink(sink);

    device.start_stream().unwrap();
    device.set_center_freq(433_920_000);
    device.set_ppm_correction(7);
    device.stop_stream();
    assert_eq!(driver.open_sessions(), 0);

    driver.clear_calls();
    device.start_stream().unwrap();

    assert_eq!(device.center_freq(), 433_920_000);
    let programmed = driver.programmed().unwrap();
    assert_eq!(programmed.center_freq, 433_920_000);
    assert_eq!(programmed.ppm, 7);
    assert_eq!(programmed.sample_rate, 2_400_000);
    assert!(driver.calls().contains(&DriverCall::SetCenterFreq(433_920_000)));
    device.stop_stream();
}

#[test]
fn test_buffers_arrive_in_order() {
    let script = vec![vec![1u8; 16], vec![2u8; 16], vec![3u8; 8]];
    let driver = Arc::new(MockDriver::new().with_script(script.clone()));
    let device = adopt(&driver, DeviceSettings::default());
    let (sink, buffers, ends) = Recorder::new();
    device.set_sink(sink);

    device.start_stream().unwrap();
    let received: Vec<Vec<u8>> = (0..script.len())
        .map(|_| buffers.recv_timeout(TIMEOUT).unwrap())
        .collect();
    assert_eq!(received, script);
    assert_eq!(device.stats().buffers(), 3);
    assert_eq!(device.stats().bytes(), 40);
    assert!(device.stats().first_buffer_ms().is_some());

    device.stop_stream();
    assert_eq!(ends.recv_timeout(TIMEOUT).unwrap(), StreamEnd::Cancelled);
    assert!(buffers.try_recv().is_err());
}

#[test]
fn test_driver_return_is_unexpected_end() {
    let driver = Arc::new(MockDriver::new().with_read_outcome(ReadOutcome::Return));
    let device = adopt(&driver, DeviceSettings::default());
    let (sink, _buffers, ends) = Recorder::new();
    device.set_sink(sink);

    device.start_stream().unwrap();
    let end = ends.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(end, StreamEnd::Ended);
    assert!(end.is_unexpected());
    assert!(wait_until(|| !device.is_streaming()));

    // still open until stopped
    assert!(device.is_open());
    driver.clear_calls();
    device.stop_stream();
    assert_eq!(driver.calls(), vec![DriverCall::Close]);
}

#[test]
fn test_driver_error_is_reported() {
    let driver = Arc::new(MockDriver::new().with_read_outcome(ReadOutcome::Fail(-5)));
    let device = adopt(&driver, DeviceSettings::default());
    let (sink, _buffers, ends) = Recorder::new();
    device.set_sink(sink);

    device.start_stream().unwrap();
    let end = ends.recv_timeout(TIMEOUT).unwrap();
    assert!(matches!(end, StreamEnd::Failed(_)));
    assert!(end.is_unexpected());
    assert!(wait_until(|| !device.is_streaming()));

    // a new start reaps the dead worker and reads again
    device.start_stream().unwrap();
    assert!(wait_until(|| driver.count(|c| *c == DriverCall::ReadAsync) == 2));
    device.stop_stream();
    assert!(!device.is_open());
}

#[test]
fn test_concurrent_adoptions_do_not_interleave() {
    let driver = Arc::new(MockDriver::new());
    driver.attach_delayed("AAAA", 2);
    driver.attach_delayed("BBBB", 2);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["AAAA", "BBBB"]
        .into_iter()
        .map(|serial| {
            let driver = driver.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                DiscoveryGate::global()
                    .try_adopt(&driver, &rtl(serial), &fast(), DeviceSettings::default())
                    .is_some()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }

    // Each adoption is one contiguous block ending in the close after
    // initialization
    let calls = driver.calls();
    let blocks: Vec<&[DriverCall]> = calls
        .split_inclusive(|c| *c == DriverCall::Close)
        .collect();
    assert_eq!(blocks.len(), 2);

    let mut serials = Vec::new();
    for block in blocks {
        let lookups: Vec<&str> = block
            .iter()
            .filter_map(|c| match c {
                DriverCall::IndexBySerial(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        let serial = lookups[0];
        assert!(lookups.iter().all(|s| *s == serial), "interleaved: {:?}", block);

        let expected_index = if serial == "AAAA" { 0 } else { 1 };
        assert!(block.contains(&DriverCall::Open(expected_index)));
        assert_eq!(block.last(), Some(&DriverCall::Close));
        serials.push(serial.to_string());
    }

    serials.sort();
    assert_eq!(serials, vec!["AAAA", "BBBB"]);
}

#[test]
fn test_stop_right_after_start_with_slow_read() {
    // the read needs a while before the driver accepts a cancel
    let driver = Arc::new(MockDriver::new().with_read_delay(Duration::from_millis(50)));
    let device = Arc::new(adopt(&driver, DeviceSettings::default()));
    let (sink, _buffers, ends) = Recorder::new();
    device.set_sink(sink);

    let (done_tx, done_rx) = unbounded();
    let control = device.clone();
    thread::spawn(move || {
        control.start_stream().unwrap();
        control.stop_stream();
        let _ = done_tx.send(());
    });

    assert!(done_rx.recv_timeout(TIMEOUT).is_ok(), "stop_stream did not return");
    assert_eq!(ends.recv_timeout(TIMEOUT).unwrap(), StreamEnd::Cancelled);
    assert!(!device.is_open());
    assert!(!device.is_streaming());
    assert_eq!(driver.open_sessions(), 0);
    assert!(driver.count(|c| *c == DriverCall::CancelAsync) >= 1);
}

#[test]
fn test_stop_from_sample_callback() {
    let driver = Arc::new(MockDriver::new().with_script(vec![vec![1u8; 8], vec![2u8; 8]]));
    let device = Arc::new(adopt(&driver, DeviceSettings::default()));
    let (ends_tx, ends) = unbounded();
    let sink = Arc::new(StopOnFirstBuffer {
        device: OnceLock::new(),
        ends: ends_tx,
    });
    let _ = sink.device.set(Arc::downgrade(&device));
    device.set_sink(sink);

    device.start_stream().unwrap();
    assert_eq!(ends.recv_timeout(TIMEOUT).unwrap(), StreamEnd::Cancelled);
    assert!(wait_until(|| !device.is_streaming()));

    // the callback only cancelled; closing is left to the control side
    assert!(device.is_open());
    assert_eq!(driver.open_sessions(), 1);

    driver.clear_calls();
    device.stop_stream();
    assert_eq!(driver.calls(), vec![DriverCall::Close]);
    assert!(!device.is_open());

    // and the device streams again afterwards
    device.start_stream().unwrap();
    assert_eq!(ends.recv_timeout(TIMEOUT).unwrap(), StreamEnd::Cancelled);
    device.stop_stream();
    assert!(!device.is_open());
}
