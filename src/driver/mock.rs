//! Simulated RTL-SDR driver
//!
//! Behaves like librtlsdr from the caller's point of view: devices get
//! indices in attach order, a freshly attached dongle can stay invisible for
//! a few lookups, a device can only be opened once, and `read_async` blocks
//! until cancelled or closed. As with librtlsdr, a cancel is only accepted
//! while a read is actually running. Every call is recorded so tests can assert on
//! exact command sequences.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use super::{Driver, GainMode, TunerType};
use crate::error::{DriverError, DriverResult};
use crate::stream::StreamToken;

/// Gain steps reported by an R820T, in tenths of a dB
pub const R820T_GAINS: [i32; 29] = [
    0, 9, 14, 27, 37, 77, 87, 125, 144, 157, 166, 197, 207, 229, 254, 280, 297, 328, 338, 364,
    372, 386, 402, 421, 434, 439, 445, 480, 496,
];

const LIBUSB_ERROR_BUSY: i32 = -6;

/// librtlsdr's answer to a cancel while no async read is running
const ASYNC_NOT_RUNNING: i32 = -2;

/// One recorded driver call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    IndexBySerial(String),
    Open(u32),
    Close,
    SetSampleRate(u32),
    GetSampleRate,
    SetCenterFreq(u32),
    GetCenterFreq,
    SetFreqCorrection(i32),
    GetFreqCorrection,
    SetTunerGainMode(GainMode),
    SetTunerGain(i32),
    GetTunerGain,
    TunerGains,
    TunerType,
    ResetBuffer,
    ReadAsync,
    CancelAsync,
}

/// How `read_async` returns once its scripted buffers are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Block until cancelled or closed
    WaitForCancel,
    /// Return immediately with this error code
    Fail(i32),
    /// Return immediately without error
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockHandle(u32);

/// Values currently held by a simulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Programmed {
    pub sample_rate: u32,
    pub center_freq: u32,
    pub ppm: i32,
    pub gain_mode: Option<GainMode>,
    pub gain: i32,
}

#[derive(Debug)]
struct AttachedDevice {
    serial: String,
    /// Lookups that still answer "not found"
    hidden_lookups: u32,
}

#[derive(Debug, Default)]
struct Session {
    index: u32,
    sample_rate: u32,
    center_freq: u32,
    ppm: i32,
    gain_mode: Option<GainMode>,
    gain: i32,
    /// Inside `read_async`, past its start-up delay
    reading: bool,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<DriverCall>,
    attached: Vec<AttachedDevice>,
    sessions: HashMap<u32, Session>,
    next_handle: u32,
    fail_open: bool,
}

pub struct MockDriver {
    state: Mutex<MockState>,
    wake: Condvar,
    tuner: TunerType,
    gains: Vec<i32>,
    script: Vec<Vec<u8>>,
    synthetic: Option<(usize, Duration)>,
    outcome: ReadOutcome,
    read_delay: Duration,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// An R820T dongle driver with nothing attached
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            wake: Condvar::new(),
            tuner: TunerType::R820t,
            gains: R820T_GAINS.to_vec(),
            script: Vec::new(),
            synthetic: None,
            outcome: ReadOutcome::WaitForCancel,
            read_delay: Duration::ZERO,
        }
    }

    pub fn with_tuner(mut self, tuner: TunerType) -> Self {
        self.tuner = tuner;
        self
    }

    pub fn with_gains(mut self, gains: Vec<i32>) -> Self {
        self.gains = gains;
        self
    }

    /// Buffers delivered at the start of every `read_async`
    pub fn with_script(mut self, buffers: Vec<Vec<u8>>) -> Self {
        self.script = buffers;
        self
    }

    /// Deliver a generated buffer every `interval` until cancelled
    pub fn with_synthetic_stream(mut self, buf_len: usize, interval: Duration) -> Self {
        self.synthetic = Some((buf_len, interval));
        self
    }

    pub fn with_read_outcome(mut self, outcome: ReadOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Time `read_async` takes before the read is running and cancellable
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: DriverCall) -> MutexGuard<'_, MockState> {
        let mut st = self.lock();
        st.calls.push(call);
        self.wake.notify_all();
        st
    }

    /// Block until `call` has been recorded, up to `timeout`
    pub fn wait_for_call(&self, call: &DriverCall, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.lock();
        while !st.calls.contains(call) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            st = self
                .wake
                .wait_timeout(st, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Plug in a dongle, visible to the next lookup. Returns its index.
    pub fn attach(&self, serial: &str) -> u32 {
        self.attach_delayed(serial, 0)
    }

    /// Plug in a dongle that stays invisible for `hidden_lookups` lookups
    pub fn attach_delayed(&self, serial: &str, hidden_lookups: u32) -> u32 {
        let mut st = self.lock();
        st.attached.push(AttachedDevice {
            serial: serial.to_string(),
            hidden_lookups,
        });
        (st.attached.len() - 1) as u32
    }

    pub fn detach(&self, serial: &str) {
        self.lock().attached.retain(|d| d.serial != serial);
    }

    pub fn fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    pub fn gains(&self) -> Vec<i32> {
        self.gains.clone()
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn count(&self, pred: impl Fn(&DriverCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    /// What the first open session has been programmed with
    pub fn programmed(&self) -> Option<Programmed> {
        self.lock().sessions.values().next().map(|s| Programmed {
            sample_rate: s.sample_rate,
            center_freq: s.center_freq,
            ppm: s.ppm,
            gain_mode: s.gain_mode,
            gain: s.gain,
        })
    }

    fn with_session<T>(
        &self,
        call: DriverCall,
        op: &'static str,
        handle: MockHandle,
        f: impl FnOnce(&mut Session) -> T,
    ) -> DriverResult<T> {
        let mut st = self.record(call);
        st.sessions
            .get_mut(&handle.0)
            .map(f)
            .ok_or_else(|| DriverError::call(op, -1))
    }

    fn synthetic_buffer(len: usize, seq: u64) -> Vec<u8> {
        (0..len)
            .map(|i| 127u8.wrapping_add(((seq as usize + i) % 16) as u8))
            .collect()
    }
}

impl Driver for MockDriver {
    type Handle = MockHandle;

    fn index_by_serial(&self, serial: &str) -> i32 {
        let mut st = self.record(DriverCall::IndexBySerial(serial.to_string()));
        match st.attached.iter_mut().position(|d| d.serial == serial) {
            Some(index) => {
                let device = &mut st.attached[index];
                if device.hidden_lookups > 0 {
                    device.hidden_lookups -= 1;
                    -3
                } else {
                    index as i32
                }
            }
            None => -3,
        }
    }

    fn open(&self, index: u32) -> DriverResult<MockHandle> {
        let mut st = self.record(DriverCall::Open(index));
        if st.fail_open {
            return Err(DriverError::call("rtlsdr_open", -1));
        }
        if index as usize >= st.attached.len() {
            return Err(DriverError::NoDevice(index));
        }
        if st.sessions.values().any(|s| s.index == index) {
            return Err(DriverError::call("rtlsdr_open", LIBUSB_ERROR_BUSY));
        }

        st.next_handle += 1;
        let handle = st.next_handle;
        st.sessions.insert(
            handle,
            Session {
                index,
                ..Session::default()
            },
        );
        Ok(MockHandle(handle))
    }

    fn close(&self, handle: MockHandle) {
        let mut st = self.record(DriverCall::Close);
        st.sessions.remove(&handle.0);
        self.wake.notify_all();
    }

    fn set_sample_rate(&self, handle: MockHandle, rate: u32) -> DriverResult<()> {
        self.with_session(DriverCall::SetSampleRate(rate), "rtlsdr_set_sample_rate", handle, |s| {
            s.sample_rate = rate
        })
    }

    fn sample_rate(&self, handle: MockHandle) -> DriverResult<u32> {
        self.with_session(DriverCall::GetSampleRate, "rtlsdr_get_sample_rate", handle, |s| {
            s.sample_rate
        })
    }

    fn set_center_freq(&self, handle: MockHandle, freq: u32) -> DriverResult<()> {
        self.with_session(DriverCall::SetCenterFreq(freq), "rtlsdr_set_center_freq", handle, |s| {
            s.center_freq = freq
        })
    }

    fn center_freq(&self, handle: MockHandle) -> DriverResult<u32> {
        self.with_session(DriverCall::GetCenterFreq, "rtlsdr_get_center_freq", handle, |s| {
            s.center_freq
        })
    }

    fn set_freq_correction(&self, handle: MockHandle, ppm: i32) -> DriverResult<()> {
        self.with_session(
            DriverCall::SetFreqCorrection(ppm),
            "rtlsdr_set_freq_correction",
            handle,
            |s| s.ppm = ppm,
        )
    }

    fn freq_correction(&self, handle: MockHandle) -> DriverResult<i32> {
        self.with_session(DriverCall::GetFreqCorrection, "rtlsdr_get_freq_correction", handle, |s| {
            s.ppm
        })
    }

    fn set_tuner_gain_mode(&self, handle: MockHandle, mode: GainMode) -> DriverResult<()> {
        self.with_session(
            DriverCall::SetTunerGainMode(mode),
            "rtlsdr_set_tuner_gain_mode",
            handle,
            |s| s.gain_mode = Some(mode),
        )
    }

    fn set_tuner_gain(&self, handle: MockHandle, gain: i32) -> DriverResult<()> {
        self.with_session(DriverCall::SetTunerGain(gain), "rtlsdr_set_tuner_gain", handle, |s| {
            s.gain = gain
        })
    }

    fn tuner_gain(&self, handle: MockHandle) -> DriverResult<i32> {
        self.with_session(DriverCall::GetTunerGain, "rtlsdr_get_tuner_gain", handle, |s| s.gain)
    }

    fn tuner_gains(&self, handle: MockHandle) -> DriverResult<Vec<i32>> {
        let gains = self.gains.clone();
        self.with_session(DriverCall::TunerGains, "rtlsdr_get_tuner_gains", handle, |_| gains)
    }

    fn tuner_type(&self, handle: MockHandle) -> TunerType {
        let tuner = self.tuner;
        self.with_session(DriverCall::TunerType, "rtlsdr_get_tuner_type", handle, |_| tuner)
            .unwrap_or_default()
    }

    fn reset_buffer(&self, handle: MockHandle) -> DriverResult<()> {
        self.with_session(DriverCall::ResetBuffer, "rtlsdr_reset_buffer", handle, |_| ())
    }

    fn read_async(
        &self,
        handle: MockHandle,
        stream: StreamToken,
        _buf_num: u32,
        _buf_len: u32,
    ) -> DriverResult<()> {
        if !self.read_delay.is_zero() {
            thread::sleep(self.read_delay);
        }
        self.with_session(DriverCall::ReadAsync, "rtlsdr_read_async", handle, |s| {
            s.reading = true;
            s.cancelled = false;
        })?;

        let result = self.stream_until_done(handle, stream);

        if let Some(session) = self.lock().sessions.get_mut(&handle.0) {
            session.reading = false;
            session.cancelled = false;
        }
        result
    }

    fn cancel_async(&self, handle: MockHandle) -> DriverResult<()> {
        let mut st = self.record(DriverCall::CancelAsync);
        let session = st
            .sessions
            .get_mut(&handle.0)
            .ok_or_else(|| DriverError::call("rtlsdr_cancel_async", -1))?;
        if !session.reading {
            return Err(DriverError::call("rtlsdr_cancel_async", ASYNC_NOT_RUNNING));
        }
        session.cancelled = true;
        self.wake.notify_all();
        Ok(())
    }
}

impl MockDriver {
    /// Body of a running read: scripted buffers, then the configured outcome
    fn stream_until_done(&self, handle: MockHandle, stream: StreamToken) -> DriverResult<()> {
        for buf in &self.script {
            stream.dispatch(buf);
        }

        match self.outcome {
            ReadOutcome::Fail(code) => return Err(DriverError::call("rtlsdr_read_async", code)),
            ReadOutcome::Return => return Ok(()),
            ReadOutcome::WaitForCancel => {}
        }

        let mut seq = 0u64;
        let mut st = self.lock();
        loop {
            match st.sessions.get_mut(&handle.0) {
                None => return Ok(()),
                Some(session) if session.cancelled => {
                    session.cancelled = false;
                    debug!("Mock read on handle {} cancelled", handle.0);
                    return Ok(());
                }
                Some(_) => {}
            }

            match self.synthetic {
                Some((len, interval)) => {
                    let (guard, timeout) = self
                        .wake
                        .wait_timeout(st, interval)
                        .unwrap_or_else(PoisonError::into_inner);
                    st = guard;
                    if timeout.timed_out() {
                        drop(st);
                        stream.dispatch(&Self::synthetic_buffer(len, seq));
                        seq += 1;
                        st = self.lock();
                    }
                }
                None => {
                    st = self.wake.wait(st).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

}
