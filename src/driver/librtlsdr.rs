//! librtlsdr FFI bindings (requires the `librtlsdr` feature)
//!
//! Raw declarations for the subset of `rtl-sdr.h` this crate drives, wrapped
//! in the safe `LibRtlSdr` driver. The async read callback receives only a
//! `StreamToken` packed into the context pointer; it is never dereferenced.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int, c_uchar, c_void, CString};
use std::ptr::{self, NonNull};

use super::{Driver, GainMode, TunerType};
use crate::error::{DriverError, DriverResult};
use crate::stream::StreamToken;

#[repr(C)]
pub struct rtlsdr_dev {
    _private: [u8; 0],
}

pub type rtlsdr_read_async_cb_t =
    Option<unsafe extern "C" fn(buf: *mut c_uchar, len: u32, ctx: *mut c_void)>;

#[link(name = "rtlsdr")]
extern "C" {
    fn rtlsdr_get_index_by_serial(serial: *const c_char) -> c_int;
    fn rtlsdr_open(dev: *mut *mut rtlsdr_dev, index: u32) -> c_int;
    fn rtlsdr_close(dev: *mut rtlsdr_dev) -> c_int;

    fn rtlsdr_set_sample_rate(dev: *mut rtlsdr_dev, rate: u32) -> c_int;
    fn rtlsdr_get_sample_rate(dev: *mut rtlsdr_dev) -> u32;
    fn rtlsdr_set_center_freq(dev: *mut rtlsdr_dev, freq: u32) -> c_int;
    fn rtlsdr_get_center_freq(dev: *mut rtlsdr_dev) -> u32;
    fn rtlsdr_set_freq_correction(dev: *mut rtlsdr_dev, ppm: c_int) -> c_int;
    fn rtlsdr_get_freq_correction(dev: *mut rtlsdr_dev) -> c_int;

    fn rtlsdr_get_tuner_type(dev: *mut rtlsdr_dev) -> c_int;
    fn rtlsdr_get_tuner_gains(dev: *mut rtlsdr_dev, gains: *mut c_int) -> c_int;
    fn rtlsdr_set_tuner_gain_mode(dev: *mut rtlsdr_dev, manual: c_int) -> c_int;
    fn rtlsdr_set_tuner_gain(dev: *mut rtlsdr_dev, gain: c_int) -> c_int;
    fn rtlsdr_get_tuner_gain(dev: *mut rtlsdr_dev) -> c_int;

    fn rtlsdr_reset_buffer(dev: *mut rtlsdr_dev) -> c_int;
    fn rtlsdr_read_async(
        dev: *mut rtlsdr_dev,
        cb: rtlsdr_read_async_cb_t,
        ctx: *mut c_void,
        buf_num: u32,
        buf_len: u32,
    ) -> c_int;
    fn rtlsdr_cancel_async(dev: *mut rtlsdr_dev) -> c_int;
}

/// Open librtlsdr session
///
/// Only constructed from a successful `rtlsdr_open` and never used after the
/// owning device closes it, so the pointer is valid wherever a `RawDevice`
/// reaches the C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDevice(NonNull<rtlsdr_dev>);

// librtlsdr serializes access internally; read_async and cancel_async are
// meant to be called from different threads.
unsafe impl Send for RawDevice {}
unsafe impl Sync for RawDevice {}

impl RawDevice {
    fn ptr(self) -> *mut rtlsdr_dev {
        self.0.as_ptr()
    }
}

fn check(op: &'static str, code: c_int) -> DriverResult<()> {
    if code < 0 {
        Err(DriverError::call(op, code))
    } else {
        Ok(())
    }
}

unsafe extern "C" fn on_buffer(buf: *mut c_uchar, len: u32, ctx: *mut c_void) {
    if buf.is_null() {
        return;
    }
    let token = StreamToken::from_raw(ctx as usize as u64);
    // SAFETY: librtlsdr hands us `len` valid bytes for the duration of the call
    let bytes = unsafe { std::slice::from_raw_parts(buf, len as usize) };
    token.dispatch(bytes);
}

/// Driver backed by the system librtlsdr
#[derive(Debug, Default)]
pub struct LibRtlSdr;

impl LibRtlSdr {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for LibRtlSdr {
    type Handle = RawDevice;

    fn index_by_serial(&self, serial: &str) -> i32 {
        match CString::new(serial) {
            // SAFETY: `c_serial` is a valid NUL-terminated string
            Ok(c_serial) => unsafe { rtlsdr_get_index_by_serial(c_serial.as_ptr()) },
            Err(_) => -1,
        }
    }

    fn open(&self, index: u32) -> DriverResult<RawDevice> {
        let mut dev: *mut rtlsdr_dev = ptr::null_mut();
        // SAFETY: `dev` is a valid out pointer
        check("rtlsdr_open", unsafe { rtlsdr_open(&mut dev, index) })?;
        NonNull::new(dev)
            .map(RawDevice)
            .ok_or(DriverError::NoDevice(index))
    }

    fn close(&self, handle: RawDevice) {
        // SAFETY: handle came from rtlsdr_open and is closed exactly once
        unsafe {
            rtlsdr_close(handle.ptr());
        }
    }

    fn set_sample_rate(&self, handle: RawDevice, rate: u32) -> DriverResult<()> {
        // SAFETY: `handle` is a live session, see `RawDevice`
        check("rtlsdr_set_sample_rate", unsafe {
            rtlsdr_set_sample_rate(handle.ptr(), rate)
        })
    }

    fn sample_rate(&self, handle: RawDevice) -> DriverResult<u32> {
        // SAFETY: `handle` is a live session, see `RawDevice`
        match unsafe { rtlsdr_get_sample_rate(handle.ptr()) } {
            0 => Err(DriverError::call("rtlsdr_get_sample_rate", 0)),
            rate => Ok(rate),
        }
    }

    fn set_center_freq(&self, handle: RawDevice, freq: u32) -> DriverResult<()> {
        // SAFETY: `handle` is a live session, see `RawDevice`
        check("rtlsdr_set_center_freq", unsafe {
            rtlsdr_set_center_freq(handle.ptr(), freq)
        })
    }

    fn center_freq(&self, handle: RawDevice) -> DriverResult<u32> {
        // SAFETY: `handle` is a live session, see `RawDevice`
        match unsafe { rtlsdr_get_center_freq(handle.ptr()) } {
            0 => Err(DriverError::call("rtlsdr_get_center_freq", 0)),
            freq => Ok(freq),
        }
    }

    fn set_freq_correction(&self, handle: RawDevice, ppm: i32) -> DriverResult<()> {
        // SAFETY: `handle` is a live session, see `RawDevice`
        match unsafe { rtlsdr_set_freq_correction(handle.ptr(), ppm) } {
            // -2 means the value is already set
            -2 => Ok(()),
            code => check("rtlsdr_set_freq_correction", code),
        }
    }

    fn freq_correction(&self, handle: RawDevice) -> DriverResult<i32> {
        // SAFETY: `handle` is a live session, see `RawDevice`
        Ok(unsafe { rtlsdr_get_freq_correction(handle.ptr()) })
    }

    fn set_tuner_gain_mode(&self, handle: RawDevice, mode: GainMode) -> DriverResult<()> {
        // SAFETY: `handle` is a live session, see `RawDevice`
        check("rtlsdr_set_tuner_gain_mode", unsafe {
            rtlsdr_set_tuner_gain_mode(handle.ptr(), mode.as_raw())
        })
    }

    fn set_tuner_gain(&self, handle: RawDevice, gain: i32) -> DriverResult<()> {
        // SAFETY: `handle` is a live session, see `RawDevice`
        check("rtlsdr_set_tuner_gain", unsafe {
            rtlsdr_set_tuner_gain(handle.ptr(), gain)
        })
    }

    fn tuner_gain(&self, handle: RawDevice) -> DriverResult<i32> {
        // SAFETY: `handle` is a live session, see `RawDevice`
        Ok(unsafe { rtlsdr_get_tuner_gain(handle.ptr()) })
    }

    fn tuner_gains(&self, handle: RawDevice) -> DriverResult<Vec<i32>> {
        // First call with NULL returns the count
        // SAFETY: `handle` is a live session; NULL asks for the count only
        let count = unsafe { rtlsdr_get_tuner_gains(handle.ptr(), ptr::null_mut()) };
        if count <= 0 {
            return Err(DriverError::call("rtlsdr_get_tuner_gains", count));
        }

        let mut gains = vec![0 as c_int; count as usize];
        // SAFETY: `gains` has room for the `count` entries the driver writes
        let filled = unsafe { rtlsdr_get_tuner_gains(handle.ptr(), gains.as_mut_ptr()) };
        check("rtlsdr_get_tuner_gains", filled)?;
        gains.truncate(filled as usize);
        Ok(gains)
    }

    fn tuner_type(&self, handle: RawDevice) -> TunerType {
        // SAFETY: `handle` is a live session, see `RawDevice`
        TunerType::from(unsafe { rtlsdr_get_tuner_type(handle.ptr()) })
    }

    fn reset_buffer(&self, handle: RawDevice) -> DriverResult<()> {
        // SAFETY: `handle` is a live session, see `RawDevice`
        check("rtlsdr_reset_buffer", unsafe {
            rtlsdr_reset_buffer(handle.ptr())
        })
    }

    fn read_async(
        &self,
        handle: RawDevice,
        stream: StreamToken,
        buf_num: u32,
        buf_len: u32,
    ) -> DriverResult<()> {
        let ctx = stream.as_raw() as usize as *mut c_void;
        // SAFETY: `handle` is a live session; `ctx` is a token the callback
        // only decodes, never dereferences
        check("rtlsdr_read_async", unsafe {
            rtlsdr_read_async(handle.ptr(), Some(on_buffer), ctx, buf_num, buf_len)
        })
    }

    fn cancel_async(&self, handle: RawDevice) -> DriverResult<()> {
        // SAFETY: `handle` is a live session, see `RawDevice`
        check("rtlsdr_cancel_async", unsafe {
            rtlsdr_cancel_async(handle.ptr())
        })
    }
}
