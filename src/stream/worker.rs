//! Dedicated async-read worker thread
//!
//! `read_async` blocks for as long as the device streams, so it gets a named
//! OS thread of its own. The thread lives from start-stream until the driver
//! observes the cancel issued by stop-stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{debug, error, info, warn};

use super::registry::{self, Registration, StreamTarget};
use super::StreamEnd;
use crate::driver::Driver;

/// Buffer layout requested from the driver
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadParams {
    pub buf_num: u32,
    pub buf_len: u32,
}

/// Cancel side of a running worker, usable without owning it
#[derive(Debug, Clone)]
pub(crate) struct ReadCanceller {
    thread: ThreadId,
    cancel_requested: Arc<AtomicBool>,
}

impl ReadCanceller {
    /// True on the read thread itself, i.e. inside a sample callback
    pub fn is_read_thread(&self) -> bool {
        self.thread == thread::current().id()
    }

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct AsyncReadWorker {
    thread: JoinHandle<()>,
    cancel_requested: Arc<AtomicBool>,
    registration: Registration,
}

impl AsyncReadWorker {
    /// Register the stream and start the blocking read on a new thread.
    pub fn spawn<D: Driver>(
        driver: Arc<D>,
        handle: D::Handle,
        target: StreamTarget,
        params: ReadParams,
    ) -> std::io::Result<Self> {
        let identity = target.identity.clone();
        let sink = target.sink.clone();
        let registration = registry::register(target);
        let token = registration.token();
        let cancel_requested = Arc::new(AtomicBool::new(false));
        let cancelled = cancel_requested.clone();

        let thread = thread::Builder::new()
            .name(format!("rtlsdr-read-{}", identity.serial()))
            .spawn(move || {
                debug!("Async read started for {} (stream {})", identity, token.as_raw());

                let result = driver.read_async(handle, token, params.buf_num, params.buf_len);

                let end = match result {
                    Err(e) => StreamEnd::Failed(e),
                    Ok(()) if cancelled.load(Ordering::SeqCst) => StreamEnd::Cancelled,
                    Ok(()) => StreamEnd::Ended,
                };

                match &end {
                    StreamEnd::Cancelled => info!("Async read for {} cancelled", identity),
                    StreamEnd::Ended => warn!("Async read for {} returned unexpectedly", identity),
                    StreamEnd::Failed(e) => error!("Async read for {} failed: {}", identity, e),
                }

                sink.on_stream_end(&identity, &end);
            })?;

        Ok(Self {
            thread,
            cancel_requested,
            registration,
        })
    }

    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    pub fn canceller(&self) -> ReadCanceller {
        ReadCanceller {
            thread: self.thread.thread().id(),
            cancel_requested: self.cancel_requested.clone(),
        }
    }

    /// Mark the coming return of `read_async` as requested
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Unregister the stream, then wait for the read thread to exit.
    ///
    /// Once unregistered, late buffers from the driver are discarded; only a
    /// dispatch already in progress can still reach the sink. Must not be
    /// called from the read thread.
    pub fn finish(self) {
        let Self {
            thread,
            registration,
            ..
        } = self;

        let token = registration.token();
        drop(registration);

        if thread.join().is_err() {
            error!("Async read thread for stream {} panicked", token.as_raw());
        }
    }
}
