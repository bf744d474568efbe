// SPDX-License-Identifier: MPL-2.0

//! Codec-independent encoder session handling
//!
//! [`EncoderCore`] drives one backend through the [`EncoderState`] machine,
//! owns the input slot pool and presentation clock of the current session,
//! and defers backend release after `stop()`.

use super::state::{EncoderState, StateCell};
use crate::constants::{threads, timing};
use crate::errors::EncoderError;
use crate::media::buffer_pool::BufferIndexPool;
use crate::media::codec::{
    BackendFactory, BufferInfo, CodecCallbacks, EncoderBackend, InputSlot, MediaFormat,
    OutputFormat,
};
use crate::media::sink::StreamKind;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Invoked once when an encoder session fails at runtime
pub type FatalErrorHandler = Arc<dyn Fn(StreamKind, &EncoderError) + Send + Sync>;

/// Outcome of submitting one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Handed to the codec
    Queued,
    /// No free input slot; the sample was discarded
    Dropped,
    /// Encoder is not running; the sample was ignored
    Inactive,
    /// The codec rejected the sample and the session is now failed
    Failed,
}

/// Per-encoder counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderStats {
    pub queued: u64,
    pub dropped: u64,
}

/// Codec-specific handling of output events, run on the callback thread
pub(crate) trait OutputHandler: Send + 'static {
    fn on_output(&mut self, data: &[u8], info: &BufferInfo);
    fn on_format_changed(&mut self, format: &OutputFormat);
}

/// Strictly increasing microsecond timestamps from a monotonic clock
#[derive(Debug)]
pub(crate) struct PresentationClock {
    origin: Instant,
    next_min_us: AtomicU64,
}

impl PresentationClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            next_min_us: AtomicU64::new(0),
        }
    }

    /// Microseconds since the session started, never repeating a value
    pub fn next_us(&self) -> u64 {
        let elapsed = self.origin.elapsed().as_micros() as u64;
        let prev_min = self
            .next_min_us
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |min| {
                Some(elapsed.max(min) + 1)
            })
            .unwrap_or_else(|min| min);
        elapsed.max(prev_min)
    }
}

/// Marks the session failed and notifies the registered handler
#[derive(Clone)]
struct FailureReporter {
    kind: StreamKind,
    state: Arc<StateCell>,
    handler: Arc<RwLock<Option<FatalErrorHandler>>>,
}

impl FailureReporter {
    fn report(&self, error: EncoderError) {
        match self.state.transition(
            &[EncoderState::Configured, EncoderState::Running],
            EncoderState::Failed,
        ) {
            Ok(previous) => {
                error!(stream = %self.kind, state = %previous, error = %error, "Encoder session failed");
                let handler = self.handler.read().clone();
                if let Some(handler) = handler {
                    handler(self.kind, &error);
                }
            }
            Err(current) => {
                warn!(stream = %self.kind, state = %current, error = %error, "Codec error outside an active session");
            }
        }
    }
}

/// Routes backend events to the pool, the output handler and the failure path
struct SessionCallbacks<H> {
    pool: Arc<BufferIndexPool>,
    state: Arc<StateCell>,
    failure: FailureReporter,
    handler: H,
}

impl<H: OutputHandler> CodecCallbacks for SessionCallbacks<H> {
    fn on_input_available(&mut self, slot: InputSlot) {
        self.pool.offer(slot);
    }

    fn on_output_available(&mut self, data: &[u8], info: &BufferInfo) {
        if self.state.get().forwards_output() {
            self.handler.on_output(data, info);
        } else {
            trace!(stream = %self.failure.kind, size = data.len(), "Discarding output of inactive session");
        }
    }

    fn on_output_format_changed(&mut self, format: &OutputFormat) {
        if self.state.get().forwards_output() {
            self.handler.on_format_changed(format);
        }
    }

    fn on_error(&mut self, error: EncoderError) {
        self.failure.report(error);
    }
}

struct Session {
    backend: Box<dyn EncoderBackend>,
    pool: Arc<BufferIndexPool>,
    clock: PresentationClock,
}

pub(crate) struct EncoderCore {
    kind: StreamKind,
    factory: Arc<dyn BackendFactory>,
    state: Arc<StateCell>,
    session: Arc<RwLock<Option<Session>>>,
    fatal_handler: Arc<RwLock<Option<FatalErrorHandler>>>,
    /// Serialises configure/start/stop
    control: Mutex<()>,
    release_thread: Mutex<Option<JoinHandle<()>>>,
    release_grace: Duration,
    queued: AtomicU64,
    dropped: AtomicU64,
}

impl EncoderCore {
    pub fn new(kind: StreamKind, factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            kind,
            factory,
            state: Arc::new(StateCell::new(EncoderState::Uninitialized)),
            session: Arc::new(RwLock::new(None)),
            fatal_handler: Arc::new(RwLock::new(None)),
            control: Mutex::new(()),
            release_thread: Mutex::new(None),
            release_grace: timing::RELEASE_GRACE,
            queued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn set_release_grace(&mut self, grace: Duration) {
        self.release_grace = grace;
    }

    pub fn set_fatal_error_handler(&self, handler: FatalErrorHandler) {
        *self.fatal_handler.write() = Some(handler);
    }

    pub fn state(&self) -> EncoderState {
        self.state.get()
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            queued: self.queued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn failure_reporter(&self) -> FailureReporter {
        FailureReporter {
            kind: self.kind,
            state: Arc::clone(&self.state),
            handler: Arc::clone(&self.fatal_handler),
        }
    }

    /// Create and configure a fresh backend session
    ///
    /// On failure the backend is released and the state is left unchanged.
    pub fn configure<H: OutputHandler>(
        &self,
        format: MediaFormat,
        handler: H,
    ) -> Result<(), EncoderError> {
        let _control = self.control.lock();

        let current = self.state.get();
        if !current.can_configure() {
            return Err(EncoderError::InvalidState {
                operation: "configure",
                state: current.name(),
            });
        }

        // Previous release thread has finished once we are Stopped
        self.wait_released();

        let mut backend = self.factory.create(format.kind())?;
        let pool = Arc::new(BufferIndexPool::new());
        let callbacks = SessionCallbacks {
            pool: Arc::clone(&pool),
            state: Arc::clone(&self.state),
            failure: self.failure_reporter(),
            handler,
        };

        if let Err(e) = backend.configure(&format, Box::new(callbacks)) {
            warn!(stream = %self.kind, backend = %backend.name(), error = %e, "Backend rejected configuration");
            backend.release();
            return Err(e);
        }

        info!(stream = %self.kind, backend = %backend.name(), format = ?format, "Encoder configured");

        *self.session.write() = Some(Session {
            backend,
            pool,
            clock: PresentationClock::new(),
        });
        self.state.set(EncoderState::Configured);
        Ok(())
    }

    /// Configured -> Running
    pub fn start(&self) -> Result<(), EncoderError> {
        let _control = self.control.lock();

        let current = self.state.get();
        if current != EncoderState::Configured {
            return Err(EncoderError::InvalidState {
                operation: "start",
                state: current.name(),
            });
        }

        let mut guard = self.session.write();
        let Some(session) = guard.as_mut() else {
            return Err(EncoderError::InvalidState {
                operation: "start",
                state: current.name(),
            });
        };

        session.clock = PresentationClock::new();
        self.state.set(EncoderState::Running);

        if let Err(e) = session.backend.start() {
            error!(stream = %self.kind, error = %e, "Failed to start encoder");
            session.backend.release();
            session.pool.drain();
            *guard = None;
            self.state.set(EncoderState::Stopped);
            return Err(e);
        }

        info!(stream = %self.kind, backend = %session.backend.name(), "Encoder started");
        Ok(())
    }

    /// Copy `data` into a free input slot, or drop it if none is available
    pub fn submit(&self, data: &[u8]) -> Submission {
        if self.state.get() != EncoderState::Running {
            return Submission::Inactive;
        }

        let guard = self.session.read();
        let Some(session) = guard.as_ref() else {
            return Submission::Inactive;
        };

        let Some(slot) = session.pool.try_acquire() else {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped == 1 || dropped % timing::DROP_LOG_INTERVAL == 0 {
                debug!(stream = %self.kind, dropped, "No free input slot, dropping sample");
            }
            return Submission::Dropped;
        };

        // stop() may have landed between the state check and the acquire
        if self.state.get() != EncoderState::Running {
            session.pool.offer(slot);
            return Submission::Inactive;
        }

        let pts = session.clock.next_us();
        let slot_index = slot.index();
        match session.backend.queue_input(slot, data, pts) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::Relaxed);
                trace!(stream = %self.kind, slot = slot_index, pts, size = data.len(), "Queued input");
                Submission::Queued
            }
            Err(e) => {
                drop(guard);
                self.failure_reporter().report(e);
                Submission::Failed
            }
        }
    }

    /// Refuse further input now; release the backend after the grace delay
    ///
    /// Returns immediately. Use [`EncoderCore::wait_released`] to block until
    /// the backend is gone.
    pub fn stop(&self) {
        let _control = self.control.lock();

        let previous = match self.state.transition(
            &[
                EncoderState::Configured,
                EncoderState::Running,
                EncoderState::Failed,
            ],
            EncoderState::Draining,
        ) {
            Ok(previous) => previous,
            Err(current) => {
                debug!(stream = %self.kind, state = %current, "Stop ignored");
                return;
            }
        };

        info!(
            stream = %self.kind,
            from = %previous,
            grace_ms = self.release_grace.as_millis() as u64,
            "Stopping encoder"
        );

        // Only a finished thread can be left over at this point
        self.wait_released();

        let thread_name = match self.kind {
            StreamKind::Video => threads::VIDEO_RELEASE,
            StreamKind::Audio => threads::AUDIO_RELEASE,
        };
        let session = Arc::clone(&self.session);
        let state = Arc::clone(&self.state);
        let (kind, grace) = (self.kind, self.release_grace);

        let spawned = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || release_after_grace(kind, &session, &state, grace));

        match spawned {
            Ok(handle) => *self.release_thread.lock() = Some(handle),
            Err(e) => {
                warn!(stream = %self.kind, error = %e, "Could not spawn release thread, releasing inline");
                release_after_grace(self.kind, &self.session, &self.state, Duration::ZERO);
            }
        }
    }

    /// Block until a pending deferred release has completed
    pub fn wait_released(&self) {
        let handle = self.release_thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(stream = %self.kind, "Encoder release thread panicked");
            }
        }
    }
}

fn release_after_grace(
    kind: StreamKind,
    session: &RwLock<Option<Session>>,
    state: &StateCell,
    grace: Duration,
) {
    if !grace.is_zero() {
        thread::sleep(grace);
    }

    // Waits for any submit still holding the read lock
    let taken = session.write().take();
    if let Some(mut session) = taken {
        session.backend.release();
        let discarded = session.pool.drain();
        debug!(stream = %kind, discarded, "Backend released");
    }

    state.set(EncoderState::Stopped);
    info!(stream = %kind, "Encoder stopped");
}

impl Drop for EncoderCore {
    fn drop(&mut self) {
        self.wait_released();
        if let Some(mut session) = self.session.write().take() {
            debug!(stream = %self.kind, "Encoder dropped with live session, releasing");
            session.backend.release();
        }
    }
}
