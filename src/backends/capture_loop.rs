// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for blocking capture loops
//!
//! Used for the microphone read loop: one named thread repeatedly runs a
//! closure until it asks to stop or the controller is told to stop.

use std::fmt::Display;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a capture loop running in its own thread
///
/// # Example
///
/// ```ignore
/// let controller = CaptureLoopController::start_with_init(
///     "audio-capture",
///     || microphone.open(),
///     |mic| match mic.read(&mut buf) {
///         Ok(n) if n > 0 => { encoder.encode(&buf[..n]); LoopAction::Continue }
///         _ => { thread::sleep(backoff); LoopAction::Continue }
///     },
/// )?;
///
/// // Later, from another thread
/// controller.request_stop();
/// ```
pub struct CaptureLoopController {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Signal to stop the loop
    stop_signal: Arc<AtomicBool>,
    /// Name for logging
    name: String,
}

impl CaptureLoopController {
    /// Run `init_fn` once on the new thread, then `loop_fn` with its state
    ///
    /// If initialization fails the thread exits without looping. The state
    /// is dropped on the loop thread when the loop ends, so teardown can
    /// live in its `Drop` impl.
    pub fn start_with_init<S, E, I, F>(name: &str, init_fn: I, mut loop_fn: F) -> io::Result<Self>
    where
        S: 'static,
        E: Display + 'static,
        I: FnOnce() -> Result<S, E> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name = %name, "Starting capture loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = match init_fn() {
                    Ok(s) => {
                        debug!(name = %thread_name, "Initialization successful");
                        s
                    }
                    Err(e) => {
                        warn!(name = %thread_name, error = %e, "Initialization failed");
                        return;
                    }
                };

                loop {
                    if thread_stop.load(Ordering::SeqCst) {
                        debug!(name = %thread_name, "Stop signal received");
                        break;
                    }

                    if loop_fn(&mut state) == LoopAction::Stop {
                        debug!(name = %thread_name, "Loop requested stop");
                        break;
                    }
                }

                drop(state);
                info!(name = %thread_name, "Capture loop thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop without waiting for it
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting capture loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Signal the loop to stop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending the stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.name, "Waiting for capture loop thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn spawn_loop<F>(name: &str, mut loop_fn: F) -> io::Result<CaptureLoopController>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        CaptureLoopController::start_with_init(name, || Ok::<(), String>(()), move |_| loop_fn())
    }

    #[test]
    fn test_basic_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = spawn_loop("test-loop", move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            if count >= 10 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        })
        .unwrap();

        controller.join();
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_request_stop_is_non_blocking() {
        let mut controller = spawn_loop("test-stop", || {
            thread::sleep(Duration::from_millis(10));
            LoopAction::Continue
        })
        .unwrap();

        thread::sleep(Duration::from_millis(30));
        controller.request_stop();
        controller.join();
        assert!(!controller.is_running());
    }

    #[test]
    fn test_state_dropped_on_loop_thread_exit() {
        struct Guard(Arc<AtomicBool>);
        impl Drop for Guard {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let guard_flag = Arc::clone(&dropped);

        let mut controller = CaptureLoopController::start_with_init(
            "test-guard",
            move || Ok::<_, String>(Guard(guard_flag)),
            |_| LoopAction::Stop,
        )
        .unwrap();

        controller.join();
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_init_failure() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);

        let mut controller = CaptureLoopController::start_with_init(
            "test-fail-init",
            || Err::<(), _>("device busy"),
            move |_| {
                ran_clone.store(true, Ordering::SeqCst);
                LoopAction::Stop
            },
        )
        .unwrap();

        controller.join();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_is_running() {
        let controller = spawn_loop("test-running", || {
            thread::sleep(Duration::from_millis(20));
            LoopAction::Continue
        })
        .unwrap();

        assert!(controller.is_running());
        drop(controller);
    }
}
