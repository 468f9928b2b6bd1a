//! Cancellable waiting and joinable sampling threads.
//!
//! [`StopSignal`] is a one-shot flag paired with a condition variable, so a
//! sleeping sampler or the aggregator's tick wait wakes up as soon as a stop
//! is requested instead of waiting out its interval. [`Worker`] owns one
//! sampling thread together with its stop signal and liveness flag.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::ModuleError;

type StopHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct SignalState {
    triggered: bool,
    hooks: Vec<StopHook>,
}

#[derive(Default)]
struct SignalInner {
    state: Mutex<SignalState>,
    cond: Condvar,
}

/// One-shot stop request that can be waited on with a timeout.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<SignalInner>,
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop and wakes every waiter. Registered hooks run once,
    /// on the calling thread, after the lock is released.
    pub fn trigger(&self) {
        let hooks = {
            let mut state = self.inner.state.lock();
            state.triggered = true;
            std::mem::take(&mut state.hooks)
        };
        self.inner.cond.notify_all();
        for hook in hooks {
            hook();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.state.lock().triggered
    }

    /// Registers `hook` to run when the signal is triggered. Runs it right
    /// away if the signal already fired.
    ///
    /// Samplers use this to kill an external tool so that a blocking pipe
    /// read returns.
    pub fn on_trigger(&self, hook: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.state.lock();
        if state.triggered {
            drop(state);
            hook();
        } else {
            state.hooks.push(Box::new(hook));
        }
    }

    /// Waits until `deadline` or until triggered. Returns `true` if triggered.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut state = self.inner.state.lock();
        while !state.triggered {
            if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.triggered
    }

    /// Waits for `timeout` or until triggered. Returns `true` if triggered.
    /// A timeout past the end of `Instant` waits for the trigger only.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(deadline),
            None => {
                let mut state = self.inner.state.lock();
                while !state.triggered {
                    self.inner.cond.wait(&mut state);
                }
                true
            }
        }
    }
}

/// Clears the liveness flag when the worker body returns or unwinds.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A sampling thread with cooperative stop and join-on-stop semantics.
pub struct Worker {
    name: String,
    stop: StopSignal,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns `body` on a named thread.
    ///
    /// The worker counts as running until `body` returns (or panics). An
    /// `Err` from `body` is logged here; it never crosses the module
    /// boundary.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self, ModuleError>
    where
        F: FnOnce(StopSignal) -> Result<(), ModuleError> + Send + 'static,
    {
        let name = name.into();
        let stop = StopSignal::new();
        let running = Arc::new(AtomicBool::new(true));

        let thread_stop = stop.clone();
        let thread_running = running.clone();
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(format!("promon-{}", name))
            .spawn(move || {
                let _guard = RunningGuard(thread_running);
                let stop = thread_stop.clone();
                match body(thread_stop) {
                    Ok(()) if stop.is_triggered() => {
                        debug!("{}: sampling loop stopped", thread_name);
                    }
                    Ok(()) => {
                        warn!("{}: sampling loop ended", thread_name);
                    }
                    Err(e) => {
                        error!("{}: {}", thread_name, e);
                    }
                }
            })
            .map_err(|e| {
                running.store(false, Ordering::SeqCst);
                ModuleError::Io(e)
            })?;

        Ok(Self {
            name,
            stop,
            running,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Triggers the stop signal and blocks until the thread has exited.
    /// Calling it again is a no-op.
    pub fn stop(&mut self) -> Result<(), ModuleError> {
        self.stop.trigger();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ModuleError::WorkerPanicked(self.name.clone())),
            None => Ok(()),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
