//! Hand-driven module for tests.
//!
//! `ManualModule` has no sampling loop. Tests push rows and flip liveness
//! through a [`ManualHandle`] that stays valid after the module itself has
//! been moved into a session.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{Module, ModuleError, ModuleParams, Row, SampleBuffer};

#[derive(Debug, Default)]
struct ManualState {
    running: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    params: Mutex<Option<ModuleParams>>,
}

/// Test-side control over a [`ManualModule`].
#[derive(Debug, Clone)]
pub struct ManualHandle {
    buffer: SampleBuffer,
    state: Arc<ManualState>,
}

impl ManualHandle {
    pub fn push(&self, row: &[&str]) {
        self.buffer.push(row.iter().map(|v| v.to_string()).collect::<Row>());
    }

    pub fn buffer(&self) -> SampleBuffer {
        self.buffer.clone()
    }

    /// Simulates the sampling loop exiting on its own.
    pub fn kill(&self) {
        self.state.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.state.stops.load(Ordering::SeqCst)
    }

    /// Parameters from the last `configure()`.
    pub fn params(&self) -> Option<ModuleParams> {
        self.state.params.lock().clone()
    }
}

/// A module whose rows and liveness are controlled from the test.
pub struct ManualModule {
    kind: String,
    labels: Vec<String>,
    widths: Vec<usize>,
    fail_start: bool,
    handle: ManualHandle,
}

impl ManualModule {
    pub fn new(kind: &str, labels: &[&str]) -> Self {
        Self {
            kind: kind.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            widths: vec![0; labels.len()],
            fail_start: false,
            handle: ManualHandle {
                buffer: SampleBuffer::new(),
                state: Arc::new(ManualState::default()),
            },
        }
    }

    pub fn with_widths(mut self, widths: &[usize]) -> Self {
        self.widths = widths.to_vec();
        self
    }

    /// Makes `start()` fail as if a required tool were missing.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn handle(&self) -> ManualHandle {
        self.handle.clone()
    }
}

impl Module for ManualModule {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn configure(&mut self, params: ModuleParams) {
        self.handle.buffer.set_retention(params.retention);
        *self.handle.state.params.lock() = Some(params);
    }

    fn start(&mut self) -> Result<(), ModuleError> {
        self.handle.state.starts.fetch_add(1, Ordering::SeqCst);
        if self.handle.state.params.lock().is_none() {
            return Err(ModuleError::NotConfigured(self.kind.clone()));
        }
        if self.fail_start {
            return Err(ModuleError::Spawn {
                program: self.kind.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            });
        }
        self.handle.state.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ModuleError> {
        self.handle.state.stops.fetch_add(1, Ordering::SeqCst);
        self.handle.state.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    fn labels(&self) -> Vec<String> {
        self.labels.clone()
    }

    fn column_width_hints(&self) -> Vec<usize> {
        self.widths.clone()
    }

    fn buffer(&self) -> SampleBuffer {
        self.handle.buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_controls_module() {
        let mut module = ManualModule::new("manual", &["time", "v"]);
        let handle = module.handle();

        module.configure(ModuleParams::default());
        module.start().unwrap();
        assert!(module.is_running());

        handle.push(&["100", "1"]);
        assert_eq!(module.buffer().len(), 1);

        handle.kill();
        assert!(!module.is_running());

        module.stop().unwrap();
        assert_eq!(handle.start_calls(), 1);
        assert_eq!(handle.stop_calls(), 1);
    }

    #[test]
    fn test_failing_start() {
        let mut module = ManualModule::new("broken", &["time"]).failing_start();
        module.configure(ModuleParams::default());
        assert!(matches!(module.start(), Err(ModuleError::Spawn { .. })));
        assert!(!module.is_running());
    }
}
