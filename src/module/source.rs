//! Adapter that turns a [`Source`] into a full [`Module`].
//!
//! A source only describes its columns and how to prepare a sampling loop;
//! `SourceModule` owns the buffer, the parameters and the worker thread.

use chrono::Utc;
use std::time::Duration;

use super::{Module, ModuleError, ModuleParams, Row, SampleBuffer, StopSignal, Worker};

/// A prepared sampling loop, run once on the module's worker thread.
pub trait Sampler: Send + 'static {
    fn run(self: Box<Self>, ctx: SampleContext) -> Result<(), ModuleError>;
}

impl<F> Sampler for F
where
    F: FnOnce(SampleContext) -> Result<(), ModuleError> + Send + 'static,
{
    fn run(self: Box<Self>, ctx: SampleContext) -> Result<(), ModuleError> {
        (*self)(ctx)
    }
}

/// Column description plus a factory for the sampling loop.
pub trait Source: Send {
    fn kind(&self) -> &'static str;

    fn labels(&self) -> &'static [&'static str];

    fn widths(&self) -> &'static [usize];

    /// Acquires what the loop needs (pipes, trace files, `/proc` handles).
    /// Runs synchronously inside `start()`, so errors here fail the start.
    fn prepare(&mut self, params: &ModuleParams) -> Result<Box<dyn Sampler>, ModuleError>;
}

/// What a running sampler sees: its buffer, its parameters and its stop
/// signal.
pub struct SampleContext {
    buffer: SampleBuffer,
    stop: StopSignal,
    params: ModuleParams,
}

impl SampleContext {
    pub fn new(buffer: SampleBuffer, stop: StopSignal, params: ModuleParams) -> Self {
        Self {
            buffer,
            stop,
            params,
        }
    }

    pub fn push(&self, row: Row) {
        self.buffer.push(row);
    }

    pub fn params(&self) -> &ModuleParams {
        &self.params
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_triggered()
    }

    /// Sleeps for `duration` unless stopped first. Returns `true` on stop.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.stop.wait_timeout(duration)
    }

    /// Current Unix timestamp in seconds, as a row field.
    pub fn timestamp() -> String {
        Utc::now().timestamp().to_string()
    }
}

/// A [`Module`] backed by a [`Source`] and one worker thread.
pub struct SourceModule<S: Source> {
    source: S,
    params: Option<ModuleParams>,
    buffer: SampleBuffer,
    worker: Option<Worker>,
}

impl<S: Source + 'static> SourceModule<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            params: None,
            buffer: SampleBuffer::new(),
            worker: None,
        }
    }

    pub fn boxed(source: S) -> Box<dyn Module> {
        Box::new(Self::new(source))
    }
}

impl<S: Source> Module for SourceModule<S> {
    fn kind(&self) -> &str {
        self.source.kind()
    }

    fn configure(&mut self, params: ModuleParams) {
        self.buffer.set_retention(params.retention);
        self.params = Some(params);
    }

    fn start(&mut self) -> Result<(), ModuleError> {
        if self.is_running() {
            return Err(ModuleError::AlreadyRunning(self.source.kind().to_string()));
        }
        let params = self
            .params
            .clone()
            .ok_or_else(|| ModuleError::NotConfigured(self.source.kind().to_string()))?;

        let sampler = self.source.prepare(&params)?;
        let buffer = self.buffer.clone();
        let worker = Worker::spawn(self.source.kind(), move |stop| {
            sampler.run(SampleContext::new(buffer, stop, params))
        })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ModuleError> {
        match self.worker.as_mut() {
            Some(worker) => worker.stop(),
            None => Ok(()),
        }
    }

    fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_running)
    }

    fn labels(&self) -> Vec<String> {
        self.source.labels().iter().map(|l| l.to_string()).collect()
    }

    fn column_width_hints(&self) -> Vec<usize> {
        self.source.widths().to_vec()
    }

    fn buffer(&self) -> SampleBuffer {
        self.buffer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Retention;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Instant;

    /// Pushes an increasing counter every period until stopped, or until
    /// `limit` rows have been produced.
    struct CounterSource {
        limit: Option<u64>,
        exited: Arc<AtomicBool>,
    }

    impl Source for CounterSource {
        fn kind(&self) -> &'static str {
            "counter"
        }

        fn labels(&self) -> &'static [&'static str] {
            &["time", "count"]
        }

        fn widths(&self) -> &'static [usize] {
            &[10, 5]
        }

        fn prepare(&mut self, params: &ModuleParams) -> Result<Box<dyn Sampler>, ModuleError> {
            if params.option(0) == Some("fail") {
                return Err(ModuleError::InvalidOption {
                    index: 0,
                    value: "fail".to_string(),
                    reason: "requested failure".to_string(),
                });
            }
            let limit = self.limit;
            let exited = self.exited.clone();
            Ok(Box::new(move |ctx: SampleContext| {
                let mut count = 0u64;
                loop {
                    ctx.push(vec![count.to_string(), count.to_string()]);
                    count += 1;
                    if limit.is_some_and(|l| count >= l) || ctx.sleep(ctx.params().period()) {
                        break;
                    }
                }
                exited.store(true, Ordering::SeqCst);
                Ok(())
            }))
        }
    }

    fn counter(limit: Option<u64>) -> (SourceModule<CounterSource>, Arc<AtomicBool>) {
        let exited = Arc::new(AtomicBool::new(false));
        let module = SourceModule::new(CounterSource {
            limit,
            exited: exited.clone(),
        });
        (module, exited)
    }

    fn fast_params() -> ModuleParams {
        ModuleParams {
            interval: 1,
            interval_micros: Some(1_000),
            ..ModuleParams::default()
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            if Instant::now() > deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
        true
    }

    #[test]
    fn test_start_requires_configure() {
        let (mut module, _) = counter(None);
        assert!(matches!(module.start(), Err(ModuleError::NotConfigured(_))));
        assert!(!module.is_running());
    }

    #[test]
    fn test_labels_and_widths_are_parallel() {
        let (module, _) = counter(None);
        assert_eq!(module.labels(), vec!["time", "count"]);
        assert_eq!(module.column_width_hints(), vec![10, 5]);
    }

    #[test]
    fn test_running_until_stopped() {
        let (mut module, exited) = counter(None);
        module.configure(fast_params());
        module.start().unwrap();
        assert!(module.is_running());

        let buffer = module.buffer();
        assert!(wait_for(|| buffer.len() >= 3));

        module.stop().unwrap();
        assert!(exited.load(Ordering::SeqCst));
        assert!(!module.is_running());

        // No residual producer after stop() returned.
        let len = buffer.len();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(buffer.len(), len);

        module.stop().unwrap();
    }

    #[test]
    fn test_double_start_is_rejected() {
        let (mut module, _) = counter(None);
        module.configure(fast_params());
        module.start().unwrap();
        assert!(matches!(module.start(), Err(ModuleError::AlreadyRunning(_))));
        module.stop().unwrap();
    }

    #[test]
    fn test_self_terminating_loop_reports_not_running() {
        let (mut module, _) = counter(Some(2));
        module.configure(fast_params());
        module.start().unwrap();

        assert!(wait_for(|| !module.is_running()));
        assert_eq!(module.buffer().len(), 2);
        module.stop().unwrap();
    }

    #[test]
    fn test_prepare_failure_fails_start() {
        let (mut module, _) = counter(None);
        module.configure(ModuleParams {
            options: vec!["fail".to_string()],
            ..fast_params()
        });
        assert!(matches!(
            module.start(),
            Err(ModuleError::InvalidOption { index: 0, .. })
        ));
        assert!(!module.is_running());
    }

    #[test]
    fn test_configure_applies_retention() {
        let (mut module, _) = counter(None);
        module.configure(ModuleParams {
            retention: Retention::Latest(2),
            ..fast_params()
        });
        assert_eq!(module.buffer().retention(), Retention::Latest(2));
    }
}
