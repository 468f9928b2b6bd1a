//! Session supervision: target liveness, module liveness and the tick loop.
//!
//! A [`Session`] moves through `Starting → Running → Stopping → Stopped`.
//! While running it wakes on a fixed-rate schedule, probes the target,
//! checks every module and writes one row. The first of target exit,
//! module failure or a stop request ends the session; shutdown always stops
//! every started module and flushes the sink.

pub mod mock;
mod target;

pub use target::{
    AttachedProcess, Liveness, ManagedChild, STARTUP_GRACE, Target, TargetError,
};

use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::aggregate::{Aggregator, ColumnProjection, Feed, MergeMode};
use crate::config::{ConfigError, Interval, SessionConfig, TargetSpec};
use crate::module::{
    Module, ModuleError, ModuleParams, ModuleRegistry, RegistryError, Retention, StopSignal,
};
use crate::procfs::RealFs;
use crate::sink::OutputSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    TargetExited { pid: u32, code: Option<i32> },
    ModuleFailed { index: usize, name: String },
    /// A stop was requested (SIGINT, SIGTERM).
    Interrupted,
}

impl ExitReason {
    /// Process exit status for this reason.
    pub fn exit_code(&self) -> u8 {
        match self {
            ExitReason::TargetExited { .. } | ExitReason::Interrupted => 0,
            ExitReason::ModuleFailed { .. } => 1,
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::TargetExited { pid, code: Some(code) } => {
                write!(f, "target {} exited with code {}", pid, code)
            }
            ExitReason::TargetExited { pid, code: None } => write!(f, "target {} exited", pid),
            ExitReason::ModuleFailed { index, name } => {
                write!(f, "module {} ({}) stopped unexpectedly", index, name)
            }
            ExitReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Per-module presentation and options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleBinding {
    /// Header prefix including the trailing `:`.
    pub prefix: String,
    /// Selected columns; empty means all.
    pub columns: Vec<String>,
    pub options: Vec<String>,
}

#[derive(Debug)]
pub enum SessionError {
    Config(ConfigError),
    Registry(RegistryError),
    Target(TargetError),
    ModuleStart {
        index: usize,
        name: String,
        source: ModuleError,
    },
    ModuleStop {
        name: String,
        source: ModuleError,
    },
    Output(std::io::Error),
    /// An operation was called in the wrong state.
    InvalidState(SessionState),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Config(e) => write!(f, "{}", e),
            SessionError::Registry(e) => write!(f, "{}", e),
            SessionError::Target(e) => write!(f, "target: {}", e),
            SessionError::ModuleStart {
                index,
                name,
                source,
            } => write!(f, "module {} ({}) failed to start: {}", index, name, source),
            SessionError::ModuleStop { name, source } => {
                write!(f, "module {} failed to stop: {}", name, source)
            }
            SessionError::Output(e) => write!(f, "output: {}", e),
            SessionError::InvalidState(state) => {
                write!(f, "operation not allowed in state {:?}", state)
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Config(e) => Some(e),
            SessionError::Registry(e) => Some(e),
            SessionError::Target(e) => Some(e),
            SessionError::ModuleStart { source, .. } => Some(source),
            SessionError::ModuleStop { source, .. } => Some(source),
            SessionError::Output(e) => Some(e),
            SessionError::InvalidState(_) => None,
        }
    }
}

impl From<ConfigError> for SessionError {
    fn from(e: ConfigError) -> Self {
        SessionError::Config(e)
    }
}

impl From<RegistryError> for SessionError {
    fn from(e: RegistryError) -> Self {
        SessionError::Registry(e)
    }
}

impl From<TargetError> for SessionError {
    fn from(e: TargetError) -> Self {
        SessionError::Target(e)
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Output(e)
    }
}

struct ModuleSlot {
    module: Box<dyn Module>,
    binding: ModuleBinding,
    started: bool,
}

/// One monitoring run.
pub struct Session {
    state: SessionState,
    modules: Vec<ModuleSlot>,
    target: Box<dyn Target>,
    sink: OutputSink,
    interval: Interval,
    merge: MergeMode,
    retention: Retention,
    stop: StopSignal,
    aggregator: Option<Aggregator>,
}

impl Session {
    pub fn new(target: Box<dyn Target>, sink: OutputSink, interval: Interval) -> Self {
        Self {
            state: SessionState::Starting,
            modules: Vec::new(),
            target,
            sink,
            interval,
            merge: MergeMode::Direct,
            retention: Retention::Unbounded,
            stop: StopSignal::new(),
            aggregator: None,
        }
    }

    pub fn with_merge_mode(mut self, merge: MergeMode) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    pub fn add_module(&mut self, module: Box<dyn Module>, binding: ModuleBinding) {
        self.modules.push(ModuleSlot {
            module,
            binding,
            started: false,
        });
    }

    /// Resolves modules, opens the output and launches or attaches the
    /// target, in that order, so configuration errors never leave a
    /// launched program behind.
    pub fn from_config(
        config: &SessionConfig,
        registry: &ModuleRegistry,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let mut modules = Vec::with_capacity(config.modules.len());
        for (index, spec) in config.modules.iter().enumerate() {
            let module = registry.create(&spec.name)?;
            let binding = ModuleBinding {
                prefix: spec.display_prefix(index),
                columns: spec.columns.clone(),
                options: spec.options.clone(),
            };
            modules.push((module, binding));
        }

        let sink = match &config.output {
            Some(path) => OutputSink::file(path).map_err(|source| ConfigError::OutputFile {
                path: path.clone(),
                source,
            })?,
            None => OutputSink::stdout(),
        };

        let target: Box<dyn Target> = match &config.target {
            TargetSpec::Launch { program, args } => {
                Box::new(ManagedChild::spawn(program, args, STARTUP_GRACE)?)
            }
            TargetSpec::Attach(pid) => Box::new(AttachedProcess::attach(
                RealFs::new(),
                &config.proc_root,
                *pid,
            )?),
        };
        info!("monitoring {}", target.describe());

        let mut session = Session::new(target, sink, config.interval)
            .with_merge_mode(config.merge)
            .with_retention(config.retention);
        for (module, binding) in modules {
            session.add_module(module, binding);
        }
        Ok(session)
    }

    /// Handle that ends [`Session::run`] when triggered.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target_pid(&self) -> u32 {
        self.target.pid()
    }

    pub fn rows_written(&self) -> u64 {
        self.sink.rows_written()
    }

    /// Configures and starts every module, then writes the header.
    ///
    /// If a module fails to start, the ones already started are stopped
    /// again and the session ends in `Stopped`.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Starting {
            return Err(SessionError::InvalidState(self.state));
        }
        self.interval.validate()?;

        let pid = self.target.pid().to_string();
        for index in 0..self.modules.len() {
            let params = ModuleParams {
                pid: pid.clone(),
                interval: self.interval.module_secs(),
                interval_micros: self.interval.micros(),
                options: self.modules[index].binding.options.clone(),
                retention: self.retention,
            };
            let slot = &mut self.modules[index];
            slot.module.configure(params);
            if let Err(source) = slot.module.start() {
                let name = slot.module.kind().to_string();
                // Best effort: the start error is what gets reported.
                let _ = self.shutdown();
                return Err(SessionError::ModuleStart {
                    index,
                    name,
                    source,
                });
            }
            slot.started = true;
            debug!("module {} ({}) started", index, slot.module.kind());
        }

        let mut feeds = Vec::with_capacity(self.modules.len());
        for (index, slot) in self.modules.iter().enumerate() {
            let projection = ColumnProjection::new(
                &slot.module.labels(),
                &slot.module.column_width_hints(),
                &slot.binding.columns,
                &slot.binding.prefix,
            );
            for column in projection.unknown() {
                warn!(
                    "module {} ({}): unknown column '{}' ignored",
                    index,
                    slot.module.kind(),
                    column
                );
            }
            feeds.push(Feed::new(
                slot.module.kind(),
                slot.module.buffer(),
                projection,
            ));
        }
        let aggregator = Aggregator::new(self.merge, feeds);

        if let Err(e) = self.sink.write_header(&aggregator.headers(), &aggregator.widths()) {
            let _ = self.shutdown();
            return Err(e.into());
        }
        self.aggregator = Some(aggregator);
        self.state = SessionState::Running;
        info!(
            "session running: {} module(s), interval {}, {:?} merge",
            self.modules.len(),
            self.interval,
            self.merge
        );
        Ok(())
    }

    /// One supervision step: probe the target, check the modules, write a
    /// row. Returns the exit reason instead of writing when something is
    /// gone.
    pub fn tick(&mut self) -> Result<Option<ExitReason>, SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::InvalidState(self.state));
        }

        if let Liveness::Exited(code) = self.target.probe()? {
            return Ok(Some(ExitReason::TargetExited {
                pid: self.target.pid(),
                code,
            }));
        }

        for (index, slot) in self.modules.iter().enumerate() {
            if !slot.module.is_running() {
                return Ok(Some(ExitReason::ModuleFailed {
                    index,
                    name: slot.module.kind().to_string(),
                }));
            }
        }

        let Some(aggregator) = self.aggregator.as_mut() else {
            return Err(SessionError::InvalidState(self.state));
        };
        let row = aggregator.assemble();
        self.sink.write_row(&row)?;
        Ok(None)
    }

    /// Starts the session if needed and ticks until it ends.
    ///
    /// Deadlines follow `start + n × period`; a tick that overruns skips
    /// the deadlines it missed rather than firing them back to back. The
    /// session is shut down on every path out of this function.
    pub fn run(&mut self) -> Result<ExitReason, SessionError> {
        if self.state == SessionState::Starting {
            self.start()?;
        }

        let result = self.tick_loop();
        let shutdown = self.shutdown();
        let reason = result?;
        shutdown?;

        match &reason {
            ExitReason::ModuleFailed { .. } => error!("{}", reason),
            _ => info!("session ended: {}", reason),
        }
        Ok(reason)
    }

    fn tick_loop(&mut self) -> Result<ExitReason, SessionError> {
        let period = self.interval.period();
        let mut deadline = Instant::now() + period;
        loop {
            if self.stop.wait_until(deadline) {
                return Ok(ExitReason::Interrupted);
            }
            if let Some(reason) = self.tick()? {
                return Ok(reason);
            }

            deadline += period;
            let now = Instant::now();
            let mut missed = 0u64;
            while deadline <= now {
                deadline += period;
                missed += 1;
            }
            if missed > 0 {
                debug!("tick overran, skipped {} deadline(s)", missed);
            }
        }
    }

    /// Stops every started module and flushes the output. Idempotent.
    pub fn shutdown(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Stopped {
            return Ok(());
        }
        self.state = SessionState::Stopping;

        let mut first_error = None;
        for slot in self.modules.iter_mut().filter(|slot| slot.started) {
            if let Err(source) = slot.module.stop() {
                error!("module {}: {}", slot.module.kind(), source);
                first_error.get_or_insert(SessionError::ModuleStop {
                    name: slot.module.kind().to_string(),
                    source,
                });
            }
            slot.started = false;
        }
        if let Err(e) = self.sink.flush() {
            first_error.get_or_insert(SessionError::Output(e));
        }

        self.state = SessionState::Stopped;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
