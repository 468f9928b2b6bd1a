//! The module contract.
//!
//! A module is one measurement source. It runs its own sampling loop on a
//! worker thread and appends rows to its [`SampleBuffer`]; the aggregator only
//! ever reads that buffer and polls [`Module::is_running`].
//!
//! ```text
//!  ┌──────────┐  push   ┌──────────────┐  read  ┌────────────┐
//!  │  Worker  ├────────►│ SampleBuffer │◄───────┤ Aggregator │
//!  └────┬─────┘         └──────────────┘        └─────┬──────┘
//!       │ running flag                                │ is_running()
//!       └─────────────────────────────────────────────┘
//! ```
//!
//! Most sources implement the smaller [`Source`] trait and are wrapped in a
//! [`SourceModule`], which takes care of the worker lifecycle.

mod buffer;
pub mod mock;
mod registry;
mod source;
mod worker;

pub use buffer::{Retention, Row, SampleBuffer};
pub use registry::{ModuleEntry, ModuleFactory, ModuleRegistry, RegistryError};
pub use source::{SampleContext, Sampler, Source, SourceModule};
pub use worker::{StopSignal, Worker};

use std::time::Duration;

/// Parameters handed to every module before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleParams {
    /// Monitored process id, as text.
    pub pid: String,
    /// Sampling interval in whole seconds. Forced to 1 when
    /// `interval_micros` is set.
    pub interval: u64,
    /// Optional sub-second sampling interval.
    pub interval_micros: Option<u64>,
    /// Module-defined positional options.
    pub options: Vec<String>,
    /// Buffer retention policy for this session.
    pub retention: Retention,
}

impl Default for ModuleParams {
    fn default() -> Self {
        Self {
            pid: String::new(),
            interval: 10,
            interval_micros: None,
            options: Vec::new(),
            retention: Retention::Unbounded,
        }
    }
}

impl ModuleParams {
    /// The effective sampling period.
    pub fn period(&self) -> Duration {
        match self.interval_micros {
            Some(micros) => Duration::from_micros(micros.max(1)),
            None => Duration::from_secs(self.interval.max(1)),
        }
    }

    /// Positional option `idx`, if given and non-empty.
    pub fn option(&self, idx: usize) -> Option<&str> {
        self.options
            .get(idx)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Target pid as a number.
    pub fn pid_number(&self) -> Result<u32, ModuleError> {
        self.pid
            .parse()
            .map_err(|_| ModuleError::InvalidPid(self.pid.clone()))
    }
}

/// Capability set every measurement source implements.
pub trait Module: Send {
    /// Registry name of this module kind.
    fn kind(&self) -> &str;

    /// Stores parameters. Must be called before [`Module::start`]; performs
    /// no I/O.
    fn configure(&mut self, params: ModuleParams);

    /// Starts the sampling loop and returns immediately. Fails if the
    /// resources the loop needs cannot be acquired.
    fn start(&mut self) -> Result<(), ModuleError>;

    /// Requests the loop to terminate and waits until it has exited.
    /// Idempotent.
    fn stop(&mut self) -> Result<(), ModuleError>;

    /// True from a successful start until the loop has fully exited.
    fn is_running(&self) -> bool;

    /// Column names, stable for the module's lifetime.
    fn labels(&self) -> Vec<String>;

    /// Suggested minimum display width per column, parallel to `labels()`.
    fn column_width_hints(&self) -> Vec<usize>;

    /// Shared handle to the module's sample buffer.
    fn buffer(&self) -> SampleBuffer;
}

/// Errors raised at the module boundary.
#[derive(Debug)]
pub enum ModuleError {
    /// `start()` before `configure()`.
    NotConfigured(String),
    /// `start()` on a module whose loop is still running.
    AlreadyRunning(String),
    /// The target pid is not a number.
    InvalidPid(String),
    /// A module option has an unusable value.
    InvalidOption {
        index: usize,
        value: String,
        reason: String,
    },
    /// An external tool could not be launched.
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// Output of a data source could not be understood.
    Parse(String),
    /// The worker thread panicked.
    WorkerPanicked(String),
    Io(std::io::Error),
}

impl std::fmt::Display for ModuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleError::NotConfigured(kind) => write!(f, "module {} is not configured", kind),
            ModuleError::AlreadyRunning(kind) => write!(f, "module {} is already running", kind),
            ModuleError::InvalidPid(pid) => write!(f, "invalid pid '{}'", pid),
            ModuleError::InvalidOption {
                index,
                value,
                reason,
            } => write!(f, "option {} ('{}'): {}", index + 1, value, reason),
            ModuleError::Spawn { program, source } => {
                write!(f, "could not start {}: {}", program, source)
            }
            ModuleError::Parse(msg) => write!(f, "parse error: {}", msg),
            ModuleError::WorkerPanicked(name) => write!(f, "worker {} panicked", name),
            ModuleError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ModuleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ModuleError::Spawn { source, .. } => Some(source),
            ModuleError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ModuleError {
    fn from(e: std::io::Error) -> Self {
        ModuleError::Io(e)
    }
}

impl From<crate::procfs::ParseError> for ModuleError {
    fn from(e: crate::procfs::ParseError) -> Self {
        ModuleError::Parse(e.message)
    }
}
