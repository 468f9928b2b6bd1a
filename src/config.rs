//! Validated session configuration.
//!
//! The command line is parsed in [`crate::cli`]; this module holds the
//! typed result and the checks that do not depend on clap.

use std::path::PathBuf;
use std::time::Duration;

use crate::aggregate::MergeMode;
use crate::module::Retention;
use crate::procfs::DEFAULT_PROC_ROOT;

/// Default sampling interval in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 10;

/// Longest accepted interval, one day. Deadlines are `Instant`s and must
/// stay representable.
pub const MAX_INTERVAL_SECS: u64 = 86_400;

/// Tick period of the aggregator, also handed to every module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Seconds(u64),
    Micros(u64),
}

impl Default for Interval {
    fn default() -> Self {
        Interval::Seconds(DEFAULT_INTERVAL_SECS)
    }
}

impl Interval {
    pub fn period(&self) -> Duration {
        match *self {
            Interval::Seconds(secs) => Duration::from_secs(secs),
            Interval::Micros(micros) => Duration::from_micros(micros),
        }
    }

    /// Whole-second interval for modules; 1 when running on microseconds.
    pub fn module_secs(&self) -> u64 {
        match *self {
            Interval::Seconds(secs) => secs,
            Interval::Micros(_) => 1,
        }
    }

    pub fn micros(&self) -> Option<u64> {
        match *self {
            Interval::Seconds(_) => None,
            Interval::Micros(micros) => Some(micros),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (flag, value, max) = match *self {
            Interval::Seconds(secs) => ("-i", secs, MAX_INTERVAL_SECS),
            Interval::Micros(micros) => ("-I", micros, MAX_INTERVAL_SECS * 1_000_000),
        };
        if value == 0 || value > max {
            return Err(ConfigError::InvalidInterval { flag, value, max });
        }
        Ok(())
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interval::Seconds(secs) => write!(f, "{}s", secs),
            Interval::Micros(micros) => write!(f, "{}us", micros),
        }
    }
}

/// One `-m` occurrence with the `-p/-c/-o` flags that follow it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleSpec {
    pub name: String,
    pub prefix: Option<String>,
    pub columns: Vec<String>,
    pub options: Vec<String>,
}

impl ModuleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Header prefix: `NAME:` for `-p NAME`, otherwise `<index>:`.
    pub fn display_prefix(&self, index: usize) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:", prefix),
            None => format!("{}:", index),
        }
    }
}

/// The monitored process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    /// Launch `program` and own it.
    Launch { program: String, args: Vec<String> },
    /// Follow an existing process.
    Attach(u32),
}

/// Everything a [`crate::supervisor::Session`] needs to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub modules: Vec<ModuleSpec>,
    pub interval: Interval,
    pub target: TargetSpec,
    /// Output file; stdout when unset.
    pub output: Option<PathBuf>,
    pub merge: MergeMode,
    pub retention: Retention,
    /// Where attached targets are looked up.
    pub proc_root: String,
}

impl SessionConfig {
    pub fn new(target: TargetSpec) -> Self {
        Self {
            modules: Vec::new(),
            interval: Interval::default(),
            target,
            output: None,
            merge: MergeMode::Direct,
            retention: Retention::Unbounded,
            proc_root: DEFAULT_PROC_ROOT.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modules.is_empty() {
            return Err(ConfigError::NoModules);
        }
        self.interval.validate()?;
        match &self.target {
            TargetSpec::Attach(0) => Err(ConfigError::InvalidPid(0)),
            TargetSpec::Launch { program, .. } if program.is_empty() => {
                Err(ConfigError::MissingTarget)
            }
            _ => Ok(()),
        }?;
        if self.retention == Retention::Latest(0) {
            return Err(ConfigError::InvalidMaxRows);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    NoModules,
    /// Neither `-P PID` nor a program was given.
    MissingTarget,
    /// Both `-P PID` and a program were given.
    ConflictingTarget,
    InvalidPid(u32),
    InvalidInterval {
        flag: &'static str,
        value: u64,
        max: u64,
    },
    /// `-p`, `-c` or `-o` before the first `-m`.
    OptionBeforeModule(&'static str),
    InvalidMaxRows,
    OutputFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NoModules => write!(f, "no module given (use -m MODULE)"),
            ConfigError::MissingTarget => {
                write!(f, "no target given (use -P PID or a program to run)")
            }
            ConfigError::ConflictingTarget => {
                write!(f, "-P PID and a program to run are mutually exclusive")
            }
            ConfigError::InvalidPid(pid) => write!(f, "invalid pid {}", pid),
            ConfigError::InvalidInterval { flag, value, max } => {
                write!(f, "{} must be between 1 and {} (got {})", flag, max, value)
            }
            ConfigError::OptionBeforeModule(flag) => {
                write!(f, "{} must follow the -m MODULE it applies to", flag)
            }
            ConfigError::InvalidMaxRows => write!(f, "--max-rows must be at least 1"),
            ConfigError::OutputFile { path, source } => {
                write!(f, "cannot open output file {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::OutputFile { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        let mut config = SessionConfig::new(TargetSpec::Attach(1));
        config.modules.push(ModuleSpec::new("procstat"));
        config
    }

    #[test]
    fn test_interval_accessors() {
        let secs = Interval::Seconds(3);
        assert_eq!(secs.period(), Duration::from_secs(3));
        assert_eq!(secs.module_secs(), 3);
        assert_eq!(secs.micros(), None);

        let micros = Interval::Micros(250_000);
        assert_eq!(micros.period(), Duration::from_millis(250));
        assert_eq!(micros.module_secs(), 1);
        assert_eq!(micros.micros(), Some(250_000));

        assert_eq!(Interval::default(), Interval::Seconds(10));
    }

    #[test]
    fn test_display_prefix() {
        let mut spec = ModuleSpec::new("top");
        assert_eq!(spec.display_prefix(2), "2:");
        spec.prefix = Some("net".to_string());
        assert_eq!(spec.display_prefix(2), "net:");
    }

    #[test]
    fn test_validate_accepts_minimal_config() {
        config().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut c = config();
        c.modules.clear();
        assert!(matches!(c.validate(), Err(ConfigError::NoModules)));

        let mut c = config();
        c.interval = Interval::Seconds(0);
        assert!(matches!(
            c.validate(),
            Err(ConfigError::InvalidInterval { flag: "-i", .. })
        ));

        let mut c = config();
        c.interval = Interval::Micros(0);
        assert!(matches!(
            c.validate(),
            Err(ConfigError::InvalidInterval { flag: "-I", .. })
        ));

        let mut c = config();
        c.interval = Interval::Seconds(u64::MAX);
        assert!(matches!(
            c.validate(),
            Err(ConfigError::InvalidInterval { flag: "-i", max: MAX_INTERVAL_SECS, .. })
        ));

        let mut c = config();
        c.interval = Interval::Micros(MAX_INTERVAL_SECS * 1_000_000 + 1);
        assert!(matches!(
            c.validate(),
            Err(ConfigError::InvalidInterval { flag: "-I", .. })
        ));

        let mut c = config();
        c.interval = Interval::Seconds(MAX_INTERVAL_SECS);
        c.validate().unwrap();

        let mut c = config();
        c.target = TargetSpec::Attach(0);
        assert!(matches!(c.validate(), Err(ConfigError::InvalidPid(0))));

        let mut c = config();
        c.retention = Retention::Latest(0);
        assert!(matches!(c.validate(), Err(ConfigError::InvalidMaxRows)));
    }
}
