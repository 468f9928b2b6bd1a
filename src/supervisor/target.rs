//! The monitored process: launched and owned, or attached by pid.

use std::path::PathBuf;
use std::process::{Child, Command};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::procfs::parser::parse_proc_stat;
use crate::procfs::FileSystem;

/// Time a freshly launched program gets before startup checks it is alive.
pub const STARTUP_GRACE: Duration = Duration::from_millis(10);

/// Liveness as seen by one non-blocking probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// Exit code when known (managed children that exited normally).
    Exited(Option<i32>),
}

/// Something whose liveness the session follows.
pub trait Target: Send {
    fn pid(&self) -> u32;

    /// Checks liveness without blocking.
    fn probe(&mut self) -> Result<Liveness, TargetError>;

    fn describe(&self) -> String;
}

#[derive(Debug)]
pub enum TargetError {
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// The launched program was already gone after the startup grace.
    ExitedDuringStartup {
        program: String,
        code: Option<i32>,
    },
    NoSuchProcess(u32),
    Io(std::io::Error),
}

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetError::Spawn { program, source } => {
                write!(f, "could not start {}: {}", program, source)
            }
            TargetError::ExitedDuringStartup { program, code } => match code {
                Some(code) => write!(f, "{} exited during startup with code {}", program, code),
                None => write!(f, "{} exited during startup", program),
            },
            TargetError::NoSuchProcess(pid) => write!(f, "no such process: {}", pid),
            TargetError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for TargetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TargetError::Spawn { source, .. } => Some(source),
            TargetError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TargetError {
    fn from(e: std::io::Error) -> Self {
        TargetError::Io(e)
    }
}

/// A program launched by the session. It inherits stdin/stdout/stderr and
/// is reaped through non-blocking waits; it is not killed at shutdown.
#[derive(Debug)]
pub struct ManagedChild {
    program: String,
    child: Child,
}

impl ManagedChild {
    /// Launches `program` and fails if it is gone after `grace`.
    pub fn spawn(program: &str, args: &[String], grace: Duration) -> Result<Self, TargetError> {
        let child = Command::new(program)
            .args(args)
            .spawn()
            .map_err(|source| TargetError::Spawn {
                program: program.to_string(),
                source,
            })?;
        let mut target = Self {
            program: program.to_string(),
            child,
        };
        debug!("launched {} as pid {}", program, target.pid());

        thread::sleep(grace);
        if let Liveness::Exited(code) = target.probe()? {
            return Err(TargetError::ExitedDuringStartup {
                program: program.to_string(),
                code,
            });
        }
        Ok(target)
    }
}

impl Target for ManagedChild {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn probe(&mut self) -> Result<Liveness, TargetError> {
        Ok(match self.child.try_wait()? {
            Some(status) => Liveness::Exited(status.code()),
            None => Liveness::Alive,
        })
    }

    fn describe(&self) -> String {
        format!("{} (pid {})", self.program, self.child.id())
    }
}

/// An existing process followed read-only through `/proc/<pid>/stat`.
/// A missing entry or a zombie counts as exited.
pub struct AttachedProcess<F: FileSystem> {
    fs: F,
    pid: u32,
    stat_path: PathBuf,
}

impl<F: FileSystem> AttachedProcess<F> {
    pub fn attach(fs: F, proc_root: &str, pid: u32) -> Result<Self, TargetError> {
        let mut target = Self {
            fs,
            pid,
            stat_path: PathBuf::from(proc_root).join(pid.to_string()).join("stat"),
        };
        match target.probe()? {
            Liveness::Alive => Ok(target),
            Liveness::Exited(_) => Err(TargetError::NoSuchProcess(pid)),
        }
    }
}

impl<F: FileSystem> Target for AttachedProcess<F> {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn probe(&mut self) -> Result<Liveness, TargetError> {
        let content = match self.fs.read_to_string(&self.stat_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Liveness::Exited(None));
            }
            Err(e) => return Err(e.into()),
        };
        let stat = parse_proc_stat(&content).map_err(|e| {
            TargetError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e.message,
            ))
        })?;
        Ok(if stat.is_defunct() {
            Liveness::Exited(None)
        } else {
            Liveness::Alive
        })
    }

    fn describe(&self) -> String {
        format!("pid {}", self.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfs::MockFs;
    use crate::procfs::mock::stat_line;

    const ROOT: &str = "/mockproc";

    #[test]
    fn test_attach_to_running_process() {
        let fs = MockFs::new();
        fs.add_process(ROOT, 77, &stat_line(77, "app", 'S', 0, 0, 0, 0), "Name:\tapp\n");

        let mut target = AttachedProcess::attach(fs.clone(), ROOT, 77).unwrap();
        assert_eq!(target.pid(), 77);
        assert_eq!(target.probe().unwrap(), Liveness::Alive);

        fs.remove(format!("{}/77", ROOT));
        assert_eq!(target.probe().unwrap(), Liveness::Exited(None));
    }

    #[test]
    fn test_attach_to_missing_process_fails() {
        let fs = MockFs::new();
        assert!(matches!(
            AttachedProcess::attach(fs, ROOT, 12345),
            Err(TargetError::NoSuchProcess(12345))
        ));
    }

    #[test]
    fn test_zombie_counts_as_exited() {
        let fs = MockFs::new();
        fs.add_process(ROOT, 5, &stat_line(5, "app", 'S', 0, 0, 0, 0), "Name:\tapp\n");
        let mut target = AttachedProcess::attach(fs.clone(), ROOT, 5).unwrap();

        fs.add_file(format!("{}/5/stat", ROOT), stat_line(5, "app", 'Z', 0, 0, 0, 0));
        assert_eq!(target.probe().unwrap(), Liveness::Exited(None));
    }

    #[cfg(unix)]
    #[test]
    fn test_managed_child_exit_is_observed() {
        let mut target = ManagedChild::spawn(
            "sh",
            &["-c".to_string(), "sleep 0.2; exit 3".to_string()],
            STARTUP_GRACE,
        )
        .unwrap();
        assert_eq!(target.probe().unwrap(), Liveness::Alive);

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            match target.probe().unwrap() {
                Liveness::Exited(code) => {
                    assert_eq!(code, Some(3));
                    break;
                }
                Liveness::Alive => {
                    assert!(std::time::Instant::now() < deadline);
                    thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_managed_child_that_exits_at_once_fails_startup() {
        let err = ManagedChild::spawn("true", &[], Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, TargetError::ExitedDuringStartup { code: Some(0), .. }));
    }

    #[test]
    fn test_missing_program_fails_to_spawn() {
        let err = ManagedChild::spawn("promon-no-such-program", &[], STARTUP_GRACE).unwrap_err();
        assert!(matches!(err, TargetError::Spawn { .. }));
    }
}
