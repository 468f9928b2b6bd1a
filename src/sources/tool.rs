//! Plumbing shared by the sources that wrap an external tool.
//!
//! The tool runs as a child process with its stdout piped back to the
//! sampler. The child lives in a [`ChildSlot`] so that a stop request can
//! kill it from another thread; killing it closes the pipe, which unblocks
//! the sampler's read.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Arc;

use tracing::debug;

use crate::module::{ModuleError, StopSignal};

#[derive(Default)]
struct SlotState {
    child: Option<Child>,
    closed: bool,
}

impl SlotState {
    fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            // Already-exited children report Ok or InvalidInput; neither matters here.
            let _ = child.kill();
        }
    }
}

impl Drop for SlotState {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// The currently running tool process of one sampler, if any.
#[derive(Clone, Default)]
pub struct ChildSlot {
    state: Arc<Mutex<SlotState>>,
}

impl ChildSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launches `command` with stdout piped and stores the child.
    ///
    /// If the slot was already closed by a stop request, the new child is
    /// killed right away; its stdout then reads as end-of-file.
    pub fn spawn(&self, program: &str, command: &mut Command) -> Result<ChildStdout, ModuleError> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ModuleError::Spawn {
                program: program.to_string(),
                source,
            })?;
        let stdout = child.stdout.take().ok_or_else(|| ModuleError::Spawn {
            program: program.to_string(),
            source: io::Error::other("stdout was not captured"),
        })?;
        debug!("{}: started (pid {})", program, child.id());

        let mut state = self.state.lock();
        if let Some(mut previous) = state.child.take() {
            let _ = previous.kill();
            let _ = previous.wait();
        }
        state.child = Some(child);
        if state.closed {
            state.kill();
        }
        Ok(stdout)
    }

    /// Reaps the current child. Call after its stdout reached end-of-file.
    pub fn wait(&self) -> io::Result<Option<ExitStatus>> {
        let child = self.state.lock().child.take();
        match child {
            Some(mut child) => child.wait().map(Some),
            None => Ok(None),
        }
    }

    /// Kills the current child and every later one when `stop` fires.
    pub fn kill_on(&self, stop: &StopSignal) {
        let state = self.state.clone();
        stop.on_trigger(move || {
            let mut state = state.lock();
            state.closed = true;
            state.kill();
        });
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// Optional raw-output copy requested through a module option.
pub struct TraceFile {
    out: BufWriter<File>,
}

impl TraceFile {
    /// Creates (truncating) the trace file named by option `index`, if set.
    pub fn open(path: Option<&str>, index: usize) -> Result<Option<Self>, ModuleError> {
        let Some(path) = path else {
            return Ok(None);
        };
        let file = File::create(path).map_err(|e| ModuleError::InvalidOption {
            index,
            value: path.to_string(),
            reason: format!("trace file could not be opened: {}", e),
        })?;
        Ok(Some(Self {
            out: BufWriter::new(file),
        }))
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")
    }

    pub fn write_all(&mut self, data: &str) -> io::Result<()> {
        self.out.write_all(data.as_bytes())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Reads `reader` line by line, decoding lossily and stripping the line
/// terminator. Stops when `f` returns `false` or at end-of-file.
pub fn for_each_line<R: BufRead>(
    mut reader: R,
    mut f: impl FnMut(&str) -> Result<bool, ModuleError>,
) -> Result<(), ModuleError> {
    let mut raw = Vec::with_capacity(1024);
    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw)? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&raw);
        if !f(line.trim_end_matches(['\n', '\r']))? {
            return Ok(());
        }
    }
}

/// Formats a sampling period as a tool `-d` argument.
pub fn delay_arg(period: std::time::Duration) -> String {
    if period.subsec_nanos() == 0 {
        period.as_secs().to_string()
    } else {
        format!("{}", period.as_secs_f64())
    }
}
