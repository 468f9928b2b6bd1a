//! `procstat`: per-process counters read straight from `/proc/<pid>`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::module::{
    Module, ModuleError, ModuleParams, Row, SampleContext, Sampler, Source, SourceModule,
};
use crate::procfs::parser::{ProcStat, ProcStatus, parse_proc_stat, parse_proc_status};
use crate::procfs::{DEFAULT_PROC_ROOT, FileSystem, RealFs};

/// Clock ticks per second (USER_HZ). Standard value for Linux.
const CLK_TCK: f64 = 100.0;

/// Page size used to convert `rss` pages when `status` is unavailable.
const PAGE_SIZE: u64 = 4096;

pub const NAME: &str = "procstat";
pub const SUMMARY: &str = "per-process CPU, thread and memory counters from /proc";
pub const LABELS: &[&str] = &[
    "time", "state", "threads", "utime", "stime", "pcpu", "vsize", "rss",
];
pub const WIDTHS: &[usize] = &[10, 5, 7, 10, 10, 6, 12, 12];
pub const HELP: &str = "Module usage:\n\
-m procstat [-p PREFIX] [-c time] [-c state] [-c threads] [-c utime] [-c stime] \
[-c pcpu] [-c vsize] [-c rss] [-o PROC_ROOT]\n\n\
Columns:\n\
time: UNIX timestamp when the sample was taken\n\
state: process state letter (R, S, D, ...)\n\
threads: number of threads\n\
utime: user CPU time (clock ticks)\n\
stime: system CPU time (clock ticks)\n\
pcpu: CPU usage since the previous sample (%)\n\
vsize: virtual memory size (KiB)\n\
rss: resident set size (KiB)\n\n\
Options and defaults:\n\
PROC_ROOT = /proc -- mount point of the proc filesystem\n\n\
The first row is written one interval after start. The module stops when \
the process disappears.";

pub fn create() -> Box<dyn Module> {
    SourceModule::boxed(ProcStatSource::new())
}

pub struct ProcStatSource {
    fs: Arc<dyn FileSystem>,
}

impl Default for ProcStatSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcStatSource {
    pub fn new() -> Self {
        Self::with_fs(Arc::new(RealFs::new()))
    }

    pub fn with_fs(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }
}

impl Source for ProcStatSource {
    fn kind(&self) -> &'static str {
        NAME
    }

    fn labels(&self) -> &'static [&'static str] {
        LABELS
    }

    fn widths(&self) -> &'static [usize] {
        WIDTHS
    }

    fn prepare(&mut self, params: &ModuleParams) -> Result<Box<dyn Sampler>, ModuleError> {
        let pid = params.pid_number()?;
        let root = params.option(0).unwrap_or(DEFAULT_PROC_ROOT);
        let reader = ProcessReader::new(self.fs.clone(), root, pid);

        let baseline = reader.read()?.ok_or_else(|| {
            ModuleError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("process {} not found under {}", pid, root),
            ))
        })?;
        debug!(
            "procstat: watching pid {} ({}) under {}",
            pid, baseline.stat.comm, root
        );

        Ok(Box::new(move |ctx: SampleContext| {
            let mut previous = baseline;
            let period = ctx.params().period();
            loop {
                if ctx.sleep(period) {
                    return Ok(());
                }
                let Some(current) = reader.read()? else {
                    info!("procstat: process {} is gone", pid);
                    return Ok(());
                };
                ctx.push(format_row(&current, &previous));
                previous = current;
            }
        }))
    }
}

struct ProcessSample {
    stat: ProcStat,
    status: Option<ProcStatus>,
    taken: Instant,
}

struct ProcessReader {
    fs: Arc<dyn FileSystem>,
    stat_path: PathBuf,
    status_path: PathBuf,
}

impl ProcessReader {
    fn new(fs: Arc<dyn FileSystem>, root: &str, pid: u32) -> Self {
        let base = PathBuf::from(root).join(pid.to_string());
        Self {
            fs,
            stat_path: base.join("stat"),
            status_path: base.join("status"),
        }
    }

    /// `None` once the process no longer exists or is a zombie.
    fn read(&self) -> Result<Option<ProcessSample>, ModuleError> {
        let taken = Instant::now();
        let content = match self.fs.read_to_string(&self.stat_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stat = parse_proc_stat(&content)?;
        if stat.is_defunct() {
            return Ok(None);
        }
        // status is optional: it can vanish between the two reads.
        let status = self
            .fs
            .read_to_string(&self.status_path)
            .ok()
            .and_then(|content| parse_proc_status(&content).ok());

        Ok(Some(ProcessSample {
            stat,
            status,
            taken,
        }))
    }
}

/// CPU share in percent for `delta_ticks` of CPU time spent over `elapsed`.
fn cpu_percent(delta_ticks: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    delta_ticks as f64 / CLK_TCK / secs * 100.0
}

fn format_row(current: &ProcessSample, previous: &ProcessSample) -> Row {
    let stat = &current.stat;
    let ticks = stat.utime + stat.stime;
    let previous_ticks = previous.stat.utime + previous.stat.stime;
    let pcpu = cpu_percent(
        ticks.saturating_sub(previous_ticks),
        current.taken.saturating_duration_since(previous.taken),
    );

    let (vsize, rss) = match &current.status {
        Some(status) if status.vm_size > 0 => (status.vm_size, status.vm_rss),
        _ => (
            stat.vsize / 1024,
            (stat.rss.max(0) as u64) * PAGE_SIZE / 1024,
        ),
    };

    vec![
        SampleContext::timestamp(),
        stat.state.to_string(),
        stat.num_threads.to_string(),
        stat.utime.to_string(),
        stat.stime.to_string(),
        format!("{:.1}", pcpu),
        vsize.to_string(),
        rss.to_string(),
    ]
}
