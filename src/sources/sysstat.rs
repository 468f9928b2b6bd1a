//! `sysstat`: host-wide load, memory and CPU utilisation.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::module::{
    Module, ModuleError, ModuleParams, Row, SampleContext, Sampler, Source, SourceModule,
};
use crate::procfs::parser::{CpuTimes, LoadAvg, MemInfo, parse_cpu_times, parse_loadavg, parse_meminfo};
use crate::procfs::{DEFAULT_PROC_ROOT, FileSystem, RealFs};

pub const NAME: &str = "sysstat";
pub const SUMMARY: &str = "host load average, memory and CPU utilisation from /proc";
pub const LABELS: &[&str] = &[
    "time", "load1", "load5", "load15", "mem_total", "mem_avail", "cpu_busy",
];
pub const WIDTHS: &[usize] = &[10, 6, 6, 6, 12, 12, 8];
pub const HELP: &str = "Module usage:\n\
-m sysstat [-p PREFIX] [-c time] [-c load1] [-c load5] [-c load15] \
[-c mem_total] [-c mem_avail] [-c cpu_busy] [-o PROC_ROOT]\n\n\
Columns:\n\
time: UNIX timestamp when the sample was taken\n\
load1, load5, load15: load averages over 1, 5 and 15 minutes\n\
mem_total: total memory (KiB)\n\
mem_avail: available memory (KiB)\n\
cpu_busy: share of non-idle CPU time since the previous sample (%)\n\n\
Options and defaults:\n\
PROC_ROOT = /proc -- mount point of the proc filesystem\n\n\
The monitored process id is not used by this module.";

pub fn create() -> Box<dyn Module> {
    SourceModule::boxed(SysStatSource::new())
}

pub struct SysStatSource {
    fs: Arc<dyn FileSystem>,
}

impl Default for SysStatSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SysStatSource {
    pub fn new() -> Self {
        Self::with_fs(Arc::new(RealFs::new()))
    }

    pub fn with_fs(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }
}

impl Source for SysStatSource {
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
        let root = params.option(0).unwrap_or(DEFAULT_PROC_ROOT);
        let reader = SystemReader::new(self.fs.clone(), root);
        let baseline = reader.read()?;
        debug!("sysstat: reading {}", root);

        Ok(Box::new(move |ctx: SampleContext| {
            let mut previous = baseline.cpu;
            let period = ctx.params().period();
            loop {
                if ctx.sleep(period) {
                    return Ok(());
                }
                let sample = reader.read()?;
                ctx.push(format_row(&sample, previous));
                previous = sample.cpu;
            }
        }))
    }
}

struct SystemSample {
    load: LoadAvg,
    mem: MemInfo,
    cpu: CpuTimes,
}

struct SystemReader {
    fs: Arc<dyn FileSystem>,
    loadavg: PathBuf,
    meminfo: PathBuf,
    stat: PathBuf,
}

impl SystemReader {
    fn new(fs: Arc<dyn FileSystem>, root: &str) -> Self {
        let root = PathBuf::from(root);
        Self {
            fs,
            loadavg: root.join("loadavg"),
            meminfo: root.join("meminfo"),
            stat: root.join("stat"),
        }
    }

    fn read(&self) -> Result<SystemSample, ModuleError> {
        Ok(SystemSample {
            load: parse_loadavg(&self.fs.read_to_string(&self.loadavg)?)?,
            mem: parse_meminfo(&self.fs.read_to_string(&self.meminfo)?)?,
            cpu: parse_cpu_times(&self.fs.read_to_string(&self.stat)?)?,
        })
    }
}

/// Busy share of the CPU time elapsed between two readings, in percent.
fn busy_percent(current: CpuTimes, previous: CpuTimes) -> f64 {
    let total = current.total.saturating_sub(previous.total);
    if total == 0 {
        return 0.0;
    }
    current.busy.saturating_sub(previous.busy) as f64 / total as f64 * 100.0
}

fn format_row(sample: &SystemSample, previous: CpuTimes) -> Row {
    vec![
        SampleContext::timestamp(),
        format!("{:.2}", sample.load.load1),
        format!("{:.2}", sample.load.load5),
        format!("{:.2}", sample.load.load15),
        sample.mem.mem_total.to_string(),
        sample.mem.mem_available.to_string(),
        format!("{:.1}", busy_percent(sample.cpu, previous)),
    ]
}
