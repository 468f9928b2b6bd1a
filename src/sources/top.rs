//! `top`: memory and CPU figures of one process as reported by `top -b`.

use std::io::BufReader;
use std::process::Command;

use tracing::{debug, trace};

use super::tool::{ChildSlot, TraceFile, delay_arg, for_each_line};
use crate::module::{
    Module, ModuleError, ModuleParams, Row, SampleContext, Sampler, Source, SourceModule,
};

pub const NAME: &str = "top";
pub const SUMMARY: &str = "process memory and CPU as reported by top in batch mode";
pub const LABELS: &[&str] = &["time", "virt", "res", "shr", "pcpu", "pmem"];
pub const WIDTHS: &[usize] = &[10, 15, 15, 15, 5, 5];
pub const HELP: &str = "Module usage:\n\
-m top [-p PREFIX] [-c time] [-c virt] [-c res] [-c shr] [-c pcpu] [-c pmem] \
[-o TRACEFILE]\n\n\
Columns:\n\
time: UNIX timestamp when the snapshot was taken\n\
virt: virtual memory usage (KiB)\n\
res: resident memory usage (KiB)\n\
shr: shared memory usage (KiB)\n\
pcpu: CPU usage (%)\n\
pmem: resident memory usage (%)\n\n\
Options and defaults:\n\
TRACEFILE -- if set, writes the raw batch output of top to TRACEFILE";

const PROGRAM: &str = "top";

pub fn create() -> Box<dyn Module> {
    SourceModule::boxed(TopSource)
}

pub struct TopSource;

impl Source for TopSource {
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
        let mut trace = TraceFile::open(params.option(0), 0)?;

        let slot = ChildSlot::new();
        let mut command = Command::new(PROGRAM);
        command
            .env("COLUMNS", "998")
            .env("LINES", "50")
            .env("LC_NUMERIC", "en_US")
            .arg("-b")
            .arg("-d")
            .arg(delay_arg(params.period()))
            .arg("-p")
            .arg(pid.to_string());
        let stdout = slot.spawn(PROGRAM, &mut command)?;

        Ok(Box::new(move |ctx: SampleContext| {
            slot.kill_on(ctx.stop_signal());
            let mut parser = TopParser::new(pid);

            let result = for_each_line(BufReader::new(stdout), |line| {
                if let Some(trace) = trace.as_mut() {
                    trace.write_line(line)?;
                }
                if let Some(row) = parser.feed(line) {
                    ctx.push(row);
                }
                Ok(!ctx.is_stopping())
            });

            if let Some(trace) = trace.as_mut() {
                trace.flush()?;
            }
            let status = slot.wait()?;
            debug!("top: exited with {:?}", status);
            result
        }))
    }
}

/// Picks the monitored process line out of `top -b` frames.
///
/// Every frame carries a column header starting with `PID`; the line right
/// after it is the process line when `top` runs with `-p`.
struct TopParser {
    pid: String,
    after_header: bool,
}

impl TopParser {
    fn new(pid: u32) -> Self {
        Self {
            pid: pid.to_string(),
            after_header: false,
        }
    }

    fn feed(&mut self, line: &str) -> Option<Row> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.first() == Some(&"PID") {
            self.after_header = true;
            return None;
        }
        if !std::mem::take(&mut self.after_header) {
            return None;
        }
        if fields.len() < 10 || fields[0] != self.pid {
            trace!("top: ignoring line after header: {}", line);
            return None;
        }
        Some(vec![
            SampleContext::timestamp(),
            fields[4].to_string(),
            fields[5].to_string(),
            fields[6].to_string(),
            fields[8].to_string(),
            fields[9].to_string(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: &str = "\
top - 10:00:01 up 1 day,  2:03,  1 user,  load average: 0.10, 0.20, 0.30
Tasks:   1 total,   0 running,   1 sleeping,   0 stopped,   0 zombie
%Cpu(s):  1.0 us,  0.5 sy,  0.0 ni, 98.5 id,  0.0 wa,  0.0 hi,  0.0 si,  0.0 st
MiB Mem :  15907.6 total,   1024.0 free,   4096.0 used,  10787.6 buff/cache
MiB Swap:   2048.0 total,   2048.0 free,      0.0 used.  11000.0 avail Mem

    PID USER      PR  NI    VIRT    RES    SHR S  %CPU  %MEM     TIME+ COMMAND
   4242 alice     20   0  204800  10240   5120 S  12.5   0.1   0:01.23 worker
";

    #[test]
    fn test_parser_extracts_process_line() {
        let mut parser = TopParser::new(4242);
        let rows: Vec<Row> = FRAME.lines().filter_map(|l| parser.feed(l)).collect();

        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][1..], &["204800", "10240", "5120", "12.5", "0.1"]);
        assert!(rows[0][0].parse::<i64>().is_ok());
    }

    #[test]
    fn test_parser_handles_consecutive_frames() {
        let mut parser = TopParser::new(4242);
        let input = format!("{}{}", FRAME, FRAME);
        let rows = input.lines().filter_map(|l| parser.feed(l)).count();
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_parser_ignores_other_pid() {
        let mut parser = TopParser::new(1);
        assert_eq!(FRAME.lines().filter_map(|l| parser.feed(l)).count(), 0);
    }

    #[test]
    fn test_parser_ignores_frame_without_process() {
        let mut parser = TopParser::new(4242);
        let lines = [
            "    PID USER      PR  NI    VIRT    RES    SHR S  %CPU  %MEM     TIME+ COMMAND",
            "",
            "top - 10:00:02 up 1 day",
        ];
        assert_eq!(lines.iter().filter_map(|l| parser.feed(l)).count(), 0);
    }
}
