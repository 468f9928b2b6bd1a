//! `nethogs`: per-process network throughput from `nethogs -t`.

use std::io::BufReader;
use std::process::Command;

use tracing::debug;

use super::tool::{ChildSlot, TraceFile, for_each_line};
use crate::module::{
    Module, ModuleError, ModuleParams, SampleContext, Sampler, Source, SourceModule,
};

pub const NAME: &str = "nethogs";
pub const SUMMARY: &str = "per-process network send/receive rates from nethogs";
pub const LABELS: &[&str] = &["time", "sent", "received"];
pub const WIDTHS: &[usize] = &[10, 10, 10];
pub const HELP: &str = "Module usage:\n\
-m nethogs [-p PREFIX] [-c time] [-c sent] [-c received] \
[-o IFACE [-o TRACEFILE]]\n\n\
Columns:\n\
time: UNIX timestamp when the snapshot was taken\n\
sent: sending rate (KiB/s)\n\
received: receiving rate (KiB/s)\n\n\
nethogs must run as root, so promon needs to run as root as well.\n\n\
Options and defaults:\n\
IFACE -- network interface nethogs listens on (default: nethogs' choice)\n\
TRACEFILE -- if set, writes the raw nethogs trace to TRACEFILE";

const PROGRAM: &str = "nethogs";

pub fn create() -> Box<dyn Module> {
    SourceModule::boxed(NethogsSource)
}

pub struct NethogsSource;

impl Source for NethogsSource {
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
        let mut trace = TraceFile::open(params.option(1), 1)?;

        let slot = ChildSlot::new();
        let mut command = Command::new(PROGRAM);
        command
            .env("COLUMNS", "998")
            .env("LINES", "50")
            .env("LC_NUMERIC", "en_US");
        if let Some(iface) = params.option(0) {
            command.arg(iface);
        }
        command
            .arg("-d")
            .arg(params.interval.max(1).to_string())
            .arg("-t");
        let stdout = slot.spawn(PROGRAM, &mut command)?;

        Ok(Box::new(move |ctx: SampleContext| {
            slot.kill_on(ctx.stop_signal());

            let result = for_each_line(BufReader::new(stdout), |line| {
                if let Some(trace) = trace.as_mut() {
                    trace.write_line(line)?;
                }
                if let Some((sent, received)) = parse_traffic_line(line, pid) {
                    ctx.push(vec![
                        SampleContext::timestamp(),
                        sent.to_string(),
                        received.to_string(),
                    ]);
                }
                Ok(!ctx.is_stopping())
            });

            if let Some(trace) = trace.as_mut() {
                trace.flush()?;
            }
            let status = slot.wait()?;
            debug!("nethogs: exited with {:?}", status);
            result
        }))
    }
}

/// Extracts `(sent, received)` from a trace line of process `pid`.
///
/// Trace lines are `<program>/<pid>/<uid>\t<sent>\t<received>`; the program
/// path may itself contain slashes.
fn parse_traffic_line(line: &str, pid: u32) -> Option<(&str, &str)> {
    let mut fields = line.split('\t').filter(|f| !f.is_empty());
    let program = fields.next()?;
    let sent = fields.next()?.trim();
    let received = fields.next()?.trim();

    let mut parts = program.rsplitn(3, '/');
    let uid = parts.next()?;
    let line_pid = parts.next()?;
    parts.next()?;

    if !uid.chars().all(|c| c.is_ascii_digit()) || uid.is_empty() {
        return None;
    }
    if line_pid.parse::<u32>().ok()? != pid {
        return None;
    }
    if sent.parse::<f64>().is_err() || received.parse::<f64>().is_err() {
        return None;
    }
    Some((sent, received))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_matching_line() {
        let line = "/usr/bin/worker/4242/1000\t12.5\t3.25";
        assert_eq!(parse_traffic_line(line, 4242), Some(("12.5", "3.25")));
    }

    #[test]
    fn test_parse_tolerates_repeated_tabs() {
        let line = "/usr/bin/worker/4242/1000\t\t0\t\t7";
        assert_eq!(parse_traffic_line(line, 4242), Some(("0", "7")));
    }

    #[test]
    fn test_parse_rejects_other_pid() {
        let line = "/usr/bin/worker/42421/1000\t12.5\t3.25";
        assert_eq!(parse_traffic_line(line, 4242), None);
    }

    #[test]
    fn test_parse_rejects_non_traffic_lines() {
        assert_eq!(parse_traffic_line("Refreshing:", 4242), None);
        assert_eq!(parse_traffic_line("", 4242), None);
        assert_eq!(parse_traffic_line("unknown TCP/0/0\t1\t2", 4242), None);
        assert_eq!(
            parse_traffic_line("/usr/bin/worker/4242/1000\tn/a\t2", 4242),
            None
        );
    }
}
