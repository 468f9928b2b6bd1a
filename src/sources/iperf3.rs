//! `iperf3`: periodic throughput tests against an iperf3 server.
//!
//! Unlike the streaming tools, iperf3 is run to completion once per cycle;
//! its JSON report becomes one row, then the sampler sleeps before the next
//! test.

use serde::Deserialize;
use std::io::Read;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, warn};

use super::tool::{ChildSlot, TraceFile};
use crate::module::{
    Module, ModuleError, ModuleParams, Row, SampleContext, Sampler, Source, SourceModule,
};

pub const NAME: &str = "iperf3";
pub const SUMMARY: &str = "network throughput and host CPU from repeated iperf3 client runs";
pub const LABELS: &[&str] = &[
    "time",
    "bps_sent",
    "bps_received",
    "cpu_total",
    "cpu_user",
    "cpu_system",
];
pub const WIDTHS: &[usize] = &[10, 12, 12, 10, 10, 10];
pub const HELP: &str = "Module usage:\n\
-m iperf3 [-p PREFIX] [-c time] [-c bps_sent] [-c bps_received] \
[-c cpu_total] [-c cpu_user] [-c cpu_system] \
[-o SERVER [-o PORT [-o TIME [-o SLEEP [-o OMIT [-o JSONFILE]]]]]]\n\n\
Columns:\n\
time: UNIX timestamp when the test finished\n\
bps_sent: sending bit rate (bit/s)\n\
bps_received: receiving bit rate (bit/s)\n\
cpu_total: total CPU usage (%)\n\
cpu_user: user CPU usage (%)\n\
cpu_system: system CPU usage (%)\n\n\
Options and defaults:\n\
SERVER = localhost -- the iperf3 server to connect to\n\
PORT = 5201 -- the port the server listens on\n\
TIME = 5 -- duration of each test (seconds)\n\
SLEEP = 10 -- pause between two tests (seconds)\n\
OMIT = 0 -- omit the first OMIT seconds of each test from the statistics\n\
JSONFILE -- if set, writes the raw iperf3 JSON output to JSONFILE";

const PROGRAM: &str = "iperf3";

pub fn create() -> Box<dyn Module> {
    SourceModule::boxed(Iperf3Source)
}

pub struct Iperf3Source;

impl Source for Iperf3Source {
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
        let options = IperfOptions::from_params(params)?;
        let mut trace = TraceFile::open(params.option(5), 5)?;

        let slot = ChildSlot::new();
        let first = slot.spawn(PROGRAM, &mut options.command())?;

        Ok(Box::new(move |ctx: SampleContext| {
            slot.kill_on(ctx.stop_signal());
            let mut pending = Some(first);

            loop {
                let mut stdout = match pending.take() {
                    Some(stdout) => stdout,
                    None => slot.spawn(PROGRAM, &mut options.command())?,
                };
                let mut raw = Vec::new();
                stdout.read_to_end(&mut raw)?;
                let status = slot.wait()?;
                debug!("iperf3: run finished with {:?}", status);

                if ctx.is_stopping() {
                    return Ok(());
                }

                let output = String::from_utf8_lossy(&raw);
                if let Some(trace) = trace.as_mut() {
                    trace.write_all(&output)?;
                    trace.flush()?;
                }
                if let Some(row) = parse_report(&output)? {
                    ctx.push(row);
                }

                if ctx.sleep(options.sleep) {
                    return Ok(());
                }
            }
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct IperfOptions {
    server: String,
    port: String,
    time: String,
    sleep: Duration,
    omit: String,
}

impl IperfOptions {
    fn from_params(params: &ModuleParams) -> Result<Self, ModuleError> {
        let numeric = |index: usize, default: &str| -> Result<String, ModuleError> {
            let value = params.option(index).unwrap_or(default);
            value
                .parse::<u64>()
                .map(|_| value.to_string())
                .map_err(|_| ModuleError::InvalidOption {
                    index,
                    value: value.to_string(),
                    reason: "expected a non-negative integer".to_string(),
                })
        };

        let sleep_secs = numeric(3, "10")?.parse::<u64>().unwrap_or(10);
        Ok(Self {
            server: params.option(0).unwrap_or("localhost").to_string(),
            port: numeric(1, "5201")?,
            time: numeric(2, "5")?,
            sleep: Duration::from_secs(sleep_secs),
            omit: numeric(4, "0")?,
        })
    }

    fn command(&self) -> Command {
        let mut command = Command::new(PROGRAM);
        command
            .args(["-c", self.server.as_str()])
            .args(["-p", self.port.as_str()])
            .arg("-J")
            .args(["-t", self.time.as_str()])
            .args(["-O", self.omit.as_str()])
            .args(["-i", "0"]);
        command
    }
}

/// Only `error` is inspected before `end` is decoded: failed runs still
/// carry an (empty) `end` object.
#[derive(Debug, Deserialize)]
struct Report {
    error: Option<String>,
    end: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct End {
    sum_sent: Sum,
    sum_received: Sum,
    cpu_utilization_percent: CpuUtilization,
}

#[derive(Debug, Deserialize)]
struct Sum {
    bits_per_second: f64,
}

#[derive(Debug, Deserialize)]
struct CpuUtilization {
    host_total: f64,
    host_user: f64,
    host_system: f64,
}

/// Turns one iperf3 JSON report into a row.
///
/// A report carrying an `error` member yields no row. Anything that is not
/// a usable report is a parse error and ends the sampler.
fn parse_report(output: &str) -> Result<Option<Row>, ModuleError> {
    let report: Report = serde_json::from_str(output.trim())
        .map_err(|e| ModuleError::Parse(format!("iperf3 JSON: {}", e)))?;

    if let Some(error) = report.error {
        warn!("iperf3: {}", error);
        return Ok(None);
    }
    let end = report
        .end
        .ok_or_else(|| ModuleError::Parse("iperf3 JSON: missing 'end' section".to_string()))?;
    let end: End = serde_json::from_value(end)
        .map_err(|e| ModuleError::Parse(format!("iperf3 JSON 'end': {}", e)))?;

    Ok(Some(vec![
        SampleContext::timestamp(),
        (end.sum_sent.bits_per_second as i64).to_string(),
        (end.sum_received.bits_per_second as i64).to_string(),
        format!("{:.6}", end.cpu_utilization_percent.host_total),
        format!("{:.6}", end.cpu_utilization_percent.host_user),
        format!("{:.6}", end.cpu_utilization_percent.host_system),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "start": {"version": "iperf 3.9"},
        "intervals": [],
        "end": {
            "sum_sent": {"bytes": 1000, "bits_per_second": 9412345678.9},
            "sum_received": {"bytes": 1000, "bits_per_second": 9400000000.2},
            "cpu_utilization_percent": {
                "host_total": 42.5,
                "host_user": 2.25,
                "host_system": 40.25,
                "remote_total": 10.0
            }
        }
    }"#;

    #[test]
    fn test_parse_report() {
        let row = parse_report(REPORT).unwrap().unwrap();
        assert_eq!(
            &row[1..],
            &["9412345678", "9400000000", "42.500000", "2.250000", "40.250000"]
        );
    }

    #[test]
    fn test_parse_error_report_yields_no_row() {
        let output = r#"{"start": {}, "intervals": [], "end": {}, "error": "unable to connect to server: Connection refused"}"#;
        assert!(parse_report(output).unwrap().is_none());
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(matches!(
            parse_report("iperf3: error - unable to connect"),
            Err(ModuleError::Parse(_))
        ));
        assert!(matches!(parse_report(""), Err(ModuleError::Parse(_))));
    }

    #[test]
    fn test_parse_missing_end_is_error() {
        assert!(matches!(
            parse_report(r#"{"start": {}}"#),
            Err(ModuleError::Parse(_))
        ));
    }

    #[test]
    fn test_options_defaults() {
        let options = IperfOptions::from_params(&ModuleParams::default()).unwrap();
        assert_eq!(options.server, "localhost");
        assert_eq!(options.port, "5201");
        assert_eq!(options.time, "5");
        assert_eq!(options.sleep, Duration::from_secs(10));
        assert_eq!(options.omit, "0");
    }

    #[test]
    fn test_options_override_and_validate() {
        let params = ModuleParams {
            options: vec![
                "iperf.example".to_string(),
                "5300".to_string(),
                String::new(),
                "2".to_string(),
            ],
            ..ModuleParams::default()
        };
        let options = IperfOptions::from_params(&params).unwrap();
        assert_eq!(options.server, "iperf.example");
        assert_eq!(options.port, "5300");
        assert_eq!(options.time, "5");
        assert_eq!(options.sleep, Duration::from_secs(2));

        let params = ModuleParams {
            options: vec!["host".to_string(), "http".to_string()],
            ..ModuleParams::default()
        };
        assert!(matches!(
            IperfOptions::from_params(&params),
            Err(ModuleError::InvalidOption { index: 1, .. })
        ));
    }

    #[test]
    fn test_command_line() {
        let options = IperfOptions::from_params(&ModuleParams::default()).unwrap();
        let command = options.command();
        let args: Vec<_> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["-c", "localhost", "-p", "5201", "-J", "-t", "5", "-O", "0", "-i", "0"]
        );
    }
}
