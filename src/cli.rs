//! Command-line interface of the `promon` binary.
//!
//! `-p`, `-c` and `-o` are positional with respect to `-m`: each applies to
//! the nearest `-m` before it. clap collects them into flat vectors, so the
//! grouping is recovered from the argument indices in [`ArgMatches`].

use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use std::path::PathBuf;

use crate::aggregate::MergeMode;
use crate::config::{
    ConfigError, DEFAULT_INTERVAL_SECS, Interval, ModuleSpec, SessionConfig, TargetSpec,
};
use crate::module::Retention;

/// Process monitor that merges several measurement sources into one table.
#[derive(Parser, Debug)]
#[command(
    name = "promon",
    version,
    about = "Process monitor that merges several measurement sources into one table",
    after_help = "Per-module flags (-p, -c, -o) apply to the nearest preceding -m.\n\
                  Use --list-modules to see the available modules.",
    args_override_self = true,
    arg_required_else_help = true
)]
pub struct Args {
    /// Add a measurement module (repeatable).
    #[arg(short = 'm', long = "module", value_name = "MODULE")]
    pub modules: Vec<String>,

    /// Header prefix for the preceding module (default: its index).
    #[arg(short = 'p', long = "prefix", value_name = "PREFIX")]
    pub prefixes: Vec<String>,

    /// Select a column of the preceding module (repeatable; default: all).
    #[arg(short = 'c', long = "column", value_name = "COLUMN")]
    pub columns: Vec<String>,

    /// Pass an option to the preceding module (repeatable, positional).
    #[arg(
        short = 'o',
        long = "option",
        value_name = "OPTION",
        allow_hyphen_values = true
    )]
    pub options: Vec<String>,

    /// Sampling interval in seconds.
    #[arg(short = 'i', long = "interval", value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// Sampling interval in microseconds (modules sample every second).
    #[arg(short = 'I', long = "interval-micros", value_name = "MICROS")]
    pub interval_micros: Option<u64>,

    /// Write the table to FILE instead of stdout.
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Align rows on the timestamp in each module's first column.
    #[arg(short = 'a', long = "align")]
    pub align: bool,

    /// Keep only the newest N rows per module (default: keep all).
    #[arg(long = "max-rows", value_name = "N")]
    pub max_rows: Option<usize>,

    /// Monitor an already running process.
    #[arg(short = 'P', long = "pid", value_name = "PID")]
    pub pid: Option<u32>,

    /// Print the usage of a module and exit.
    #[arg(long = "help-module", value_name = "MODULE")]
    pub help_module: Option<String>,

    /// List the available modules and exit.
    #[arg(long = "list-modules")]
    pub list_modules: bool,

    /// Increase logging verbosity (-v info, -vv debug, -vvv trace). Default is warn.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Program to launch and monitor, with its arguments.
    #[arg(
        value_name = "PROGRAM",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub program: Vec<String>,
}

/// Parses `argv` into typed arguments plus the raw matches needed for
/// per-module grouping.
pub fn parse_from<I, T>(argv: I) -> Result<(Args, ArgMatches), clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = Args::command().try_get_matches_from(argv)?;
    let args = Args::from_arg_matches(&matches)?;
    Ok((args, matches))
}

/// Builds and validates the session configuration.
pub fn session_config(args: &Args, matches: &ArgMatches) -> Result<SessionConfig, ConfigError> {
    let target = match (args.pid, args.program.split_first()) {
        (Some(_), Some(_)) => return Err(ConfigError::ConflictingTarget),
        (Some(pid), None) => TargetSpec::Attach(pid),
        (None, Some((program, rest))) => TargetSpec::Launch {
            program: program.clone(),
            args: rest.to_vec(),
        },
        (None, None) => return Err(ConfigError::MissingTarget),
    };

    let mut config = SessionConfig::new(target);
    config.modules = group_modules(args, matches)?;
    config.interval = interval(args, matches);
    config.output = args.output.clone();
    config.merge = if args.align {
        MergeMode::Aligned
    } else {
        MergeMode::Direct
    };
    config.retention = match args.max_rows {
        Some(rows) => Retention::Latest(rows),
        None => Retention::Unbounded,
    };
    config.validate()?;
    Ok(config)
}

/// The later of `-i` and `-I` wins.
fn interval(args: &Args, matches: &ArgMatches) -> Interval {
    match (args.interval, args.interval_micros) {
        (Some(secs), Some(micros)) => {
            if matches.index_of("interval_micros") > matches.index_of("interval") {
                Interval::Micros(micros)
            } else {
                Interval::Seconds(secs)
            }
        }
        (Some(secs), None) => Interval::Seconds(secs),
        (None, Some(micros)) => Interval::Micros(micros),
        (None, None) => Interval::Seconds(DEFAULT_INTERVAL_SECS),
    }
}

fn group_modules(args: &Args, matches: &ArgMatches) -> Result<Vec<ModuleSpec>, ConfigError> {
    let module_at: Vec<usize> = indices(matches, "modules");
    let mut specs: Vec<ModuleSpec> = args.modules.iter().map(ModuleSpec::new).collect();

    // Index of the module that owns the flag at argument position `at`.
    let owner = |at: usize, flag: &'static str| -> Result<usize, ConfigError> {
        module_at
            .iter()
            .rposition(|&m| m < at)
            .ok_or(ConfigError::OptionBeforeModule(flag))
    };

    for (value, at) in args.prefixes.iter().zip(indices(matches, "prefixes")) {
        specs[owner(at, "-p")?].prefix = Some(value.clone());
    }
    for (value, at) in args.columns.iter().zip(indices(matches, "columns")) {
        specs[owner(at, "-c")?].columns.push(value.clone());
    }
    for (value, at) in args.options.iter().zip(indices(matches, "options")) {
        specs[owner(at, "-o")?].options.push(value.clone());
    }
    Ok(specs)
}

fn indices(matches: &ArgMatches, id: &str) -> Vec<usize> {
    matches
        .indices_of(id)
        .map(|it| it.collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_config(argv: &[&str]) -> Result<SessionConfig, ConfigError> {
        let (args, matches) = parse_from(argv).unwrap();
        session_config(&args, &matches)
    }

    #[test]
    fn test_verify_cli() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_module_flags_attach_to_preceding_module() {
        let config = parse_config(&[
            "promon", "-m", "top", "-c", "pcpu", "-o", "/tmp/top.trace", "-m", "nethogs", "-p",
            "net", "-o", "eth0", "-c", "sent", "-c", "received", "-P", "42",
        ])
        .unwrap();

        assert_eq!(config.modules.len(), 2);
        assert_eq!(config.modules[0].name, "top");
        assert_eq!(config.modules[0].prefix, None);
        assert_eq!(config.modules[0].columns, vec!["pcpu"]);
        assert_eq!(config.modules[0].options, vec!["/tmp/top.trace"]);

        assert_eq!(config.modules[1].name, "nethogs");
        assert_eq!(config.modules[1].prefix.as_deref(), Some("net"));
        assert_eq!(config.modules[1].columns, vec!["sent", "received"]);
        assert_eq!(config.modules[1].options, vec!["eth0"]);

        assert_eq!(config.target, TargetSpec::Attach(42));
        assert_eq!(config.interval, Interval::Seconds(10));
        assert_eq!(config.merge, MergeMode::Direct);
        assert_eq!(config.retention, Retention::Unbounded);
    }

    #[test]
    fn test_same_module_twice() {
        let config = parse_config(&[
            "promon", "-m", "top", "-o", "a.trace", "-m", "top", "-o", "b.trace", "-P", "1",
        ])
        .unwrap();
        assert_eq!(config.modules[0].options, vec!["a.trace"]);
        assert_eq!(config.modules[1].options, vec!["b.trace"]);
    }

    #[test]
    fn test_flag_before_any_module_is_rejected() {
        let err = parse_config(&["promon", "-c", "pcpu", "-m", "top", "-P", "1"]).unwrap_err();
        assert!(matches!(err, ConfigError::OptionBeforeModule("-c")));
    }

    #[test]
    fn test_program_with_its_own_flags() {
        let config = parse_config(&[
            "promon", "-m", "procstat", "-i", "2", "./bench", "-i", "5", "--fast",
        ])
        .unwrap();
        assert_eq!(
            config.target,
            TargetSpec::Launch {
                program: "./bench".to_string(),
                args: vec!["-i".to_string(), "5".to_string(), "--fast".to_string()],
            }
        );
        assert_eq!(config.interval, Interval::Seconds(2));
    }

    #[test]
    fn test_option_value_may_start_with_dash() {
        let config = parse_config(&["promon", "-m", "iperf3", "-o", "-1", "-P", "3"]).unwrap();
        assert_eq!(config.modules[0].options, vec!["-1"]);
    }

    #[test]
    fn test_last_interval_wins() {
        let config = parse_config(&["promon", "-m", "top", "-i", "5", "-I", "500", "-P", "1"]).unwrap();
        assert_eq!(config.interval, Interval::Micros(500));

        let config = parse_config(&["promon", "-m", "top", "-I", "500", "-i", "5", "-P", "1"]).unwrap();
        assert_eq!(config.interval, Interval::Seconds(5));

        let config = parse_config(&["promon", "-m", "top", "-i", "5", "-i", "7", "-P", "1"]).unwrap();
        assert_eq!(config.interval, Interval::Seconds(7));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let err = parse_config(&["promon", "-m", "top", "-i", "0", "-P", "1"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInterval { flag: "-i", .. }));
    }

    #[test]
    fn test_huge_interval_is_rejected() {
        let err = parse_config(&["promon", "-m", "top", "-i", "18446744073709551615", "-P", "1"])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInterval { flag: "-i", .. }));

        let err = parse_config(&["promon", "-m", "top", "-I", "18446744073709551615", "-P", "1"])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInterval { flag: "-I", .. }));
    }

    #[test]
    fn test_target_is_required_and_exclusive() {
        assert!(matches!(
            parse_config(&["promon", "-m", "top"]).unwrap_err(),
            ConfigError::MissingTarget
        ));
        assert!(matches!(
            parse_config(&["promon", "-m", "top", "-P", "1", "./prog"]).unwrap_err(),
            ConfigError::ConflictingTarget
        ));
    }

    #[test]
    fn test_align_file_and_retention() {
        let config = parse_config(&[
            "promon", "-m", "top", "-a", "-f", "out.txt", "--max-rows", "100", "-P", "1",
        ])
        .unwrap();
        assert_eq!(config.merge, MergeMode::Aligned);
        assert_eq!(config.output, Some(PathBuf::from("out.txt")));
        assert_eq!(config.retention, Retention::Latest(100));
    }

    #[test]
    fn test_logging_flags() {
        let (args, _) = parse_from(["promon", "-vv", "-m", "top", "-P", "1"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert!(!args.quiet);
    }

    #[test]
    fn test_no_arguments_shows_help() {
        let err = parse_from(["promon"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn test_list_modules_needs_no_target() {
        let (args, _) = parse_from(["promon", "--list-modules"]).unwrap();
        assert!(args.list_modules);
        let (args, _) = parse_from(["promon", "--help-module", "top"]).unwrap();
        assert_eq!(args.help_module.as_deref(), Some("top"));
    }
}
