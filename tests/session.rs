//! End-to-end session runs: command line to table file.

use std::path::Path;
use std::time::Duration;

use promon::aggregate::MergeMode;
use promon::cli;
use promon::config::{ConfigError, Interval, ModuleSpec, SessionConfig, TargetSpec};
use promon::module::mock::ManualModule;
use promon::sink::OutputSink;
use promon::sources::builtin_registry;
use promon::supervisor::mock::ScriptedTarget;
use promon::supervisor::{ExitReason, ModuleBinding, Session, SessionError};

fn lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect()
}

fn binding(prefix: &str) -> ModuleBinding {
    ModuleBinding {
        prefix: prefix.to_string(),
        ..ModuleBinding::default()
    }
}

#[test]
fn aligned_session_pairs_rows_by_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("table.txt");
    let target = ScriptedTarget::new(77);
    let mut session = Session::new(
        Box::new(target.clone()),
        OutputSink::file(&out).unwrap(),
        Interval::Seconds(1),
    )
    .with_merge_mode(MergeMode::Aligned);

    let fast = ManualModule::new("fast", &["time", "v"]);
    let slow = ManualModule::new("slow", &["time", "w"]);
    let fast_handle = fast.handle();
    let slow_handle = slow.handle();
    session.add_module(Box::new(fast), binding("f:"));
    session.add_module(Box::new(slow), binding("s:"));
    session.start().unwrap();

    fast_handle.push(&["100", "1"]);
    fast_handle.push(&["101", "2"]);
    slow_handle.push(&["101", "x"]);
    assert_eq!(session.tick().unwrap(), None);

    // Nothing new since the last row.
    assert_eq!(session.tick().unwrap(), None);

    fast_handle.push(&["103", "3"]);
    slow_handle.push(&["104", "y"]);
    assert_eq!(session.tick().unwrap(), None);

    target.exit();
    assert_eq!(
        session.tick().unwrap(),
        Some(ExitReason::TargetExited {
            pid: 77,
            code: Some(0)
        })
    );
    session.shutdown().unwrap();

    assert_eq!(
        lines(&out),
        vec![
            "f:time f:v s:time s:w",
            "101 2 101 x",
            "",
            "103 3 104 y",
        ]
    );
    assert_eq!(fast_handle.stop_calls(), 1);
    assert_eq!(slow_handle.stop_calls(), 1);
}

#[test]
fn unknown_module_is_rejected_before_launch() {
    let registry = builtin_registry();
    let mut config = SessionConfig::new(TargetSpec::Launch {
        program: "/nonexistent/promon-test-program".to_string(),
        args: Vec::new(),
    });
    config.modules.push(ModuleSpec::new("bogus"));

    let err = Session::from_config(&config, &registry).err().unwrap();
    assert!(matches!(err, SessionError::Registry(_)));
}

#[test]
fn unwritable_output_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let registry = builtin_registry();
    let mut config = SessionConfig::new(TargetSpec::Attach(std::process::id()));
    config.modules.push(ModuleSpec::new("sysstat"));
    config.output = Some(dir.path().join("missing").join("out.txt"));

    let err = Session::from_config(&config, &registry).err().unwrap();
    assert!(matches!(
        err,
        SessionError::Config(ConfigError::OutputFile { .. })
    ));
}

#[test]
fn missing_program_fails_to_launch() {
    let registry = builtin_registry();
    let mut config = SessionConfig::new(TargetSpec::Launch {
        program: "/nonexistent/promon-test-program".to_string(),
        args: Vec::new(),
    });
    config.modules.push(ModuleSpec::new("sysstat"));

    let err = Session::from_config(&config, &registry).err().unwrap();
    assert!(matches!(err, SessionError::Target(_)));
}

#[cfg(target_os = "linux")]
#[test]
fn launched_program_exit_ends_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("table.txt");
    let out_arg = out.to_string_lossy().to_string();
    let (args, matches) = cli::parse_from([
        "promon", "-m", "sysstat", "-c", "time", "-c", "load1", "-I", "100000", "-f",
        out_arg.as_str(), "sleep", "1",
    ])
    .unwrap();
    let config = cli::session_config(&args, &matches).unwrap();

    let mut session = Session::from_config(&config, &builtin_registry()).unwrap();
    let started = std::time::Instant::now();
    let reason = session.run().unwrap();

    assert!(matches!(
        reason,
        ExitReason::TargetExited { code: Some(0), .. }
    ));
    assert_eq!(reason.exit_code(), 0);
    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(session.rows_written() >= 1);

    let table = lines(&out);
    assert_eq!(table[0], "0:time 0:load1");
}

#[cfg(target_os = "linux")]
#[test]
fn attached_run_stops_on_request() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SessionConfig::new(TargetSpec::Attach(std::process::id()));
    let mut spec = ModuleSpec::new("procstat");
    spec.prefix = Some("self".to_string());
    spec.columns = vec!["state".to_string()];
    config.modules.push(spec);
    config.interval = Interval::Micros(50_000);
    config.output = Some(dir.path().join("table.txt"));

    let mut session = Session::from_config(&config, &builtin_registry()).unwrap();
    let stop = session.stop_signal();
    let trigger = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        stop.trigger();
    });

    assert_eq!(session.run().unwrap(), ExitReason::Interrupted);
    trigger.join().unwrap();
    assert_eq!(lines(&dir.path().join("table.txt"))[0], "self:state");
}
