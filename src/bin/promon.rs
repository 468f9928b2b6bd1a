//! promon - process monitor.
//!
//! Launches (or attaches to) a process, runs the requested measurement
//! modules against it and prints one merged, column-aligned row per
//! interval until the process exits, a module fails or the user interrupts.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::process::ExitCode;

use clap::error::ErrorKind;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use promon::cli::{self, Args};
use promon::module::ModuleRegistry;
use promon::sources::builtin_registry;
use promon::supervisor::Session;

/// Initializes the tracing subscriber on stderr; stdout carries the table.
/// Default level is WARN. Use -v for more detail, -q for errors only.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("promon={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn list_modules(registry: &ModuleRegistry) {
    println!("Available modules:");
    for entry in registry.entries() {
        println!("  {:<10} {}", entry.name, entry.summary);
    }
    println!();
    println!("Use --help-module MODULE for columns and options.");
}

fn run(args: &Args, matches: &clap::ArgMatches) -> ExitCode {
    let registry = builtin_registry();

    if args.list_modules {
        list_modules(&registry);
        return ExitCode::SUCCESS;
    }
    if let Some(name) = &args.help_module {
        return match registry.help(name) {
            Ok(help) => {
                println!("{}", help);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{}", e);
                ExitCode::from(1)
            }
        };
    }

    let config = match cli::session_config(args, matches) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(1);
        }
    };

    info!("promon {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: {} module(s), interval={}, merge={:?}, output={}",
        config.modules.len(),
        config.interval,
        config.merge,
        config
            .output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stdout".to_string())
    );

    let mut session = match Session::from_config(&config, &registry) {
        Ok(session) => session,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(1);
        }
    };

    let stop = session.stop_signal();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        stop.trigger();
    }) {
        warn!("Failed to set signal handler: {}", e);
    }

    match session.run() {
        Ok(reason) => ExitCode::from(reason.exit_code()),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(1)
        }
    }
}

fn main() -> ExitCode {
    let (args, matches) = match cli::parse_from(std::env::args_os()) {
        Ok(parsed) => parsed,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp
                | ErrorKind::DisplayVersion
                | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    init_logging(args.verbose, args.quiet);
    run(&args, &matches)
}
