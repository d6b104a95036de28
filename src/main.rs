//! `deferred-runtime-cli` entry point.
//!
//! - `deferred-runtime-cli run [OPTIONS]` - demo host loop (default)
//! - `deferred-runtime-cli config show|defaults|validate [--json]`

use std::process::ExitCode;

use deferred_runtime::cli::{self, config_cmd, RunOptions};

// The coordinator must be ticked from the thread that created it.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("run");

    match command {
        "run" => {
            let options = match RunOptions::parse(args.get(2..).unwrap_or_default()) {
                Ok(options) => options,
                Err(e) => {
                    eprintln!("{e}");
                    print_command_help("run");
                    return ExitCode::from(2u8);
                }
            };
            ExitCode::from(cli::run(options).await as u8)
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            let json = args.iter().skip(3).any(|a| a == "--json");
            match subcommand {
                "show" => {
                    config_cmd::run_show(json);
                    ExitCode::SUCCESS
                }
                "defaults" => {
                    config_cmd::run_defaults(json);
                    ExitCode::SUCCESS
                }
                "validate" => ExitCode::from(config_cmd::run_validate() as u8),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            match args.get(2) {
                Some(subcommand) => print_command_help(subcommand),
                None => print_usage(),
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("deferred-runtime {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    eprintln!(
        "deferred-runtime v{}

USAGE:
    deferred-runtime-cli [COMMAND] [OPTIONS]

COMMANDS:
    run          Drive a coordinator with demo requests (default)
    config       Inspect configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

ENVIRONMENT:
    DEFERRED_DEFAULT_CONTEXT   immediate | frame-boundary | worker-pool | chained
    DEFERRED_MAX_PARALLELISM   Ring slots for chained dispatch (default: worker threads)
    DEFERRED_MAX_REQUEST_AGE   Ticks before forced completion (0 = off)
    DEFERRED_WORKER_THREADS    Worker pool size (0 = auto)
    DEFERRED_SHUTDOWN_TIMEOUT  Seconds from shutdown request to forced exit (default: 600)
    DEFERRED_LOG_LEVEL         Log filter (default: info)
    DEFERRED_LOG_FORMAT        json | pretty

EXIT CODES:
    0  Success
    1  Failure
    2  Usage error
",
        env!("CARGO_PKG_VERSION")
    );
}

fn print_command_help(command: &str) {
    match command {
        "run" => eprintln!(
            "deferred-runtime-cli run - Demo host loop

USAGE:
    deferred-runtime-cli run [OPTIONS]

OPTIONS:
    --frames N               Request shutdown after N frames (default: run until ctrl-c)
    --requests-per-frame K   Requests issued per frame (default: 4)
    --callables N            Callables per request (default: 8)
    --tick-ms MS             Frame interval in milliseconds (default: 16)

DESCRIPTION:
    Ticks a coordinator at a fixed rate, rotating requests through every
    execution context. Ctrl-c requests shutdown; the loop exits once the
    drain completes and prints final stats as JSON.
"
        ),
        "config" => eprintln!(
            "deferred-runtime-cli config - Inspect configuration

USAGE:
    deferred-runtime-cli config show [--json]
    deferred-runtime-cli config defaults [--json]
    deferred-runtime-cli config validate

EXIT CODES:
    0  Configuration is valid
    1  Some environment values are ignored
"
        ),
        _ => {
            eprintln!("No help available for: {}", command);
            print_usage();
        }
    }
}
