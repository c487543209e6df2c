//! CLI entry point for the `guardian-run` binary.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use guardian_cli::config::ConfigFile;
use guardian_cli::errors::CliError;
use guardian_cli::logging::init_logger;
use guardian_cli::runner::run_simulation;
use guardian_core as _;
use serde as _;
use serde_json as _;
#[cfg(test)]
use tempfile as _;
use thiserror as _;
use tracing::error;
use tracing_subscriber as _;

const USAGE_TEXT: &str = "\
Usage: guardian-run <command> [options]

Commands:
  run     Configure the simulated accelerator and run the load workload
  config  Print the effective configuration as JSON

Options:
  -c, --config <file>  JSON configuration file
  -e, --events <n>     Number of load events to produce
  -n, --checkers <n>   Number of checker cores
  -v, --verbose        Debug-level logging (run only)
  -h, --help           Show this help message

Examples:
  guardian-run run --checkers 6 --events 100
  guardian-run config > guardian.json
  guardian-run run --config guardian.json --verbose
";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run(RunArgs),
    Config(RunArgs),
}

#[derive(Debug, Default, PartialEq, Eq)]
struct RunArgs {
    config: Option<PathBuf>,
    events: Option<u64>,
    checkers: Option<u8>,
    verbose: bool,
}

#[derive(Debug)]
enum ParseResult {
    Command(Command),
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let first = args.next().ok_or_else(|| "missing command".to_string())?;

    if first == "--help" || first == "-h" {
        return Ok(ParseResult::Help);
    }

    let command_str = first.to_string_lossy().to_string();

    match command_str.as_str() {
        "run" => parse_run_args(args)
            .map(Command::Run)
            .map(ParseResult::Command),
        "config" => parse_run_args(args)
            .map(Command::Config)
            .map(ParseResult::Command),
        other => Err(format!("unknown command: {other}")),
    }
}

fn parse_number<T: std::str::FromStr>(
    flag: &str,
    value: Option<OsString>,
) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("missing value for {flag}"))?;
    let text = value.to_string_lossy();
    text.parse()
        .map_err(|_| format!("invalid value for {flag}: {text}"))
}

#[allow(clippy::while_let_on_iterator)]
fn parse_run_args(mut args: impl Iterator<Item = OsString>) -> Result<RunArgs, String> {
    let mut parsed = RunArgs::default();

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Err(USAGE_TEXT.to_string());
        }

        if arg == "--verbose" || arg == "-v" {
            parsed.verbose = true;
            continue;
        }

        if arg == "-c" || arg == "--config" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for --config".to_string())?;
            if parsed.config.replace(PathBuf::from(value)).is_some() {
                return Err("multiple configuration files provided".to_string());
            }
            continue;
        }

        if arg == "-e" || arg == "--events" {
            parsed.events = Some(parse_number("--events", args.next())?);
            continue;
        }

        if arg == "-n" || arg == "--checkers" {
            parsed.checkers = Some(parse_number("--checkers", args.next())?);
            continue;
        }

        return Err(format!("unknown option: {}", arg.to_string_lossy()));
    }

    Ok(parsed)
}

fn effective_config(args: &RunArgs) -> Result<ConfigFile, CliError> {
    let config = match &args.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    Ok(config.with_overrides(args.events, args.checkers))
}

fn report_error(e: &CliError) -> i32 {
    error!(%e, "run failed");
    eprintln!("error: {e}");
    e.exit_code()
}

fn run_command(args: &RunArgs) -> Result<(), i32> {
    init_logger(args.verbose);
    let config = effective_config(args).map_err(|e| report_error(&e))?;
    let report = run_simulation(&config).map_err(|e| report_error(&e))?;
    print!("{report}");
    Ok(())
}

fn config_command(args: &RunArgs) -> Result<(), i32> {
    let json = effective_config(args)
        .and_then(|config| config.to_json())
        .map_err(|e| {
            eprintln!("error: {e}");
            e.exit_code()
        })?;
    println!("{json}");
    Ok(())
}

fn main() {
    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Command(Command::Run(args))) => match run_command(&args) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Ok(ParseResult::Command(Command::Config(args))) => match config_command(&args) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Err(error) => {
            if error.starts_with("Usage:") {
                println!("{error}");
                0
            } else {
                eprintln!("error: {error}");
                eprintln!("{USAGE_TEXT}");
                2
            }
        }
    };

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::path::PathBuf;

    fn os_args(args: &[&str]) -> impl Iterator<Item = OsString> {
        args.iter().map(OsString::from).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn parses_run_command_with_all_options() {
        let result = parse_run_args(os_args(&[
            "--config",
            "guardian.json",
            "--events",
            "100",
            "-n",
            "6",
            "--verbose",
        ]))
        .expect("valid run args should parse");

        assert_eq!(
            result,
            RunArgs {
                config: Some(PathBuf::from("guardian.json")),
                events: Some(100),
                checkers: Some(6),
                verbose: true,
            }
        );
    }

    #[test]
    fn run_without_options_uses_defaults() {
        let result = parse_args(os_args(&["run"])).expect("run should parse");
        assert!(matches!(
            result,
            ParseResult::Command(Command::Run(args)) if args == RunArgs::default()
        ));
    }

    #[test]
    fn parses_help_flag() {
        let result = parse_args(os_args(&["--help"])).expect("help should parse without error");
        assert!(matches!(result, ParseResult::Help));
    }

    #[test]
    fn rejects_unknown_command() {
        let error = parse_args(os_args(&["build"])).expect_err("unknown command should fail");
        assert!(error.contains("unknown command"));
    }

    #[test]
    fn rejects_non_numeric_counts() {
        let error = parse_run_args(os_args(&["--checkers", "six"]))
            .expect_err("checker count must be numeric");
        assert!(error.contains("invalid value for --checkers"));
    }

    #[test]
    fn rejects_checker_count_beyond_u8() {
        let error = parse_run_args(os_args(&["--checkers", "300"]))
            .expect_err("checker count must fit");
        assert!(error.contains("invalid value"));
    }

    #[test]
    fn rejects_missing_option_value() {
        let error = parse_run_args(os_args(&["--events"])).expect_err("value required");
        assert!(error.contains("missing value for --events"));
    }

    #[test]
    fn rejects_positional_arguments() {
        let error = parse_run_args(os_args(&["guardian.json"])).expect_err("no positionals");
        assert!(error.contains("unknown option"));
    }

    #[test]
    fn overrides_apply_without_a_file() {
        let args = RunArgs {
            events: Some(5),
            checkers: Some(2),
            ..RunArgs::default()
        };
        let config = effective_config(&args).expect("defaults");
        assert_eq!(config.events, 5);
        assert_eq!(config.run.checkers, 2);
    }
}
