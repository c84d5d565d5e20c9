//! Durable CLI Entry Point
//!
//! Runs the development server or mints read tokens.
//!
//! # Usage
//!
//! ```bash
//! # Run the server on the default port
//! durable dev
//!
//! # Custom port and settings file
//! durable dev --port 9090 --config durable.yaml
//!
//! # Print a read token for a workflow id
//! durable token wf_1234
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use log::{debug, info};

use durable::config::{ServerConfig, DEFAULT_TOKEN_VALIDITY_SECS};
use durable::token::TokenManager;
use durable::workflow::WorkflowId;
use durable::{APP_NAME, VERSION};

/// Environment variable that turns on debug logging.
const DEBUG_ENV: &str = "DURABLE_DEBUG";

/// Options of the `dev` subcommand.
#[derive(Debug, Default, PartialEq)]
struct DevOptions {
    port: Option<u16>,
    config_path: Option<PathBuf>,
    verbose: bool,
}

/// Command parsed from arguments.
#[derive(Debug, PartialEq)]
enum Command {
    Dev(DevOptions),
    Token(Option<String>),
    Help,
    Version,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let debug = verbose || env::var_os(DEBUG_ENV).is_some_and(|v| !v.is_empty());
    let level = if debug { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            let now = chrono::Local::now().format("%H:%M:%S");
            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "{} [{}] {}", now, record.level(), record.args())
                }
                _ => writeln!(buf, "{} {}", now, record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Durable HTTP step execution");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: durable <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  dev                 Run the engine and its HTTP API");
    println!("  token [WORKFLOW_ID] Print a read token signed by a throwaway key");
    println!();
    println!("Options for dev:");
    println!("  --port N            Port to listen on (default: 8080, env DURABLE_PORT)");
    println!("  --config PATH       YAML settings file");
    println!("  --verbose           Enable debug logging (or set {})", DEBUG_ENV);
    println!();
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
}

/// Parses command-line arguments into a Command.
fn parse_arguments(args: &[String]) -> Result<Command, String> {
    let mut rest = args.iter().skip(1); // Skip program name

    let command = match rest.next().map(String::as_str) {
        None | Some("--help") | Some("-h") => return Ok(Command::Help),
        Some("--version") | Some("-V") => return Ok(Command::Version),
        Some(command) => command,
    };

    match command {
        "dev" => {
            let mut options = DevOptions::default();
            while let Some(arg) = rest.next() {
                match arg.as_str() {
                    "--help" | "-h" => return Ok(Command::Help),
                    "--verbose" | "-v" => options.verbose = true,
                    "--port" | "-p" => {
                        let value = rest
                            .next()
                            .ok_or_else(|| "--port requires a number argument".to_string())?;
                        options.port = Some(
                            value
                                .parse()
                                .map_err(|_| format!("Invalid port value: {}", value))?,
                        );
                    }
                    "--config" => {
                        let value = rest
                            .next()
                            .ok_or_else(|| "--config requires a path argument".to_string())?;
                        options.config_path = Some(PathBuf::from(value));
                    }
                    other => return Err(format!("Unknown option: {}", other)),
                }
            }
            Ok(Command::Dev(options))
        }
        "token" => {
            let workflow_id = rest.next().cloned();
            if let Some(extra) = rest.next() {
                return Err(format!("Unexpected argument: {}", extra));
            }
            Ok(Command::Token(workflow_id))
        }
        other => Err(format!("Unknown command: {}", other)),
    }
}

/// Resolves settings: defaults, then the file, then the environment, then flags.
fn load_config(options: &DevOptions) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = match &options.config_path {
        Some(path) => {
            info!("Loading settings: {}", path.display());
            ServerConfig::load(path)?
        }
        None => ServerConfig::default(),
    };
    config.apply_env()?;
    if let Some(port) = options.port {
        config.port = port;
    }
    debug!("Settings: {:?}", config);
    Ok(config)
}

fn run_dev(options: DevOptions) -> Result<(), Box<dyn std::error::Error>> {
    setup_logging(options.verbose);
    print_banner();

    let config = load_config(&options)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(durable::server::serve(config))?;
    Ok(())
}

fn run_token(workflow_id: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let workflow_id = workflow_id
        .map(WorkflowId::from)
        .unwrap_or_else(WorkflowId::generate);
    let tokens = TokenManager::bootstrap(Duration::from_secs(DEFAULT_TOKEN_VALIDITY_SECS))?;

    println!("workflow:   {}", workflow_id);
    println!("public key: {}", tokens.public_key_hex());
    println!("token:      {}", tokens.create_workflow_token(&workflow_id)?);
    Ok(())
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let command = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    match command {
        Command::Help => print_usage(),
        Command::Version => println!("{} {}", APP_NAME, VERSION),
        Command::Dev(options) => run_dev(options)?,
        Command::Token(workflow_id) => run_token(workflow_id)?,
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("durable")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_dev_options() {
        let command = parse_arguments(&args(&["dev", "--port", "9090", "--config", "d.yaml", "-v"]));
        assert_eq!(
            command,
            Ok(Command::Dev(DevOptions {
                port: Some(9090),
                config_path: Some(PathBuf::from("d.yaml")),
                verbose: true,
            }))
        );
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(parse_arguments(&args(&["token"])), Ok(Command::Token(None)));
        assert_eq!(
            parse_arguments(&args(&["token", "wf_1"])),
            Ok(Command::Token(Some("wf_1".to_string())))
        );
        assert!(parse_arguments(&args(&["token", "a", "b"])).is_err());
    }

    #[test]
    fn test_parse_help_and_errors() {
        assert_eq!(parse_arguments(&args(&[])), Ok(Command::Help));
        assert_eq!(parse_arguments(&args(&["--version"])), Ok(Command::Version));
        assert!(parse_arguments(&args(&["dev", "--port"])).is_err());
        assert!(parse_arguments(&args(&["dev", "--port", "http"])).is_err());
        assert!(parse_arguments(&args(&["serve"])).is_err());
    }
}
