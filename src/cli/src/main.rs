//! taskq CLI - command-line client for the taskq job service.
//!
//! Submits jobs, queries and waits on their status, checks service health and
//! manages local CLI settings.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config, health, task};
use output::OutputFormat;

const DEFAULT_API_URL: &str = "http://localhost:8000";

/// taskq - durable job submission and execution
#[derive(Parser)]
#[command(
    name = "taskq",
    version,
    about = "taskq - durable job submission and execution",
    long_about = "Command-line client for the taskq HTTP API: submit jobs, inspect and wait on their status, check service health.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "TASKQ_API_URL")]
    api_url: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job and print its task ID
    Submit(task::SubmitArgs),

    /// Show the current status of a job
    Status(task::StatusArgs),

    /// Poll a job until it completes or fails
    Wait(task::WaitArgs),

    /// Check service health
    Health,

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let api_url = cli
        .api_url
        .clone()
        .or_else(|| config::load_value("api-url"))
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    let client = client::ApiClient::new(&api_url)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Submit(args) => task::submit(args, &client, format).await,
        Commands::Status(args) => task::status(args, &client, format).await,
        Commands::Wait(args) => task::wait(args, &client, format).await,
        Commands::Health => health::execute(&client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_wait_with_durations() {
        let cli = Cli::try_parse_from([
            "taskq",
            "--output",
            "json",
            "wait",
            "6f9619ff-8b86-d011-b42d-00cf4fc964ff",
            "--interval",
            "250ms",
            "--timeout",
            "2m",
        ])
        .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Wait(args) => {
                assert_eq!(args.interval, Some(std::time::Duration::from_millis(250)));
                assert_eq!(args.timeout, Some(std::time::Duration::from_secs(120)));
            }
            _ => panic!("expected wait"),
        }
    }

    #[test]
    fn test_task_id_must_be_uuid() {
        assert!(Cli::try_parse_from(["taskq", "status", "../health"]).is_err());
        assert!(Cli::try_parse_from(["taskq", "wait", "abc?x=1"]).is_err());
        assert!(Cli::try_parse_from(["taskq", "status", "6f9619ff-8b86-d011-b42d-00cf4fc964ff"]).is_ok());
    }

    #[test]
    fn test_params_flags_conflict() {
        assert!(Cli::try_parse_from([
            "taskq", "submit", "echo", "--params", "{}", "--params-file", "p.json"
        ])
        .is_err());
    }
}
