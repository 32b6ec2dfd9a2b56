use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{list_cmd, run_cmd, token_cmd};

#[derive(Parser)]
#[command(name = "credcheck")]
#[command(version, about = "IoT Hub MQTT credential-management conformance client")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Show protocol progress
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Show debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a credential-management scenario against a hub
    Run(run_cmd::RunCommand),
    /// List available scenarios
    List,
    /// Generate a shared access signature token
    Token(token_cmd::TokenCommand),
}

pub(crate) fn init_basic_tracing(verbose: bool, debug: bool) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("credcheck={level},credcheck_cli={level}")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let result = match cli.command {
        Commands::Run(cmd) => run_cmd::execute(cmd, cli.verbose, cli.debug).await,
        Commands::List => {
            list_cmd::execute();
            Ok(ExitCode::SUCCESS)
        }
        Commands::Token(cmd) => {
            init_basic_tracing(cli.verbose, cli.debug);
            token_cmd::execute(&cmd).map(|()| ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("✗ Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
