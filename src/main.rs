//! Netforge - declarative AWS network provisioning and teardown.
//!
//! This is the main entry point for the Netforge CLI.

mod cli;

use clap::Parser;
use cli::commands::CommandContext;
use cli::{Cli, Commands};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let ctx = CommandContext::new(&cli);

    let result = match &cli.command {
        Commands::Apply(args) => args.execute(&ctx).await,
        Commands::DryRun(args) => args.execute(&ctx).await,
        Commands::Teardown(args) => args.execute(&ctx).await,
    };

    match result {
        Ok(()) => {}
        Err(error) => {
            ctx.output.error(&error.to_string());
            std::process::exit(error.exit_code());
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(verbosity >= 3))
        .with(env_filter)
        .init();
}
