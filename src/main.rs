use clap::Parser;

use gradebox::cli::args::{Cli, Commands};
use gradebox::cli::commands;
use gradebox::config::loader::load_config;
use gradebox::error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.global_opts.verbose);

    let config = load_config(cli.global_opts.config.as_deref())?;
    let format = cli.global_opts.format.clone();

    // Dispatch to subcommand handler
    match cli.command {
        Commands::Exec(args) => {
            let exit_code = commands::exec(args, config, format).await?;
            if exit_code != 0 {
                std::process::exit(exit_code.clamp(1, 255));
            }
        }
        Commands::Backends => {
            commands::backends(config, format).await?;
        }
        Commands::Languages => {
            commands::languages(config, format)?;
        }
        Commands::Policy => {
            commands::policy(format)?;
        }
        Commands::Init(args) => {
            commands::init(args).await?;
        }
        Commands::Config(args) => {
            commands::config(args, config).await?;
        }
    }

    Ok(())
}

fn init_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
