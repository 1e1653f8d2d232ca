use clap::Parser;
use datapool::Settings;
use datapool::cli::commands::{init, scan, watch};
use datapool::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // For non-init commands, check if project is initialized
    if cli.config.is_none()
        && !matches!(cli.command, Commands::Init { .. })
        && let Err(warning) = Settings::check_init()
    {
        eprintln!("Warning: {warning}");
        eprintln!("Using default configuration for now.");
    }

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load().unwrap_or_else(|e| {
            eprintln!("Configuration error: {e}");
            Settings::default()
        }),
    };
    datapool::logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { force } => init::run_init(&std::env::current_dir()?, force),
        Commands::Config => init::run_config(&settings),
        Commands::Scan { dir, recursive, json } => scan::run(&dir, recursive, json, &settings),
        Commands::Watch { dir } => watch::run(&dir, &settings).await,
    }
}
