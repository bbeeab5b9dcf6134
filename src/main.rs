use clap::Parser;

use reconf::cli::commands::{check, config, run};
use reconf::cli::{Cli, Commands};
use reconf::config::Settings;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.settings {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let mut settings = match loaded {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: invalid settings: {e}");
            std::process::exit(1);
        }
    };

    reconf::logging::init_with_config(&settings.logging);

    let result = match cli.command() {
        Commands::Run { manifest } => {
            if let Some(manifest) = manifest {
                settings.manifest_path = manifest;
            }
            run::run(settings).await
        }
        Commands::Check { manifest } => {
            if let Some(manifest) = manifest {
                settings.manifest_path = manifest;
            }
            check::run_check(&settings).await
        }
        Commands::Config => config::run_config(&settings),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
