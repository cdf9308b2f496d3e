//! Point d'entrée CLI pour pollimport

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// Charger .env au démarrage
fn load_env() {
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

mod cli;

use cli::Commands;

/// Importer les bureaux de vote, secteurs et adresses vers PostGIS
#[derive(Parser)]
#[command(name = "pollimport")]
#[command(author, version)]
#[command(about = "Importer les bureaux de vote, secteurs et adresses des collectivités vers PostGIS")]
#[command(long_about = "Import idempotent par juridiction: chaque import supprime les données de la juridiction puis les recharge depuis ses sources.\n\nUtilisez 'check' pour un import à blanc sans base de données et 'to-geojson' pour un export GeoJSON.")]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();

    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Import(args) => {
            info!(configs = args.configs.len(), "Import vers PostGIS");
            cli::cmd_import(args).await?;
        }
        Commands::Check { configs, source } => {
            info!(configs = configs.len(), "Import à blanc");
            cli::cmd_check(&configs, &source).await?;
        }
        Commands::ToGeojson {
            config,
            source,
            output,
        } => {
            info!(config = %config.display(), output = %output.display(), "Export vers GeoJSON");
            cli::cmd_export(&config, &source, &output).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
