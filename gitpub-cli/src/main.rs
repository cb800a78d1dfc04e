//! gitpub - publish generated content onto a git branch
//!
//! Maintains a working clone per publication and pushes deposited content
//! back to the configured remote branch.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gitpub_core::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::PublishArgs;

/// Publish generated content onto a git branch
#[derive(Parser, Debug)]
#[command(name = "gitpub")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(long, global = true, env = "GITPUB_CONFIG", default_value = "gitpub.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Run the publish pipeline for a publication
    #[command(visible_alias = "p")]
    Publish(PublishArgs),

    /// Show the configured publications
    Config,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match cli.command {
        Some(Commands::Version) => {
            println!("gitpub {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Publish(args)) => {
            let config = Config::load_from_file(&cli.config)?;
            args.execute(&config, cli.verbose)?;
        }
        Some(Commands::Config) => {
            let config = Config::load_from_file(&cli.config)?;
            println!("Publications in {}", cli.config.display());
            println!("===================");
            for (name, publication) in &config.publication {
                println!();
                println!("[{}]", name);
                println!(
                    "  repo_uri: {}",
                    publication.repo_uri.as_deref().unwrap_or("(unset)")
                );
                println!("  branch: {}", publication.branch);
                if let Some(ref reference) = publication.reference_repo_uri {
                    println!("  reference_repo_uri: {}", reference);
                }
                if let Some(depth) = publication.fetch_depth {
                    println!("  fetch_depth: {}", depth);
                }
                if !publication.preserve.is_empty() {
                    println!("  preserve: {:?}", publication.preserve);
                }
            }
        }
        None => {
            println!("gitpub - publish generated content onto a git branch");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}
