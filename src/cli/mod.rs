use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod config;
pub mod run;
pub mod status;
pub mod version;

#[derive(Parser)]
#[command(name = "surfwatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Relay bot for surf-lesson leads", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot service
    Run {
        /// Path to config file (default: ~/.local/share/surfwatch/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Directory of per-user documents (overrides storage.path)
        #[arg(long)]
        store_path: Option<String>,
    },

    /// List stored operators and their session/template state
    Status {
        /// Path to config file
        #[arg(long)]
        config: Option<String>,
    },

    /// Write a commented default config file
    InitConfig {
        /// Where to write the file
        #[arg(long)]
        config: Option<String>,

        /// Store directory recorded in the file
        #[arg(long)]
        store_path: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run { config, store_path } => run::execute(config, store_path).await,
        Commands::Status { config } => status::execute(config).await,
        Commands::InitConfig {
            config,
            store_path,
            force,
        } => init_config(config, store_path, force),
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}

fn init_config(
    config: Option<String>,
    store_path: Option<String>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store_path = store_path
        .map(PathBuf::from)
        .unwrap_or_else(config::default_store_path);
    let config_path = config
        .map(PathBuf::from)
        .unwrap_or_else(|| config::default_config_path(&store_path));

    if config_path.exists() && !force {
        return Err(format!(
            "Config file '{}' already exists (use --force to overwrite)",
            config_path.display()
        )
        .into());
    }

    config::SurfwatchConfig::create_default(&config_path, &store_path)?;
    println!("📝 Created: {}", config_path.display());
    Ok(())
}
