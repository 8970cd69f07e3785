use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ConfigStore;
use crate::daemon::Agent;
use crate::settings::AgentSettings;

#[derive(Parser)]
#[command(
    name = "mcm-agent",
    about = "MCM client agent backed by Vault configuration storage",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub settings: AgentSettings,

    /// Defaults to `run`.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the agent until SIGINT or SIGTERM. SIGHUP reloads the configuration.
    Run,
    /// Write the stored configuration to a YAML file.
    Export {
        #[arg(long, default_value = "mcm-agent-config.yaml")]
        file: PathBuf,
    },
    /// Validate a YAML file and store it as a new configuration version.
    Import {
        #[arg(long)]
        file: PathBuf,
    },
    /// List the stored configuration versions.
    Versions,
    /// Print the stored configuration as JSON.
    Show {
        /// Specific version to print instead of the latest.
        #[arg(long)]
        version: Option<u64>,
    },
    /// Soft-delete the latest configuration version.
    Delete,
    /// Print the Vault UI address of the configuration document.
    UiUrl,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn open_store(settings: &AgentSettings) -> Result<ConfigStore> {
    let mut store = ConfigStore::new(settings.store_settings());
    store
        .initialize()
        .await
        .context("Failed to initialize Vault configuration storage")?;
    Ok(store)
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.settings.log_level);
    let settings = cli.settings;
    let path = settings.config_path.clone();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let agent = Agent::boot(settings)
                .await
                .context("Failed to start MCM Agent")?;
            agent.run().await?;
        }

        Commands::UiUrl => {
            let store = ConfigStore::new(settings.store_settings());
            println!("{}", store.ui_url(&path));
        }

        command => {
            let mut store = open_store(&settings).await?;
            let result = run_store_command(&store, &path, command).await;
            store.shutdown();
            result?;
        }
    }
    Ok(())
}

async fn run_store_command(store: &ConfigStore, path: &str, command: Commands) -> Result<()> {
    match command {
        Commands::Export { file } => {
            store.export_to_yaml(path, &file).await?;
            println!("{}", file.display());
        }
        Commands::Import { file } => {
            let document = store.import_from_yaml(path, &file).await?;
            info!(dfsp_id = ?document.dfsp_id(), "Import complete");
            println!("{}", store.ui_url(path));
        }
        Commands::Versions => {
            for version in store.versions(path).await? {
                let state = if version.destroyed {
                    "destroyed"
                } else if !version.deletion_time.is_empty() {
                    "deleted"
                } else {
                    "active"
                };
                println!("{}\t{}\t{}", version.version, version.created_time, state);
            }
        }
        Commands::Show { version } => {
            let document = match version {
                Some(version) => store.version(path, version).await?,
                None => store.load(path).await?,
            };
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        Commands::Delete => {
            store.delete(path).await?;
        }
        Commands::Run | Commands::UiUrl => {}
    }
    Ok(())
}
