//! poolet CLI
//!
//! Command-line interface for interacting with the poolet daemon.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// poolet - places volumes and buckets onto storage pools
#[derive(Parser, Debug)]
#[command(name = "poolet")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon API address
    #[arg(long, default_value = "http://localhost:9300", env = "POOLET_API", global = true)]
    api: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List containers, or show one
    Containers {
        /// Container name
        name: Option<String>,
    },

    /// List instances
    Instances {
        /// Only instances bound to this container
        #[arg(long)]
        container: Option<String>,

        /// Only instances waiting for a container
        #[arg(long, conflicts_with = "container")]
        unassigned: bool,
    },

    /// Show recent scheduling diagnostics
    Events {
        /// Maximum number of entries
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Only diagnostics about this instance (name or uid)
        #[arg(long)]
        instance: Option<String>,
    },

    /// Show daemon and scheduler status
    Status,

    /// Create the containers and instances of a manifest
    Apply {
        /// Manifest file (TOML)
        file: PathBuf,
    },

    /// Delete a container or an instance
    Delete {
        #[command(subcommand)]
        target: DeleteTarget,
    },
}

#[derive(Subcommand, Debug)]
enum DeleteTarget {
    /// Delete a container by name
    Container { name: String },
    /// Delete an instance by name or uid
    Instance { instance: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let client = commands::ApiClient::new(&cli.api);

    match cli.command {
        Commands::Containers { name } => {
            commands::containers(&client, name).await?;
        }
        Commands::Instances {
            container,
            unassigned,
        } => {
            commands::instances(&client, container, unassigned).await?;
        }
        Commands::Events { limit, instance } => {
            commands::events(&client, limit, instance).await?;
        }
        Commands::Status => {
            commands::status(&client).await?;
        }
        Commands::Apply { file } => {
            commands::apply(&client, &file).await?;
        }
        Commands::Delete { target } => match target {
            DeleteTarget::Container { name } => {
                commands::delete_container(&client, &name).await?;
            }
            DeleteTarget::Instance { instance } => {
                commands::delete_instance(&client, &instance).await?;
            }
        },
    }

    Ok(())
}
