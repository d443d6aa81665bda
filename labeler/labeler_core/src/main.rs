//! Logical cluster controller CLI
//!
//! Runs the controller, or queries logical clusters straight from node labels.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::{Client, CustomResourceExt};
use tabled::{Table, Tabled};
use tracing::Level;

use label_store_interface::KubeNodeStore;
use labeler_core::{controller, ClusterInventory, ControllerConfig, LogicalClusterSummary};
use labeler_shared_types::LogicalCluster;
use observability::{init_tracing, TracingConfig};

#[derive(Parser)]
#[command(name = "lc-controller")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "LC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format for queries
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller
    Run,

    /// List every logical cluster and its hosts
    List,

    /// Show the hosts of one logical cluster
    Get {
        /// Logical cluster name
        name: String,
    },

    /// Print the LogicalCluster CustomResourceDefinition
    Crd,
}

#[derive(Tabled)]
struct ClusterRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "NODES")]
    count: usize,
    #[tabled(rename = "HOSTS")]
    hosts: String,
}

impl From<&LogicalClusterSummary> for ClusterRow {
    fn from(summary: &LogicalClusterSummary) -> Self {
        Self {
            name: summary.cluster_name.clone(),
            count: summary.hosts.len(),
            hosts: summary.hosts.join(","),
        }
    }
}

fn print_clusters(clusters: &[LogicalClusterSummary], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            let rows: Vec<ClusterRow> = clusters.iter().map(ClusterRow::from).collect();
            println!("{}", Table::new(rows));
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(clusters)?);
        }
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ControllerConfig> {
    let config = match path {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::default(),
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        config.tracing_level()?
    };
    init_tracing(
        TracingConfig::new("lc-controller")
            .with_level(level)
            .with_json(config.logging.json)
            .with_span_events(config.logging.span_events)
            .with_location(config.logging.location || cli.verbose),
    );

    match cli.command {
        Commands::Run => {
            let client = Client::try_default().await?;
            controller::run(client, config).await?;
        }
        Commands::List => {
            let inventory = inventory(&config).await?;
            let clusters = inventory.list_clusters().await?;
            print_clusters(&clusters, cli.format)?;
        }
        Commands::Get { name } => {
            let inventory = inventory(&config).await?;
            let cluster = inventory.get_cluster(&name).await?;
            print_clusters(std::slice::from_ref(&cluster), cli.format)?;
        }
        Commands::Crd => {
            println!("{}", serde_json::to_string_pretty(&LogicalCluster::crd())?);
        }
    }

    Ok(())
}

async fn inventory(config: &ControllerConfig) -> anyhow::Result<ClusterInventory> {
    let client = Client::try_default().await?;
    let nodes = KubeNodeStore::new(client, config.marker_key.clone(), config.field_manager.clone());
    Ok(ClusterInventory::new(Arc::new(nodes)))
}
