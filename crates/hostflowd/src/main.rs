mod commands;
mod config;
mod runtime;

use clap::{Parser, Subcommand};
use config::DaemonConfig;
use hostflow_cloud::CatalogKind;
use runtime::Runtime;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hostflowd")]
#[command(about = "Provision servers at a cloud provider, one queued task at a time", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: discovered, see HOSTFLOW_CONFIG_PATH)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker pool, outbox relay and reconciliation loop
    Run,
    /// Request a new server
    Create {
        /// Server name
        name: String,
        /// Size (e.g. cx22)
        #[arg(long)]
        size: String,
        /// Location (e.g. fsn1)
        #[arg(long)]
        location: String,
        /// OS image (e.g. ubuntu-24.04)
        #[arg(long)]
        image: String,
        /// Tenant owning the server
        #[arg(long, env = "HOSTFLOW_TENANT")]
        tenant: String,
        /// Requesting user
        #[arg(long, env = "HOSTFLOW_OWNER", default_value = "operator")]
        owner: String,
        /// SSH key registered at the provider (repeatable)
        #[arg(long = "ssh-key")]
        ssh_keys: Vec<String>,
        /// Extra label as key=value (repeatable)
        #[arg(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,
        /// Process the request in this process and wait for the result
        #[arg(short, long)]
        wait: bool,
    },
    /// Delete a server
    Delete {
        id: String,
        #[arg(short, long)]
        wait: bool,
    },
    /// Change the size of a ready server
    Resize {
        id: String,
        size: String,
        #[arg(short, long)]
        wait: bool,
    },
    /// Requeue a failed resource
    Retry {
        id: String,
        #[arg(short, long)]
        wait: bool,
    },
    /// Show one resource
    Status {
        id: String,
        /// Also ask the provider for the server's current state
        #[arg(short, long)]
        live: bool,
    },
    /// List resources
    List {
        /// Only resources of this tenant
        #[arg(long, env = "HOSTFLOW_TENANT")]
        tenant: Option<String>,
    },
    /// List provider sizes, locations or images
    Catalog {
        /// size, location or image
        #[arg(default_value = "size")]
        kind: CatalogKind,
    },
    /// Compare provider servers with the store once
    Reconcile,
}

fn parse_label(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let config = DaemonConfig::load(cli.config.as_deref())?;
    let runtime = Runtime::build(config).await?;

    match cli.command {
        Commands::Run => commands::run::handle(runtime).await?,
        Commands::Create {
            name,
            size,
            location,
            image,
            tenant,
            owner,
            ssh_keys,
            labels,
            wait,
        } => {
            let mut spec = hostflow_cloud::ServerSpec::new(name, size, location, image);
            spec.ssh_keys = ssh_keys;
            spec.labels = labels.into_iter().collect();
            commands::resource::create(&runtime, tenant, owner, spec, wait).await?;
        }
        Commands::Delete { id, wait } => commands::resource::delete(&runtime, &id, wait).await?,
        Commands::Resize { id, size, wait } => {
            commands::resource::resize(&runtime, &id, &size, wait).await?
        }
        Commands::Retry { id, wait } => commands::resource::retry(&runtime, &id, wait).await?,
        Commands::Status { id, live } => commands::resource::status(&runtime, &id, live).await?,
        Commands::List { tenant } => commands::resource::list(&runtime, tenant.as_deref()).await?,
        Commands::Catalog { kind } => commands::catalog::handle(&runtime, kind).await?,
        Commands::Reconcile => commands::reconcile::handle(&runtime).await?,
    }

    Ok(())
}
