//! `delights`: run the storefront, warm its offline cache, and drive the cart.

mod cart;
mod offline;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use delights_common::{init_logging, LogConfig, LogFormat};
use delights_core::StorefrontConfig;
use delights_net::{parse_origin, LoaderConfig, ResourceLoader};
use tracing::{error, info};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "delights")]
#[command(about = "Divine Delights bakery storefront", version)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `delights_sw=debug`; defaults to `RUST_LOG`
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format: pretty, compact or json
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the storefront
    Serve {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Directory the static site is served from
        #[arg(long)]
        public_dir: Option<PathBuf>,
    },

    /// Install and activate the offline cache against a running storefront
    Precache {
        /// Storefront origin; defaults to the configured bind address
        #[arg(long)]
        origin: Option<String>,
    },

    /// Fetch one path through the offline cache
    Fetch {
        /// Storefront origin; defaults to the configured bind address
        #[arg(long)]
        origin: Option<String>,

        /// Path to fetch, e.g. `/index.html`
        path: String,
    },

    /// Inspect or change the shopping cart
    #[command(subcommand)]
    Cart(cart::CartCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logging = LogConfig::default().with_format(cli.log_format);
    if let Some(filter) = &cli.log_level {
        logging = logging.with_filter(filter.as_str());
    }
    if let Err(e) = init_logging(logging) {
        eprintln!("warning: {e}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = StorefrontConfig::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;

    match cli.command {
        Command::Serve { port, public_dir } => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(dir) = public_dir {
                config.public_dir = dir;
            }
            config.validate()?;

            info!("Starting Divine Delights storefront");
            delights_server::serve(&config).await?;
        }
        Command::Precache { origin } => {
            let origin = resolve_origin(&config, origin.as_deref())?;
            let report = offline::precache(&config, &origin, network()?).await?;

            println!(
                "cache {} ready ({} entries)",
                config.offline.cache_name,
                config.offline.manifest.len()
            );
            for name in &report.deleted {
                println!("deleted stale cache {name}");
            }
            for (name, reason) in &report.failed {
                println!("could not delete stale cache {name}: {reason}");
            }
        }
        Command::Fetch { origin, path } => {
            let origin = resolve_origin(&config, origin.as_deref())?;
            let response = offline::fetch_path(&config, &origin, &path, network()?).await?;

            println!(
                "{} {} ({}, {} bytes)",
                response.status,
                response.status_text,
                if response.from_cache { "cache" } else { "network" },
                response.body.len()
            );
        }
        Command::Cart(command) => cart::run(&config, command)?,
    }

    Ok(())
}

fn resolve_origin(config: &StorefrontConfig, origin: Option<&str>) -> anyhow::Result<Url> {
    let origin = origin
        .map(str::to_string)
        .unwrap_or_else(|| config.local_origin());
    Ok(parse_origin(&origin)?)
}

fn network() -> anyhow::Result<Arc<ResourceLoader>> {
    Ok(Arc::new(ResourceLoader::new(LoaderConfig::default())?))
}
