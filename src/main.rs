use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use osm2graph::{Action, LoaderConfig, run_action};

#[derive(Parser, Debug)]
#[command(author, version, about = "Load OSM points and roads into a property graph", long_about = None)]
struct Args {
    /// OSM export to read (.osm XML or .osm.pbf)
    #[arg(long)]
    osm_file: Option<PathBuf>,

    /// SQLite graph file, or a directory that receives graph.db
    #[arg(long)]
    graph_db: Option<PathBuf>,

    /// Connection URL for another database, instead of --graph-db
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// load | load-points | load-roads | create-indexes | reset
    #[arg(long, default_value = "load")]
    action: String,

    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    no_spatial_index: bool,

    #[arg(long)]
    no_progress: bool,
}

impl Args {
    fn loader_config(&self) -> Result<LoaderConfig> {
        let mut config = match &self.config {
            Some(path) => LoaderConfig::from_file(path)?,
            None => LoaderConfig::default(),
        };
        if let Some(osm_file) = &self.osm_file {
            config.osm_file = Some(osm_file.clone());
        }
        if let Some(graph_db) = &self.graph_db {
            config.store.graph_db = graph_db.clone();
        }
        if let Some(url) = &self.database_url {
            config.store.database_url = Some(url.clone());
        }
        if self.no_spatial_index {
            config.spatial_index = false;
        }
        if self.no_progress {
            config.show_progress = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .target(env_logger::Target::Stderr)
        .init();

    let args = Args::parse();

    // reject unknown actions before anything touches the store
    let action: Action = args.action.parse().inspect_err(|e| error!("{}", e))?;
    let config = args.loader_config()?;

    info!("Starting osm2graph {}", env!("CARGO_PKG_VERSION"));
    run_action(action, &config)
        .await
        .with_context(|| format!("action {} failed", action))?;
    Ok(())
}
