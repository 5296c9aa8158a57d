use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use structured_logger::json::new_writer;
use structured_logger::Builder;

use osm_edit::errors::Result;
use osm_edit::etl::changeset::ChangesetEtl;
use osm_edit::etl::Etl;

/// Prepares the upload of locally edited OpenStreetMap data
#[derive(Debug, Parser)]
#[clap(about, version, author)]
struct Args {
    /// Project configuration (JSON)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Regenerate the upload documents even if they exist
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Deserialize)]
pub struct UserConfig {
    pub project_dir: PathBuf,
    pub project_name: String,
    pub changeset: String,
    pub comment: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn load_user_config(path: &Path) -> Result<UserConfig> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}

fn setup_logging(level: &str) {
    Builder::with_level(level)
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_user_config(&args.config)?;
    setup_logging(&config.log_level);

    let mut etl = ChangesetEtl::new(
        &config.project_name,
        &config.changeset,
        &config.comment,
        config.source.as_deref(),
    );
    etl.process(&config.project_dir, args.force)
}
