//! retpl - Main Entry Point

use std::collections::HashMap;
use std::process;

use clap::Parser;
use serde_yaml::Value;
use tracing::{error, info};

use retpl_config::{setup, Bootstrap, LogConfig, TemplateConfig, NO_CONFIG_MSG};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const COMMIT: &str = match option_env!("RETPL_BUILD_COMMIT") {
    Some(commit) => commit,
    None => "none",
};

/// Environment variables are read under this prefix
const ENV_PREFIX: &str = "RETPL";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Default configuration file path; RETPL_CONFIG overrides it
    #[arg(short, long)]
    config: Option<String>,
}

fn main() {
    let args = Args::parse();

    let mut defaults: HashMap<String, Value> = HashMap::new();
    if let Some(config) = args.config {
        defaults.insert("config".to_string(), Value::String(config));
    }

    // First thing is to set up logging and read the config.
    let bootstrap = match setup(VERSION, COMMIT, ENV_PREFIX, defaults) {
        Ok(bootstrap) => bootstrap,
        Err(err) => {
            error!("Fatal error config file: {err}");
            eprintln!("{NO_CONFIG_MSG}");
            process::exit(1);
        }
    };

    if let Err(err) = run(&bootstrap) {
        error!("startup failed: {err}");
        process::exit(1);
    }
}

fn run(bootstrap: &Bootstrap) -> retpl_common::Result<()> {
    let log_config = LogConfig::new(&bootstrap.store, &bootstrap.log_handle)?;
    info!(level = %log_config.level(), "logging configured");

    let template_config = TemplateConfig::new(&bootstrap.store)?;
    info!(
        source = %template_config.source_path(),
        target = %template_config.target_path(),
        "template configuration loaded"
    );

    info!("retpl finished successfully");
    Ok(())
}
