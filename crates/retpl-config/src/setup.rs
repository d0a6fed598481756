//! One-time configuration bootstrap

use std::collections::HashMap;
use std::env;

use serde_yaml::Value;
use tracing::{debug, info, trace, warn};

use retpl_common::logging::{self, LogHandle};

use crate::loader::ConfigError;
use crate::store::ConfigStore;

/// Fixed diagnostic printed by the entrypoint when no config can be read
pub const NO_CONFIG_MSG: &str = "panicking cowardly without a config to read";

/// Everything the bootstrap hands back to the entrypoint
#[derive(Debug, Clone)]
pub struct Bootstrap {
    /// The loaded, watched configuration store
    pub store: ConfigStore,
    /// Handle to the process-wide logging filter
    pub log_handle: LogHandle,
}

/// Initialize logging, read the configuration file and start watching it
///
/// Logging is configured before the file is read so failures of the
/// reading logic are visible. The file path comes from the `config` key,
/// which means `<PREFIX>_CONFIG` overrides the programmatic default. A
/// missing, unreadable or malformed file is returned as an error; the
/// caller decides whether that terminates the process.
pub fn setup(
    version: &str,
    commit: &str,
    env_prefix: &str,
    defaults: HashMap<String, Value>,
) -> Result<Bootstrap, ConfigError> {
    let log_handle = logging::init(0);
    info!("starting retpl in version: {version}, commit: {commit}");

    let verbosity = pre_config_verbosity(env_prefix);
    info!(
        "setting verbosity level to {verbosity} for pre config logging, \
         change it via {env_prefix}_LOG_LEVEL"
    );
    if let Err(err) = log_handle.set_verbosity(verbosity) {
        warn!("error configuring log verbosity: {err}");
    }

    trace!("instantiating config store");
    let store = ConfigStore::new(env_prefix);
    trace!("setting defaults");
    for (key, value) in defaults {
        trace!("setting default {key}");
        store.set_default(&key, value);
    }

    let config_path = store.get_string("config");
    debug!("reading config from {config_path}");
    store.load(&config_path)?;
    store.watch()?;
    debug!("successfully read config");

    Ok(Bootstrap { store, log_handle })
}

/// `<PREFIX>_LOG_LEVEL` as an integer, `0` when absent or unparsable
fn pre_config_verbosity(env_prefix: &str) -> i64 {
    env::var(format!("{env_prefix}_LOG_LEVEL"))
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(0)
}
