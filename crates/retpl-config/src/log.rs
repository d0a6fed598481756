//! Logging section of the configuration

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, warn};
use validator::Validate;

use retpl_common::logging::LogHandle;

use crate::loader::ConfigError;
use crate::store::ConfigStore;

// Verbosity applied whenever the section is committed: output stays on
// stderr with no log directory until the level is raised again via the
// environment.
const RELOAD_VERBOSITY: i64 = 0;

/// Values of the `log` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct LogSettings {
    /// Logging verbosity as a numeric string
    #[validate(length(min = 1, message = "log level is required"))]
    #[validate(custom(function = "crate::validation::validate_numeric", message = "log level must be numeric"))]
    pub level: String,

    /// Directory for log files; must exist when set
    #[serde(alias = "logdir")]
    #[validate(custom(function = "crate::validation::validate_existing_path", message = "log directory must exist"))]
    pub log_dir: String,

    /// Per-module verbosity overrides, passed through verbatim
    pub vmodule: String,
}

/// Live, validated view over the `log` section
///
/// The fields reflect either the last successfully validated
/// configuration or the initial defaults, never a partially applied
/// state. Cloning shares the same live values.
#[derive(Debug, Clone)]
pub struct LogConfig {
    settings: Arc<RwLock<LogSettings>>,
    store: ConfigStore,
    log_handle: LogHandle,
}

impl LogConfig {
    /// Load and validate the section, then register it for reloads
    ///
    /// A failure of the first pass aborts construction. Later reload
    /// failures are logged and leave the previous values in force.
    pub fn new(store: &ConfigStore, log_handle: &LogHandle) -> Result<Self, ConfigError> {
        let config = Self {
            settings: Arc::new(RwLock::new(LogSettings::default())),
            store: store.clone(),
            log_handle: log_handle.clone(),
        };
        config.configure()?;
        let reload = config.clone();
        store.on_change(move |event| {
            debug!(path = %event.path.display(), "log configuration file changed");
            if let Err(err) = reload.configure() {
                warn!("changed config produced error: {err}, falling back to previous values");
            }
        });
        Ok(config)
    }

    /// Refresh from the store, committing only fully validated values
    fn configure(&self) -> Result<(), ConfigError> {
        let candidate: LogSettings = self.store.unmarshal_key("log")?;
        candidate
            .validate()
            .map_err(|source| ConfigError::Validation {
                key: "log".to_string(),
                source,
            })?;
        let previous_verbosity = self.log_handle.verbosity();
        if let Err(err) = self.log_handle.set_verbosity(RELOAD_VERBOSITY) {
            if let Err(restore) = self.log_handle.set_verbosity(previous_verbosity) {
                warn!("could not restore previous logging configuration: {restore}");
            }
            return Err(ConfigError::Logging(err));
        }
        *self.settings.write() = candidate;
        Ok(())
    }

    /// Logging verbosity as a numeric string
    pub fn level(&self) -> String {
        self.settings.read().level.clone()
    }

    /// Directory for log files, empty when unset
    pub fn log_dir(&self) -> String {
        self.settings.read().log_dir.clone()
    }

    /// Per-module verbosity overrides
    pub fn vmodule(&self) -> String {
        self.settings.read().vmodule.clone()
    }

    /// A copy of the whole section
    pub fn snapshot(&self) -> LogSettings {
        self.settings.read().clone()
    }
}
