//! Configuration file resolution and parsing
//!
//! The configured path is split into a directory and a base name; the
//! loader probes the supported extensions in order and parses the first
//! match into the YAML value model used by the store.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use thiserror::Error;

/// File extensions probed when resolving the config file, in order
pub const SUPPORTED_EXTENSIONS: &[&str] = &["yaml", "yml", "json", "toml"];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration path was supplied at all
    #[error("no configuration path was provided; set the 'config' default or the config environment variable")]
    MissingPath,

    /// No file with a supported extension exists at the resolved location
    #[error("no configuration file '{name}.<extension>' found under '{}'", dir.display())]
    NotFound {
        /// Directory that was probed
        dir: PathBuf,
        /// Base name without extension
        name: String,
    },

    /// I/O error while reading the configuration file
    #[error("failed to read configuration file '{}': {source}", path.display())]
    Io {
        /// File that could not be read
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but its content could not be parsed
    #[error("failed to parse configuration file '{}': {source}", path.display())]
    Parse {
        /// File that could not be parsed
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The file carries an extension outside [`SUPPORTED_EXTENSIONS`]
    #[error("unsupported configuration format '{extension}'")]
    UnsupportedFormat {
        /// Offending extension
        extension: String,
    },

    /// A section subtree could not be decoded into its struct shape
    #[error("error decoding configuration key '{key}': {source}")]
    Unmarshal {
        /// Dotted key of the section
        key: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// One or more declared field rules failed
    #[error("error validating '{key}' configuration: {source}")]
    Validation {
        /// Dotted key of the section
        key: String,
        #[source]
        source: validator::ValidationErrors,
    },

    /// Applying new logging flags failed
    #[error("error reconfiguring logging: {0}")]
    Logging(#[from] retpl_common::logging::LoggingError),

    /// The file watcher could not be started
    #[error("failed to watch configuration file: {0}")]
    Watch(#[from] notify::Error),

    /// Watching was requested before any file was loaded
    #[error("no configuration file has been loaded yet")]
    NotLoaded,
}

impl From<ConfigError> for retpl_common::RetplError {
    fn from(err: ConfigError) -> Self {
        retpl_common::RetplError::config(err.to_string())
    }
}

/// Resolve the configured path to a concrete existing file
///
/// The path's extension (if any) is trimmed; `<dir>/<name>.<ext>` is then
/// probed for every supported extension.
pub(crate) fn resolve(config_path: &str) -> Result<PathBuf, ConfigError> {
    if config_path.is_empty() {
        return Err(ConfigError::MissingPath);
    }
    let base = Path::new(config_path);
    let dir = match base.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = base
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("")
        .to_string();
    if name.is_empty() {
        return Err(ConfigError::MissingPath);
    }
    for extension in SUPPORTED_EXTENSIONS {
        let candidate = dir.join(format!("{name}.{extension}"));
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(ConfigError::NotFound { dir, name })
}

/// Read and parse a resolved configuration file into a mapping
pub(crate) fn load_file(path: &Path) -> Result<Value, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let value = match extension.as_str() {
        "yaml" | "yml" => {
            serde_yaml::from_str::<Value>(&content).map_err(|err| parse_error(path, err))?
        }
        "json" => {
            let raw: serde_json::Value =
                serde_json::from_str(&content).map_err(|err| parse_error(path, err))?;
            serde_yaml::to_value(raw).map_err(|err| parse_error(path, err))?
        }
        "toml" => {
            let raw: toml::Value =
                toml::from_str(&content).map_err(|err| parse_error(path, err))?;
            serde_yaml::to_value(raw).map_err(|err| parse_error(path, err))?
        }
        other => {
            return Err(ConfigError::UnsupportedFormat {
                extension: other.to_string(),
            })
        }
    };
    match value {
        Value::Mapping(_) => Ok(value),
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        _ => Err(ConfigError::Parse {
            path: path.to_path_buf(),
            source: "top level of the configuration must be a mapping".into(),
        }),
    }
}

fn parse_error(path: &Path, source: impl std::error::Error + Send + Sync + 'static) -> ConfigError {
    ConfigError::Parse {
        path: path.to_path_buf(),
        source: Box::new(source),
    }
}
